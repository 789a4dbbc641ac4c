//! Integration tests for scriptcast
//!
//! These tests drive the script assembler, audio pipeline and job tracker
//! together using in-process generators, without requiring external API keys.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use scriptcast::audio::{AudioPipeline, AudioRequest};
use scriptcast::config::{AudioFormat, Config};
use scriptcast::error::{Result, ScriptcastError, SynthesisError};
use scriptcast::jobs::{JobKind, JobResult, JobTracker};
use scriptcast::llm::{CompletionOptions, TextGenerator};
use scriptcast::progress::{CancelFlag, NoopSink, Stage};
use scriptcast::script::ScriptRequest;
use scriptcast::tts::{AudioStream, SpeechSynthesizer, SynthesisOptions};
use scriptcast::{run_pipeline, PipelineRequest, Services};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const OUTLINE: &str = "TITLE: The Quiet Mind
CHAPTER 1: Breath
Why the breath is the anchor of practice.
CHAPTER 2: Focus
Training attention one moment at a time.
CHAPTER 3: Rest
Carrying calm into everyday life.";

/// Six words per sentence; 100 sentences make a 600 word, 3 minute script.
const SENTENCE: &str = "Meditation calms the busy mind daily.";

/// Answers outline prompts with `OUTLINE` and everything else with `body`.
struct MeditationWriter {
    body: String,
    prompts: Mutex<Vec<String>>,
}

impl MeditationWriter {
    fn new(sentences: usize) -> Self {
        Self {
            body: vec![SENTENCE; sentences].join(" "),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for MeditationWriter {
    async fn complete(&self, prompt: &str, _options: CompletionOptions) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.contains("Respond using exactly this format") {
            return Ok(OUTLINE.to_string());
        }
        Ok(self.body.clone())
    }

    fn name(&self) -> &'static str {
        "meditation"
    }
}

/// Echoes each request back as its "audio" and records the text it received.
#[derive(Default)]
struct EchoVoice {
    texts: Mutex<Vec<String>>,
}

impl EchoVoice {
    fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for EchoVoice {
    async fn synthesize(
        &self,
        text: &str,
        _options: &SynthesisOptions,
    ) -> std::result::Result<AudioStream, SynthesisError> {
        self.texts.lock().unwrap().push(text.to_string());
        let audio = Bytes::from(format!("<{}>", text.len()));
        Ok(futures::stream::iter(vec![Ok(audio)]).boxed())
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

fn test_config(dir: &TempDir) -> Config {
    Config {
        output_dir: dir.path().join("output"),
        scripts_dir: dir.path().join("scripts"),
        ..Config::default()
    }
}

// ============================================================================
// Topic to Audio Tests
// ============================================================================

mod pipeline_tests {
    use super::*;

    #[tokio::test]
    async fn test_three_minute_meditation_script() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(MeditationWriter::new(100));
        let voice = Arc::new(EchoVoice::default());
        let services = Services::new(writer.clone(), voice.clone(), &test_config(&dir));

        let request = ScriptRequest::new("Benefits of meditation", 3);

        let preview = services.assembler.preview(&request).await.unwrap();
        assert_eq!(preview.chapters.len(), 3);
        assert_eq!(preview.title, "The Quiet Mind");
        assert_eq!(preview.word_count_target, 600);

        let mut pipeline_request = PipelineRequest::new(request);
        pipeline_request.chunk_size_chars = Some(4000);
        let result = run_pipeline(&services, &pipeline_request, &NoopSink, &CancelFlag::new())
            .await
            .unwrap();

        // Below the long-form threshold the script is written in one call.
        assert!(result.script.chapter_stats.is_none());
        assert_eq!(result.script.word_count, 600);
        assert!((result.script.estimated_duration_minutes - 4.0).abs() < 1e-9);
        assert!(result.script.file_path.as_ref().unwrap().exists());

        assert_eq!(result.audio.chunk_count, 1);
        assert_eq!(voice.texts().len(), 1);
        assert!((result.audio.estimated_duration_seconds - 240.0).abs() < 1e-9);
        assert_eq!(result.audio.format, AudioFormat::Mp3);
        assert!(result.audio.output_path.starts_with(dir.path().join("output")));
        assert!(result.audio.output_path.exists());

        // One outline call for the preview plus one direct generation call.
        assert_eq!(writer.prompts().len(), 2);
    }

    #[tokio::test]
    async fn test_chaptered_script_keeps_outline_order() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(MeditationWriter::new(34));
        let services = Services::new(
            writer.clone(),
            Arc::new(EchoVoice::default()),
            &test_config(&dir),
        );

        let mut request = ScriptRequest::new("Benefits of meditation", 3);
        request.use_chapters = true;

        let script = services
            .assembler
            .generate(&request, &NoopSink, &CancelFlag::new())
            .await
            .unwrap();

        let stats = script.chapter_stats.as_ref().unwrap();
        let titles: Vec<&str> = stats.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, ["Breath", "Focus", "Rest"]);
        assert!(stats.iter().all(|s| s.passed_validation && s.attempts == 1));
        assert_eq!(script.degraded_chapters(), 0);
        assert_eq!(script.content.matches("\n\n").count(), 2);

        let prompts = writer.prompts();
        assert_eq!(prompts.len(), 4);
        assert!(prompts[1].contains("chapter 1 of 3"));
        assert!(prompts[2].contains("The previous chapter ended with:"));
        assert!(prompts[3].contains("final chapter"));
    }

    #[tokio::test]
    async fn test_long_script_is_chunked_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let voice = Arc::new(EchoVoice::default());
        let mut config = test_config(&dir);
        config.chunk_size_chars = 1000;
        let services = Services::new(Arc::new(MeditationWriter::new(100)), voice.clone(), &config);

        let result = run_pipeline(
            &services,
            &PipelineRequest::new(ScriptRequest::new("Benefits of meditation", 3)),
            &NoopSink,
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        let texts = voice.texts();
        assert!(texts.len() > 1);
        assert_eq!(result.audio.chunk_count, texts.len());

        // The combined file holds every chunk's audio in synthesis order.
        let expected: String = texts.iter().map(|t| format!("<{}>", t.len())).collect();
        let written = tokio::fs::read_to_string(&result.audio.output_path)
            .await
            .unwrap();
        assert_eq!(written, expected);
        assert_eq!(result.audio.file_size_bytes, expected.len() as u64);
    }

    #[tokio::test]
    async fn test_invalid_request_makes_no_calls() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(MeditationWriter::new(100));
        let voice = Arc::new(EchoVoice::default());
        let services = Services::new(writer.clone(), voice.clone(), &test_config(&dir));

        let err = run_pipeline(
            &services,
            &PipelineRequest::new(ScriptRequest::new("   ", 3)),
            &NoopSink,
            &CancelFlag::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ScriptcastError::Validation(_)));
        assert!(writer.prompts().is_empty());
        assert!(voice.texts().is_empty());
    }
}

// ============================================================================
// Audio Chunking Tests
// ============================================================================

mod chunking_tests {
    use super::*;

    fn pipeline(dir: &TempDir, voice: Arc<EchoVoice>) -> AudioPipeline {
        AudioPipeline::new(voice, dir.path().join("output"))
            .with_chunk_size(4000)
            .with_work_root(dir.path())
    }

    #[tokio::test]
    async fn test_text_at_chunk_size_is_one_request() {
        let dir = tempfile::tempdir().unwrap();
        let voice = Arc::new(EchoVoice::default());
        let text = "a".repeat(4000);

        let result = pipeline(&dir, voice.clone())
            .run(&AudioRequest::new(text), &NoopSink, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(result.chunk_count, 1);
        assert_eq!(voice.texts().len(), 1);
    }

    #[tokio::test]
    async fn test_request_overrides_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let voice = Arc::new(EchoVoice::default());
        let text = vec![SENTENCE; 20].join(" ");

        let mut request = AudioRequest::new(text);
        request.chunk_size_chars = Some(500);
        let result = pipeline(&dir, voice.clone())
            .run(&request, &NoopSink, &CancelFlag::new())
            .await
            .unwrap();

        assert!(result.chunk_count > 1);
        assert_eq!(result.chunk_count, voice.texts().len());
    }
}

// ============================================================================
// Job Lifecycle Tests
// ============================================================================

mod job_tests {
    use super::*;

    #[tokio::test]
    async fn test_pipeline_job_streams_then_completes() {
        let dir = tempfile::tempdir().unwrap();
        let services = Services::new(
            Arc::new(MeditationWriter::new(100)),
            Arc::new(EchoVoice::default()),
            &test_config(&dir),
        );
        let tracker = JobTracker::in_memory();
        let request = PipelineRequest::new(ScriptRequest::new("Benefits of meditation", 3));

        let (id, mut events) = tracker
            .spawn(JobKind::Pipeline, move |sink| async move {
                let result = run_pipeline(&services, &request, &sink, &CancelFlag::new()).await?;
                Ok(JobResult::Pipeline {
                    script: result.script,
                    audio: result.audio,
                })
            })
            .await;

        let mut received = Vec::new();
        while let Some(event) = events.recv().await {
            received.push(event);
        }

        assert_eq!(received.first().unwrap().stage, Stage::Starting);
        let last = received.last().unwrap();
        assert_eq!(last.stage, Stage::Complete);
        assert!(last.result.is_some());
        // Only the job itself reports completion.
        assert_eq!(
            received.iter().filter(|e| e.stage == Stage::Complete).count(),
            1
        );

        let progress: Vec<u8> = received.iter().filter_map(|e| e.progress).collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));

        let job = tracker.get_job(&id).await.unwrap();
        assert!(job.is_complete);
        assert_eq!(job.progress, 100);
        match job.result.unwrap() {
            JobResult::Pipeline { script, audio } => {
                assert_eq!(script.word_count, 600);
                assert_eq!(audio.chunk_count, 1);
            }
            JobResult::Audio(_) => panic!("expected a pipeline result"),
        }
    }

    #[tokio::test]
    async fn test_failed_job_is_queryable() {
        let tracker = JobTracker::in_memory();

        let (id, mut events) = tracker
            .spawn(JobKind::Audio, |_sink| async {
                Err(ScriptcastError::Synthesis(SynthesisError::Upstream {
                    status: 402,
                    body: "insufficient balance".into(),
                }))
            })
            .await;

        let mut last = None;
        while let Some(event) = events.recv().await {
            last = Some(event);
        }
        let last = last.unwrap();
        assert_eq!(last.stage, Stage::Error);
        assert!(last.error.unwrap().contains("402"));

        let job = tracker.get_job(&id).await.unwrap();
        assert!(job.is_complete);
        assert!(job.result.is_none());
        assert!(job.error.unwrap().contains("insufficient balance"));
    }
}
