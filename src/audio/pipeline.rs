use super::concat::concatenator_for;
use super::{estimate_duration_seconds, AudioChunk, AudioResult};
use crate::config::AudioFormat;
use crate::error::{Result, ScriptcastError, SynthesisError};
use crate::progress::{CancelFlag, ProgressEvent, ProgressSink, Stage};
use crate::script::storage::slugify;
use crate::text::split_text;
use crate::tts::{SpeechSynthesizer, SynthesisOptions};
use chrono::Local;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Overlap between consecutive chunks handed to the chunker.
pub const CHUNK_OVERLAP_CHARS: usize = 200;

/// Smallest accepted chunk size. Must stay well above `CHUNK_OVERLAP_CHARS`
/// so every chunk carries new text after its overlap seed.
pub const MIN_CHUNK_SIZE_CHARS: usize = 500;

/// Input for one audio pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioRequest {
    pub text: String,
    #[serde(default)]
    pub format: Option<AudioFormat>,
    #[serde(default)]
    pub chunk_size_chars: Option<usize>,
    /// Custom voice; falls back to the pipeline's default voice.
    #[serde(default)]
    pub reference_id: Option<String>,
    /// Used to name the output file.
    #[serde(default)]
    pub title: Option<String>,
}

impl AudioRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: None,
            chunk_size_chars: None,
            reference_id: None,
            title: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(ScriptcastError::Validation("Text is required".to_string()));
        }
        if let Some(size) = self.chunk_size_chars {
            if size < MIN_CHUNK_SIZE_CHARS {
                return Err(ScriptcastError::Validation(format!(
                    "Chunk size must be at least {} characters, got {}",
                    MIN_CHUNK_SIZE_CHARS, size
                )));
            }
        }
        Ok(())
    }
}

/// Turns script text into one audio file, chunking long input.
pub struct AudioPipeline {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output_dir: PathBuf,
    work_root: PathBuf,
    format: AudioFormat,
    chunk_size_chars: usize,
    voice_id: Option<String>,
    mp3_bitrate: u32,
}

impl AudioPipeline {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            synthesizer,
            output_dir: output_dir.into(),
            work_root: std::env::temp_dir(),
            format: AudioFormat::default(),
            chunk_size_chars: 4000,
            voice_id: None,
            mp3_bitrate: 128,
        }
    }

    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_chunk_size(mut self, chars: usize) -> Self {
        self.chunk_size_chars = chars;
        self
    }

    pub fn with_voice(mut self, voice_id: Option<String>) -> Self {
        self.voice_id = voice_id;
        self
    }

    pub fn with_mp3_bitrate(mut self, bitrate: u32) -> Self {
        self.mp3_bitrate = bitrate;
        self
    }

    /// Directory under which per-run temp directories are created.
    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = root.into();
        self
    }

    fn output_path(&self, title: Option<&str>, format: AudioFormat) -> PathBuf {
        let slug = slugify(title.unwrap_or("narration"));
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        self.output_dir.join(format!(
            "{}_{}_{}.{}",
            slug,
            stamp,
            &suffix[..8],
            format.extension()
        ))
    }

    /// Synthesize `request.text` into a single file under the output directory.
    ///
    /// Text of at most the chunk size goes out in one call. Longer text is
    /// split and synthesized chunk by chunk, strictly in order. Any failure
    /// removes every temp file and leaves no output behind.
    pub async fn run(
        &self,
        request: &AudioRequest,
        sink: &dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<AudioResult> {
        request.validate()?;

        let format = request.format.unwrap_or(self.format);
        let chunk_size = request.chunk_size_chars.unwrap_or(self.chunk_size_chars);
        let options = SynthesisOptions {
            reference_id: request
                .reference_id
                .clone()
                .or_else(|| self.voice_id.clone()),
            format,
            mp3_bitrate: self.mp3_bitrate,
            ..SynthesisOptions::default()
        };

        let started = Instant::now();
        tokio::fs::create_dir_all(&self.output_dir).await?;
        tokio::fs::create_dir_all(&self.work_root).await?;
        let work_dir = tempfile::Builder::new()
            .prefix("scriptcast_audio_")
            .tempdir_in(&self.work_root)?;
        debug!("Using temp directory: {:?}", work_dir.path());

        let text = request.text.as_str();
        let chunks = if text.chars().count() <= chunk_size {
            info!(
                "Synthesizing {} chars in a single call with {}",
                text.chars().count(),
                self.synthesizer.name()
            );
            sink.emit(ProgressEvent::new(Stage::Processing, 50, "Generating audio"));
            vec![self.synthesize_chunk(0, text, &options, work_dir.path()).await?]
        } else {
            self.synthesize_chunks(text, chunk_size, &options, work_dir.path(), sink, cancel)
                .await?
        };

        if cancel.is_cancelled() {
            return Err(ScriptcastError::Cancelled);
        }

        let chunk_count = chunks.len();
        if chunk_count > 1 {
            sink.emit(ProgressEvent::new(
                Stage::Combining,
                90,
                format!("Combining {} audio chunks", chunk_count),
            ));
        }

        let output_path = self.output_path(request.title.as_deref(), format);
        let segments: Vec<PathBuf> = chunks.iter().map(|c| c.path.clone()).collect();
        let file_size_bytes = match concatenator_for(format)
            .concatenate(&segments, &output_path)
            .await
        {
            Ok(size) => size,
            Err(e) => {
                let _ = tokio::fs::remove_file(&output_path).await;
                return Err(e);
            }
        };

        let temp_path = work_dir.path().to_path_buf();
        if let Err(e) = work_dir.close() {
            warn!("Failed to remove temp directory {:?}: {}", temp_path, e);
        }

        let result = AudioResult {
            output_path,
            file_size_bytes,
            estimated_duration_seconds: estimate_duration_seconds(text),
            chunk_count,
            format,
        };

        info!(
            "Audio ready: {:?} ({} bytes, {} chunks, ~{:.0}s) in {:.1}s",
            result.output_path,
            result.file_size_bytes,
            chunk_count,
            result.estimated_duration_seconds,
            started.elapsed().as_secs_f64()
        );
        sink.emit(
            ProgressEvent::new(
                Stage::Complete,
                100,
                format!("Audio ready ({} chunks)", chunk_count),
            )
            .at(chunk_count, chunk_count),
        );

        Ok(result)
    }

    async fn synthesize_chunks(
        &self,
        text: &str,
        chunk_size: usize,
        options: &SynthesisOptions,
        dir: &Path,
        sink: &dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<Vec<AudioChunk>> {
        let pieces = split_text(text, chunk_size, CHUNK_OVERLAP_CHARS);
        let total = pieces.len();
        info!(
            "Synthesizing {} chars in {} chunks with {}",
            text.chars().count(),
            total,
            self.synthesizer.name()
        );

        let mut chunks = Vec::with_capacity(total);
        for (index, piece) in pieces.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ScriptcastError::Cancelled);
            }

            sink.emit(
                ProgressEvent::new(
                    Stage::ChunkStart,
                    chunk_progress(index, total),
                    format!("Generating chunk {} of {}", index + 1, total),
                )
                .at(index + 1, total),
            );

            let chunk = match self.synthesize_chunk(index, piece, options, dir).await {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("Chunk {} of {} failed: {}", index + 1, total, e);
                    return Err(e);
                }
            };
            debug!("Chunk {} written ({} bytes)", index, chunk.size_bytes);
            chunks.push(chunk);

            sink.emit(
                ProgressEvent::new(
                    Stage::ChunkComplete,
                    chunk_progress(index + 1, total),
                    format!("Finished chunk {} of {}", index + 1, total),
                )
                .at(index + 1, total),
            );
        }

        Ok(chunks)
    }

    /// Stream one synthesis response into a temp file.
    async fn synthesize_chunk(
        &self,
        index: usize,
        text: &str,
        options: &SynthesisOptions,
        dir: &Path,
    ) -> Result<AudioChunk> {
        let path = dir.join(format!("chunk_{:04}.{}", index, options.format.extension()));
        let mut stream = self.synthesizer.synthesize(text, options).await?;

        let mut file = File::create(&path).await?;
        let mut size_bytes = 0u64;
        while let Some(bytes) = stream.next().await {
            let bytes = bytes?;
            file.write_all(&bytes).await?;
            size_bytes += bytes.len() as u64;
        }
        file.flush().await?;

        if size_bytes == 0 {
            return Err(SynthesisError::Other(format!(
                "Speech service returned no audio for chunk {}",
                index + 1
            ))
            .into());
        }

        Ok(AudioChunk {
            index,
            source_text: text.to_string(),
            path,
            size_bytes,
        })
    }
}

/// Chunk work spans 0-90% of audio progress.
fn chunk_progress(done: usize, total: usize) -> u8 {
    ((done as f64 / total.max(1) as f64) * 90.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::AudioStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;

    /// Returns `<n>` for the n-th call and optionally fails on one call.
    struct FakeSynthesizer {
        texts: Mutex<Vec<String>>,
        fail_on: Option<usize>,
    }

    impl FakeSynthesizer {
        fn new(fail_on: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                texts: Mutex::new(Vec::new()),
                fail_on,
            })
        }

        fn calls(&self) -> usize {
            self.texts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynthesizer {
        async fn synthesize(
            &self,
            text: &str,
            _options: &SynthesisOptions,
        ) -> std::result::Result<AudioStream, SynthesisError> {
            let call = {
                let mut texts = self.texts.lock().unwrap();
                texts.push(text.to_string());
                texts.len() - 1
            };
            if self.fail_on == Some(call) {
                return Err(SynthesisError::Upstream {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            let parts = vec![
                Ok(Bytes::from(format!("<{}", call))),
                Ok(Bytes::from_static(b">")),
            ];
            Ok(futures::stream::iter(parts).boxed())
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for Recorder {
        fn emit(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl Recorder {
        fn stages(&self) -> Vec<(Stage, u8)> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .map(|e| (e.stage, e.progress))
                .collect()
        }
    }

    fn sentences(count: usize) -> String {
        (1..=count)
            .map(|i| format!("This is sentence number {} of the narration text.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        output: PathBuf,
        work: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        Fixture {
            output: dir.path().join("output"),
            work: dir.path().join("work"),
            _dir: dir,
        }
    }

    fn pipeline(synth: Arc<FakeSynthesizer>, fx: &Fixture) -> AudioPipeline {
        AudioPipeline::new(synth, &fx.output).with_work_root(&fx.work)
    }

    fn dir_is_empty(path: &Path) -> bool {
        std::fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    #[test]
    fn test_request_validation() {
        assert!(AudioRequest::new("Hello.").validate().is_ok());
        assert!(AudioRequest::new("   ").validate().is_err());
        let mut request = AudioRequest::new("Hello.");
        request.chunk_size_chars = Some(99);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_chunk_size_at_overlap_is_rejected() {
        assert!(MIN_CHUNK_SIZE_CHARS > CHUNK_OVERLAP_CHARS);

        let mut request = AudioRequest::new("Hello.");
        request.chunk_size_chars = Some(CHUNK_OVERLAP_CHARS);
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("at least 500"), "{}", err);

        request.chunk_size_chars = Some(MIN_CHUNK_SIZE_CHARS);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_chunk_progress_rounding() {
        assert_eq!(chunk_progress(0, 3), 0);
        assert_eq!(chunk_progress(1, 3), 30);
        assert_eq!(chunk_progress(2, 3), 60);
        assert_eq!(chunk_progress(3, 3), 90);
        assert_eq!(chunk_progress(1, 7), 13);
    }

    #[tokio::test]
    async fn test_text_at_chunk_size_uses_single_call() {
        let fx = fixture();
        let synth = FakeSynthesizer::new(None);
        let text = sentences(12);
        let mut request = AudioRequest::new(text.clone());
        request.chunk_size_chars = Some(text.chars().count());
        let recorder = Recorder::default();

        let result = pipeline(synth.clone(), &fx)
            .run(&request, &recorder, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(synth.calls(), 1);
        assert_eq!(synth.texts.lock().unwrap()[0], text);
        assert_eq!(result.chunk_count, 1);
        assert_eq!(
            recorder.stages(),
            vec![(Stage::Processing, 50), (Stage::Complete, 100)]
        );
        assert_eq!(std::fs::read(&result.output_path).unwrap(), b"<0>");
        assert_eq!(result.file_size_bytes, 3);
        assert!(dir_is_empty(&fx.work));
    }

    #[tokio::test]
    async fn test_text_over_chunk_size_is_split() {
        let fx = fixture();
        let synth = FakeSynthesizer::new(None);
        let text = sentences(12);
        let mut request = AudioRequest::new(text.clone());
        request.chunk_size_chars = Some(text.chars().count() - 1);
        request.format = Some(AudioFormat::Mp3);
        let recorder = Recorder::default();

        let result = pipeline(synth.clone(), &fx)
            .run(&request, &recorder, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(synth.calls(), 2);
        assert_eq!(result.chunk_count, 2);
        assert_eq!(
            recorder.stages(),
            vec![
                (Stage::ChunkStart, 0),
                (Stage::ChunkComplete, 45),
                (Stage::ChunkStart, 45),
                (Stage::ChunkComplete, 90),
                (Stage::Combining, 90),
                (Stage::Complete, 100),
            ]
        );
        assert_eq!(std::fs::read(&result.output_path).unwrap(), b"<0><1>");
        assert_eq!(result.format, AudioFormat::Mp3);
        assert!(result.output_path.extension().unwrap() == "mp3");
        assert!(dir_is_empty(&fx.work));
    }

    #[tokio::test]
    async fn test_failure_mid_run_cleans_up() {
        let fx = fixture();
        let synth = FakeSynthesizer::new(Some(2));
        let mut request = AudioRequest::new(sentences(40));
        request.chunk_size_chars = Some(500);

        let err = pipeline(synth.clone(), &fx)
            .run(&request, &crate::progress::NoopSink, &CancelFlag::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ScriptcastError::Synthesis(SynthesisError::Upstream { status: 500, .. })
        ));
        assert_eq!(synth.calls(), 3);
        assert!(dir_is_empty(&fx.work));
        assert!(dir_is_empty(&fx.output));
    }

    #[tokio::test]
    async fn test_default_voice_and_duration_estimate() {
        struct VoiceCheck(Mutex<Option<String>>);

        #[async_trait]
        impl SpeechSynthesizer for VoiceCheck {
            async fn synthesize(
                &self,
                _text: &str,
                options: &SynthesisOptions,
            ) -> std::result::Result<AudioStream, SynthesisError> {
                *self.0.lock().unwrap() = options.reference_id.clone();
                Ok(futures::stream::iter(vec![Ok(Bytes::from_static(b"x"))]).boxed())
            }

            fn name(&self) -> &'static str {
                "voice-check"
            }
        }

        let fx = fixture();
        let synth = Arc::new(VoiceCheck(Mutex::new(None)));
        let pipeline = AudioPipeline::new(synth.clone(), &fx.output)
            .with_work_root(&fx.work)
            .with_voice(Some("narrator-1".to_string()));
        let text = vec!["calm"; 300].join(" ");

        let result = pipeline
            .run(&AudioRequest::new(text), &crate::progress::NoopSink, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(synth.0.lock().unwrap().as_deref(), Some("narrator-1"));
        assert_eq!(result.estimated_duration_seconds, 120.0);
    }

    #[tokio::test]
    async fn test_empty_audio_is_an_error() {
        struct Silent;

        #[async_trait]
        impl SpeechSynthesizer for Silent {
            async fn synthesize(
                &self,
                _text: &str,
                _options: &SynthesisOptions,
            ) -> std::result::Result<AudioStream, SynthesisError> {
                Ok(futures::stream::empty().boxed())
            }

            fn name(&self) -> &'static str {
                "silent"
            }
        }

        let fx = fixture();
        let err = AudioPipeline::new(Arc::new(Silent), &fx.output)
            .with_work_root(&fx.work)
            .run(&AudioRequest::new("Hello."), &crate::progress::NoopSink, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no audio"));
        assert!(dir_is_empty(&fx.output));
    }

    #[tokio::test]
    async fn test_cancel_stops_between_chunks() {
        let fx = fixture();
        let synth = FakeSynthesizer::new(None);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut request = AudioRequest::new(sentences(40));
        request.chunk_size_chars = Some(500);

        let err = pipeline(synth.clone(), &fx)
            .run(&request, &crate::progress::NoopSink, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ScriptcastError::Cancelled));
        assert_eq!(synth.calls(), 0);
    }
}
