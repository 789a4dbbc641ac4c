use crate::audio::{AudioPipeline, AudioRequest, AudioResult};
use crate::config::{AudioFormat, Config};
use crate::error::{Result, ScriptcastError};
use crate::llm::{GeminiClient, TextGenerator};
use crate::progress::{CancelFlag, ProgressEvent, ProgressSink, ScaledSink, Stage};
use crate::script::{FileScriptStore, GeneratedScript, ScriptAssembler, ScriptRequest};
use crate::tts::{FishAudioClient, SpeechSynthesizer};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// The generation services shared by the CLI and the HTTP server.
#[derive(Clone)]
pub struct Services {
    pub assembler: Arc<ScriptAssembler>,
    pub audio: Arc<AudioPipeline>,
}

impl Services {
    /// Wire services around explicit backends.
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        config: &Config,
    ) -> Self {
        let store = Arc::new(FileScriptStore::new(&config.scripts_dir));
        let assembler = ScriptAssembler::new(generator, store);
        let audio = AudioPipeline::new(synthesizer, &config.output_dir)
            .with_format(config.audio_format)
            .with_chunk_size(config.chunk_size_chars)
            .with_voice(config.voice_id.clone())
            .with_mp3_bitrate(config.mp3_bitrate);
        Self {
            assembler: Arc::new(assembler),
            audio: Arc::new(audio),
        }
    }

    /// Build Gemini and Fish Audio clients from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let gemini_key = config.gemini_api_key.as_ref().ok_or_else(|| {
            ScriptcastError::Config(
                "Gemini API key not set. Set GEMINI_API_KEY environment variable.".to_string(),
            )
        })?;
        let fish_key = config.fish_api_key.as_ref().ok_or_else(|| {
            ScriptcastError::Config(
                "Fish Audio API key not set. Set FISH_API_KEY environment variable.".to_string(),
            )
        })?;

        let generator = GeminiClient::new(gemini_key.clone())
            .with_model(config.text_model.clone())
            .with_base_url(config.gemini_base_url.clone());
        let synthesizer = FishAudioClient::new(fish_key.clone())
            .with_model(config.fish_model.clone())
            .with_base_url(config.fish_base_url.clone());

        Ok(Self::new(Arc::new(generator), Arc::new(synthesizer), config))
    }
}

/// Topic-to-audio request: script options plus audio overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRequest {
    #[serde(flatten)]
    pub script: ScriptRequest,
    #[serde(default)]
    pub format: Option<AudioFormat>,
    #[serde(default)]
    pub chunk_size_chars: Option<usize>,
    #[serde(default)]
    pub reference_id: Option<String>,
}

impl PipelineRequest {
    pub fn new(script: ScriptRequest) -> Self {
        Self {
            script,
            format: None,
            chunk_size_chars: None,
            reference_id: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.script.validate()?;
        // Text is not known yet; check the audio overrides on a placeholder.
        AudioRequest {
            chunk_size_chars: self.chunk_size_chars,
            ..AudioRequest::new("-")
        }
        .validate()
    }

    fn audio_request(&self, script: &GeneratedScript) -> AudioRequest {
        AudioRequest {
            text: script.content.clone(),
            format: self.format,
            chunk_size_chars: self.chunk_size_chars,
            reference_id: self.reference_id.clone(),
            title: Some(script.title.clone()),
        }
    }
}

/// Statistics from a topic-to-audio run.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub total_time: Duration,
    pub script_time: Duration,
    pub audio_time: Duration,
    pub chapters: usize,
    pub degraded_chapters: usize,
    pub chunk_count: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub script: GeneratedScript,
    pub audio: AudioResult,
    pub stats: PipelineStats,
}

/// Generate a script for the topic and narrate it.
///
/// Script progress is reported as 0-50% and audio progress as 50-100%.
pub async fn run_pipeline(
    services: &Services,
    request: &PipelineRequest,
    sink: &dyn ProgressSink,
    cancel: &CancelFlag,
) -> Result<PipelineResult> {
    request.validate()?;
    let start_time = Instant::now();

    info!(
        "Stage 1/2: Writing {} minute script about \"{}\"",
        request.script.duration_minutes, request.script.topic
    );
    let script = services
        .assembler
        .generate(&request.script, &ScaledSink::new(sink, 0, 50), cancel)
        .await?;
    let script_time = start_time.elapsed();

    if cancel.is_cancelled() {
        return Err(ScriptcastError::Cancelled);
    }

    info!("Stage 2/2: Narrating {} words", script.word_count);
    let audio_start = Instant::now();
    let audio = services
        .audio
        .run(
            &request.audio_request(&script),
            &ScaledSink::new(sink, 50, 100),
            cancel,
        )
        .await?;
    let audio_time = audio_start.elapsed();

    let stats = PipelineStats {
        total_time: start_time.elapsed(),
        script_time,
        audio_time,
        chapters: script.chapter_stats.as_ref().map_or(0, Vec::len),
        degraded_chapters: script.degraded_chapters(),
        chunk_count: audio.chunk_count,
    };

    Ok(PipelineResult {
        script,
        audio,
        stats,
    })
}

/// Renders progress events on a terminal progress bar.
pub struct ProgressBarSink {
    bar: ProgressBar,
}

impl ProgressBarSink {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    pub fn finish(&self, message: impl Into<String>) {
        self.bar.finish_with_message(message.into());
    }

    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

impl Default for ProgressBarSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ProgressBarSink {
    fn emit(&self, event: ProgressEvent) {
        self.bar.set_position(event.progress as u64);
        self.bar.set_message(event.message);
        if event.stage == Stage::Error {
            self.bar.abandon();
        }
    }
}

pub fn print_script_summary(script: &GeneratedScript) {
    println!();
    println!("  Title:      {}", script.title);
    println!("  Words:      {}", script.word_count);
    println!(
        "  Duration:   ~{:.1} min spoken",
        script.estimated_duration_minutes
    );
    if let Some(ref stats) = script.chapter_stats {
        println!("  Chapters:   {}", stats.len());
        for chapter in stats {
            let mark = if chapter.passed_validation { "✓" } else { "!" };
            println!(
                "    {} {:>2}. {} ({} / ~{} words, {} attempt{})",
                mark,
                chapter.chapter_number,
                chapter.title,
                chapter.word_count,
                chapter.expected_word_count,
                chapter.attempts,
                if chapter.attempts == 1 { "" } else { "s" }
            );
        }
    }
    if let Some(ref path) = script.file_path {
        println!("  Saved to:   {}", path.display());
    }
}

pub fn print_audio_summary(audio: &AudioResult) {
    println!();
    println!("  Output:     {}", audio.output_path.display());
    println!(
        "  Size:       {:.2} MB ({})",
        audio.file_size_bytes as f64 / (1024.0 * 1024.0),
        audio.format
    );
    println!("  Chunks:     {}", audio.chunk_count);
    println!(
        "  Duration:   ~{:.0}s",
        audio.estimated_duration_seconds
    );
}

/// Print a summary of the pipeline results.
pub fn print_summary(result: &PipelineResult) {
    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("                      Narration Complete                        ");
    println!("═══════════════════════════════════════════════════════════════");
    print_script_summary(&result.script);
    print_audio_summary(&result.audio);
    println!();
    println!("  Timing:");
    println!(
        "    Script:      {:.2}s",
        result.stats.script_time.as_secs_f64()
    );
    println!(
        "    Audio:       {:.2}s ({} chunks)",
        result.stats.audio_time.as_secs_f64(),
        result.stats.chunk_count
    );
    println!(
        "    Total:       {:.2}s",
        result.stats.total_time.as_secs_f64()
    );
    if result.stats.degraded_chapters > 0 {
        println!();
        println!(
            "  Note: {} chapter(s) were kept after failing validation",
            result.stats.degraded_chapters
        );
    }
    println!();
    println!("═══════════════════════════════════════════════════════════════");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_keys() {
        let err = match Services::from_config(&Config::default()) {
            Ok(_) => panic!("expected a config error"),
            Err(e) => e,
        };
        assert!(matches!(err, ScriptcastError::Config(_)));

        let config = Config {
            gemini_api_key: Some("g".to_string()),
            fish_api_key: Some("f".to_string()),
            ..Config::default()
        };
        assert!(Services::from_config(&config).is_ok());
    }

    #[test]
    fn test_pipeline_request_json() {
        let request: PipelineRequest = serde_json::from_str(
            r#"{"topic":"Tea","durationMinutes":3,"tone":"casual","format":"wav","chunkSizeChars":1500}"#,
        )
        .unwrap();
        assert_eq!(request.script.topic, "Tea");
        assert_eq!(request.script.tone, crate::script::Tone::Casual);
        assert_eq!(request.format, Some(AudioFormat::Wav));
        assert_eq!(request.chunk_size_chars, Some(1500));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_pipeline_request_rejects_tiny_chunks() {
        let mut request = PipelineRequest::new(ScriptRequest::new("Tea", 3));
        request.chunk_size_chars = Some(10);
        assert!(matches!(
            request.validate(),
            Err(ScriptcastError::Validation(_))
        ));
    }
}
