pub mod fish;

pub use fish::FishAudioClient;

use crate::config::AudioFormat;
use crate::error::SynthesisError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Streamed audio body from a synthesis call.
pub type AudioStream = BoxStream<'static, std::result::Result<Bytes, SynthesisError>>;

/// Latency/quality trade-off requested from the speech service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatencyMode {
    #[default]
    Normal,
    Balanced,
}

impl LatencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LatencyMode::Normal => "normal",
            LatencyMode::Balanced => "balanced",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOptions {
    /// Custom voice id; `None` selects the service's default voice.
    pub reference_id: Option<String>,
    pub format: AudioFormat,
    pub mp3_bitrate: u32,
    /// Hint for the service's own internal text segmentation.
    pub chunk_length: u32,
    pub normalize: bool,
    pub latency: LatencyMode,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            reference_id: None,
            format: AudioFormat::default(),
            mp3_bitrate: 128,
            chunk_length: 200,
            normalize: true,
            latency: LatencyMode::default(),
        }
    }
}

/// A text-to-speech backend.
///
/// One call per text chunk. Implementations do not retry; a failed chunk
/// aborts the surrounding pipeline run.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        options: &SynthesisOptions,
    ) -> std::result::Result<AudioStream, SynthesisError>;

    fn name(&self) -> &'static str;
}
