pub mod concat;
pub mod pipeline;

pub use concat::{concatenator_for, AudioConcatenator, RawConcatenator, WavConcatenator};
pub use pipeline::{AudioPipeline, AudioRequest, CHUNK_OVERLAP_CHARS, MIN_CHUNK_SIZE_CHARS};

use crate::config::AudioFormat;
use crate::script::SPOKEN_WORDS_PER_MINUTE;
use crate::text::{round2, word_count};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One synthesized piece of a multi-chunk run, spooled to a temp file.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub index: usize,
    pub source_text: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// The final artifact of an audio pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioResult {
    pub output_path: PathBuf,
    pub file_size_bytes: u64,
    pub estimated_duration_seconds: f64,
    pub chunk_count: usize,
    pub format: AudioFormat,
}

/// Spoken duration of `text` in seconds at 150 words per minute.
pub fn estimate_duration_seconds(text: &str) -> f64 {
    round2(word_count(text) as f64 / SPOKEN_WORDS_PER_MINUTE * 60.0)
}
