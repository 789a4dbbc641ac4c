//! Joining per-chunk audio files into one artifact.

use crate::config::AudioFormat;
use crate::error::{Result, ScriptcastError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Writes `segments`, in order, into a single file at `output`.
#[async_trait]
pub trait AudioConcatenator: Send + Sync {
    /// Returns the size of the written file in bytes.
    async fn concatenate(&self, segments: &[PathBuf], output: &Path) -> Result<u64>;
}

/// Appends segment bytes verbatim.
///
/// Valid for frame-based streams such as MP3 where each segment is
/// independently decodable. Container formats need their own strategy.
pub struct RawConcatenator;

#[async_trait]
impl AudioConcatenator for RawConcatenator {
    async fn concatenate(&self, segments: &[PathBuf], output: &Path) -> Result<u64> {
        let mut out = File::create(output).await?;
        let mut written = 0u64;
        for segment in segments {
            let mut input = File::open(segment).await?;
            written += tokio::io::copy(&mut input, &mut out).await?;
        }
        out.flush().await?;
        debug!("Concatenated {} segments ({} bytes)", segments.len(), written);
        Ok(written)
    }
}

/// Decodes every WAV segment and re-writes the samples under one RIFF header.
pub struct WavConcatenator;

#[async_trait]
impl AudioConcatenator for WavConcatenator {
    async fn concatenate(&self, segments: &[PathBuf], output: &Path) -> Result<u64> {
        let segments = segments.to_vec();
        let output = output.to_path_buf();
        tokio::task::spawn_blocking(move || concat_wav(&segments, &output))
            .await
            .map_err(|e| ScriptcastError::AudioProcessing(format!("WAV task failed: {}", e)))?
    }
}

fn concat_wav(segments: &[PathBuf], output: &Path) -> Result<u64> {
    let wav_err = |e: hound::Error| ScriptcastError::AudioProcessing(format!("WAV error: {}", e));

    let Some(first) = segments.first() else {
        return Err(ScriptcastError::AudioProcessing(
            "No audio segments to combine".to_string(),
        ));
    };
    let spec = hound::WavReader::open(first).map_err(wav_err)?.spec();
    let mut writer = hound::WavWriter::create(output, spec).map_err(wav_err)?;

    for segment in segments {
        let mut reader = hound::WavReader::open(segment).map_err(wav_err)?;
        if reader.spec() != spec {
            return Err(ScriptcastError::AudioProcessing(format!(
                "Segment {:?} has a different WAV format ({:?} vs {:?})",
                segment,
                reader.spec(),
                spec
            )));
        }
        match spec.sample_format {
            hound::SampleFormat::Int => {
                for sample in reader.samples::<i32>() {
                    writer.write_sample(sample.map_err(wav_err)?).map_err(wav_err)?;
                }
            }
            hound::SampleFormat::Float => {
                for sample in reader.samples::<f32>() {
                    writer.write_sample(sample.map_err(wav_err)?).map_err(wav_err)?;
                }
            }
        }
    }

    writer.finalize().map_err(wav_err)?;
    Ok(std::fs::metadata(output)?.len())
}

/// Pick the concatenation strategy for a format.
pub fn concatenator_for(format: AudioFormat) -> Box<dyn AudioConcatenator> {
    match format {
        AudioFormat::Wav => Box::new(WavConcatenator),
        AudioFormat::Mp3 | AudioFormat::Opus | AudioFormat::Pcm => Box::new(RawConcatenator),
    }
}
