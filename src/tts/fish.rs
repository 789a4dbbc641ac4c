//! Speech synthesis using the Fish Audio TTS API.

use crate::error::SynthesisError;
use crate::tts::{AudioStream, SpeechSynthesizer, SynthesisOptions};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.fish.audio";

/// Synthesis of a long chunk can take minutes.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Fish Audio API client.
pub struct FishAudioClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: Option<String>,
}

impl FishAudioClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Select a backend model, sent as the `model` header.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/tts", self.base_url)
    }
}

#[derive(Serialize, Debug)]
struct TtsRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_id: Option<&'a str>,
    format: String,
    mp3_bitrate: u32,
    chunk_length: u32,
    normalize: bool,
    latency: &'static str,
}

impl<'a> TtsRequest<'a> {
    fn new(text: &'a str, options: &'a SynthesisOptions) -> Self {
        Self {
            text,
            reference_id: options
                .reference_id
                .as_deref()
                .filter(|id| !id.trim().is_empty()),
            format: options.format.to_string(),
            mp3_bitrate: options.mp3_bitrate,
            chunk_length: options.chunk_length,
            normalize: options.normalize,
            latency: options.latency.as_str(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for FishAudioClient {
    async fn synthesize(
        &self,
        text: &str,
        options: &SynthesisOptions,
    ) -> Result<AudioStream, SynthesisError> {
        let body = TtsRequest::new(text, options);
        debug!(
            "Requesting {} synthesis of {} chars (voice: {})",
            body.format,
            text.chars().count(),
            body.reference_id.unwrap_or("default")
        );

        let mut request = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body);
        if let Some(ref model) = self.model {
            request = request.header("model", model);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!("Fish Audio response status: {}", status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(SynthesisError::from));
        Ok(stream.boxed())
    }

    fn name(&self) -> &'static str {
        "fish-audio"
    }
}
