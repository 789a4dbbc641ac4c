//! Text generation using the Gemini Generative AI API.

use crate::error::{Result, ScriptcastError};
use crate::llm::{CompletionOptions, TextGenerator};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Long chapters can take a while to come back.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Finish reasons that mean the provider refused to produce content.
const POLICY_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

/// Text generator backed by Google Gemini.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    /// Create a new Gemini client with the given API key.
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            model: "gemini-2.0-flash".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Set a different model (e.g., "gemini-1.5-pro").
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a different API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    /// Pull the generated text out of a response, detecting policy refusals.
    fn extract_text(response: GeminiResponse) -> Result<String> {
        if let Some(error) = response.error {
            return Err(ScriptcastError::Generation(format!(
                "Gemini error: {}",
                error.message
            )));
        }

        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ScriptcastError::ContentPolicy(reason));
        }

        let candidate = response
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ScriptcastError::Generation("Gemini returned no candidates".to_string()))?;

        if let Some(ref reason) = candidate.finish_reason {
            if POLICY_FINISH_REASONS.contains(&reason.as_str()) {
                return Err(ScriptcastError::ContentPolicy(reason.clone()));
            }
        }

        let text: String = candidate
            .content
            .and_then(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(ScriptcastError::Generation(
                "Gemini returned an empty response".to_string(),
            ));
        }

        Ok(text.trim().to_string())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<GeminiError>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiResponseContent {
    parts: Option<Vec<GeminiResponsePart>>,
}

#[derive(Deserialize, Debug)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

#[derive(Deserialize, Debug)]
struct GeminiErrorEnvelope {
    error: GeminiError,
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn complete(&self, prompt: &str, options: CompletionOptions) -> Result<String> {
        debug!(
            "Requesting completion from {} ({} prompt chars, max {} tokens)",
            self.model,
            prompt.len(),
            options.max_tokens
        );

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: options.max_tokens,
                temperature: options.temperature,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ScriptcastError::Generation(format!("Gemini request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScriptcastError::Generation(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            let message = serde_json::from_str::<GeminiErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(ScriptcastError::Generation(format!(
                "Gemini API error ({}): {}",
                status, message
            )));
        }

        let parsed: GeminiResponse = serde_json::from_str(&body).map_err(|e| {
            ScriptcastError::Generation(format!("Failed to parse Gemini response: {}", e))
        })?;

        let text = Self::extract_text(parsed)?;
        debug!("Gemini returned {} chars", text.len());
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
