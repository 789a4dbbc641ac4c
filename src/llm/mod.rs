pub mod gemini;

pub use gemini::GeminiClient;

use crate::error::Result;
use async_trait::async_trait;

/// Sampling parameters for a single completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.7,
        }
    }
}

impl CompletionOptions {
    /// Token budget scaled to a target word count.
    pub fn for_words(target_words: u32) -> Self {
        Self {
            max_tokens: (target_words.saturating_mul(2)).clamp(1024, 8192),
            ..Self::default()
        }
    }
}

/// A text-generation backend.
///
/// Implementations return `ScriptcastError::ContentPolicy` when the provider
/// refuses the prompt, and `ScriptcastError::Generation` for other failures.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str, options: CompletionOptions) -> Result<String>;
    fn name(&self) -> &'static str;
}
