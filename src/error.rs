use thiserror::Error;

/// Failures reported by a speech-synthesis backend.
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Speech API error ({status}): {body}")]
    Upstream { status: u16, body: String },

    #[error("Speech API connection failed: {0}")]
    Network(String),

    #[error("Speech synthesis failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for SynthesisError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() {
            SynthesisError::Network(e.to_string())
        } else if let Some(status) = e.status() {
            SynthesisError::Upstream {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            SynthesisError::Other(e.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum ScriptcastError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Script generation failed: {0}")]
    Generation(String),

    #[error("The request was blocked by the content policy ({0}). Try rephrasing the topic.")]
    ContentPolicy(String),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("Audio processing failed: {0}")]
    AudioProcessing(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Remote job failed: {0}")]
    Remote(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScriptcastError {
    /// Whether retrying the same text-generation call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScriptcastError::Generation(_) | ScriptcastError::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, ScriptcastError>;
