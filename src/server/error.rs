use crate::error::ScriptcastError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::warn;

/// An error rendered as `{success: false, error: {code, message, details}}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_ERROR",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<ScriptcastError> for ApiError {
    fn from(err: ScriptcastError) -> Self {
        let (status, code) = match &err {
            ScriptcastError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ScriptcastError::ContentPolicy(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "CONTENT_POLICY")
            }
            ScriptcastError::Generation(_) => (StatusCode::BAD_GATEWAY, "GENERATION_ERROR"),
            ScriptcastError::Synthesis(_) => (StatusCode::BAD_GATEWAY, "SYNTHESIS_ERROR"),
            ScriptcastError::Cancelled => (StatusCode::CONFLICT, "CANCELLED"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let message = match &err {
            ScriptcastError::Validation(msg) => msg.clone(),
            other => other.to_string(),
        };
        Self {
            status,
            code,
            message,
            details: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!("{} ({}): {}", self.code, self.status, self.message);
        }
        let body = json!({
            "success": false,
            "error": {
                "code": self.code,
                "message": self.message,
                "details": self.details,
            }
        });
        (self.status, Json(body)).into_response()
    }
}
