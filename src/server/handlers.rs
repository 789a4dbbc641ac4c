use super::{ApiError, AppState};
use crate::audio::{AudioRequest, AudioResult};
use crate::jobs::{JobEvent, JobKind, JobResult, JobSnapshot};
use crate::pipeline::{run_pipeline, PipelineRequest};
use crate::progress::CancelFlag;
use crate::script::{GeneratedScript, ScriptPreview, ScriptRequest};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::info;

/// `{success: true, data}` envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(value)| value).map_err(|rejection| {
        ApiError::validation(rejection.body_text())
            .with_details(json!({ "status": rejection.status().as_u16() }))
    })
}

/// Body of `POST /api/scripts/generate`: request fields plus an optional
/// previously returned outline to generate from.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateScriptBody {
    #[serde(flatten)]
    pub request: ScriptRequest,
    #[serde(default)]
    pub preview: Option<ScriptPreview>,
}

pub async fn health() -> Json<ApiResponse<serde_json::Value>> {
    ok(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn preview_script(
    State(state): State<AppState>,
    payload: Result<Json<ScriptRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<ScriptPreview>>, ApiError> {
    let request = body(payload)?;
    let preview = state.services.assembler.preview(&request).await?;
    Ok(ok(preview))
}

pub async fn generate_script(
    State(state): State<AppState>,
    payload: Result<Json<GenerateScriptBody>, JsonRejection>,
) -> Result<Json<ApiResponse<GeneratedScript>>, ApiError> {
    let GenerateScriptBody { request, preview } = body(payload)?;
    let assembler = &state.services.assembler;
    let sink = crate::progress::NoopSink;
    let cancel = CancelFlag::new();

    let script = match preview {
        Some(preview) => {
            request.validate()?;
            preview.validate()?;
            let reference = request.load_reference_text().await?;
            assembler
                .generate_from_preview(&preview, reference.as_deref(), &sink, &cancel)
                .await?
        }
        None => assembler.generate(&request, &sink, &cancel).await?,
    };
    Ok(ok(script))
}

pub async fn generate_audio(
    State(state): State<AppState>,
    payload: Result<Json<AudioRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<AudioResult>>, ApiError> {
    let request = body(payload)?;
    let result = state
        .services
        .audio
        .run(&request, &crate::progress::NoopSink, &CancelFlag::new())
        .await?;
    Ok(ok(result))
}

pub async fn generate_audio_stream(
    State(state): State<AppState>,
    payload: Result<Json<AudioRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = body(payload)?;
    request.validate()?;

    let audio = state.services.audio.clone();
    let (id, events) = state
        .tracker
        .spawn(JobKind::Audio, move |sink| async move {
            let result = audio.run(&request, &sink, &CancelFlag::new()).await?;
            Ok(JobResult::Audio(result))
        })
        .await;

    info!("Started audio job {}", id);
    Ok(event_stream(events))
}

pub async fn pipeline_stream(
    State(state): State<AppState>,
    payload: Result<Json<PipelineRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = body(payload)?;
    request.validate()?;

    let services = state.services.clone();
    let (id, events) = state
        .tracker
        .spawn(JobKind::Pipeline, move |sink| async move {
            let result = run_pipeline(&services, &request, &sink, &CancelFlag::new()).await?;
            Ok(JobResult::Pipeline {
                script: result.script,
                audio: result.audio,
            })
        })
        .await;

    info!("Started pipeline job {}", id);
    Ok(event_stream(events))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<JobSnapshot>>, ApiError> {
    state
        .tracker
        .get_job(&id)
        .await
        .map(ok)
        .ok_or_else(|| ApiError::not_found(format!("Job {} not found", id)))
}

/// Serialize job events as `data: <json>\n\n` frames.
///
/// Dropping the response only stops delivery; the job itself keeps running.
fn event_stream(events: UnboundedReceiver<JobEvent>) -> Response {
    let stream = UnboundedReceiverStream::new(events).map(|event| {
        let payload = serde_json::to_string(&event).unwrap_or_else(|e| {
            json!({ "type": "error", "jobId": event.job_id, "error": e.to_string() }).to_string()
        });
        Ok::<_, Infallible>(format!("data: {}\n\n", payload))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
