//! HTTP API: synchronous JSON endpoints plus SSE job streams.

mod error;
mod handlers;

pub use error::ApiError;

use crate::config::Config;
use crate::error::Result;
use crate::jobs::{InMemoryJobStore, JobTracker};
use crate::pipeline::Services;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub tracker: JobTracker,
}

impl AppState {
    pub fn new(services: Services, tracker: JobTracker) -> Self {
        Self { services, tracker }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let tracker = JobTracker::new(
            Arc::new(InMemoryJobStore::default()),
            Duration::from_secs(config.job_max_age_minutes * 60),
        );
        Ok(Self::new(Services::from_config(config)?, tracker))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/scripts/preview", post(handlers::preview_script))
        .route("/api/scripts/generate", post(handlers::generate_script))
        .route("/api/audio/generate", post(handlers::generate_audio))
        .route("/api/audio/generate-stream", post(handlers::generate_audio_stream))
        .route("/api/pipeline/stream", post(handlers::pipeline_stream))
        .route("/api/jobs/{id}", get(handlers::job_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind, start the job sweeper and serve until the process exits.
pub async fn serve(config: &Config) -> Result<()> {
    let state = AppState::from_config(config)?;
    let sweeper = state
        .tracker
        .spawn_sweeper(Duration::from_secs(config.sweep_interval_secs));

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    let served = axum::serve(listener, router(state)).await;
    sweeper.abort();
    served?;
    Ok(())
}
