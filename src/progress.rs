//! Progress reporting and cooperative cancellation.
//!
//! Long-running work writes [`ProgressEvent`]s into a [`ProgressSink`]. Sinks
//! never block and never fail, so generation keeps going whether or not
//! anything is draining the events.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Stage tags shared by progress events and job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Starting,
    Planning,
    Generating,
    ChapterStart,
    ChapterComplete,
    Processing,
    ChunkStart,
    ChunkComplete,
    Combining,
    Complete,
    Error,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Starting => "starting",
            Stage::Planning => "planning",
            Stage::Generating => "generating",
            Stage::ChapterStart => "chapter_start",
            Stage::ChapterComplete => "chapter_complete",
            Stage::Processing => "processing",
            Stage::ChunkStart => "chunk_start",
            Stage::ChunkComplete => "chunk_complete",
            Stage::Combining => "combining",
            Stage::Complete => "complete",
            Stage::Error => "error",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub stage: Stage,
    /// Percent complete, 0-100.
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

impl ProgressEvent {
    pub fn new(stage: Stage, progress: u8, message: impl Into<String>) -> Self {
        Self {
            stage,
            progress: progress.min(100),
            message: message.into(),
            current: None,
            total: None,
        }
    }

    /// Attach a `current of total` position (chunk or chapter index).
    pub fn at(mut self, current: usize, total: usize) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self
    }
}

/// Receives progress from generation and synthesis.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// A closed receiver just drops events.
impl ProgressSink for UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

/// Maps an inner 0-100 progress range onto `[start, end]` of an outer one.
pub struct ScaledSink<'a> {
    inner: &'a dyn ProgressSink,
    start: u8,
    end: u8,
}

impl<'a> ScaledSink<'a> {
    pub fn new(inner: &'a dyn ProgressSink, start: u8, end: u8) -> Self {
        Self {
            inner,
            start: start.min(100),
            end: end.clamp(start.min(100), 100),
        }
    }
}

impl ProgressSink for ScaledSink<'_> {
    fn emit(&self, mut event: ProgressEvent) {
        let span = (self.end - self.start) as u32;
        event.progress = self.start + ((event.progress.min(100) as u32 * span + 50) / 100) as u8;
        self.inner.emit(event);
    }
}

/// Cooperative cancellation shared between a caller and running work.
///
/// The default flag is never tripped, so work runs to completion unless a
/// caller explicitly opts in by keeping a clone and calling [`cancel`].
///
/// [`cancel`]: CancelFlag::cancel
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
