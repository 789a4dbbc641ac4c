//! Client for a remote scriptcast server.
//!
//! Jobs are started over an SSE stream. If the stream ends before a terminal
//! event arrives, the client falls back to polling the job status endpoint.

use crate::audio::AudioRequest;
use crate::error::{Result, ScriptcastError};
use crate::jobs::{JobEvent, JobResult, JobSnapshot};
use crate::pipeline::PipelineRequest;
use crate::progress::{ProgressEvent, ProgressSink, Stage};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

pub struct RemoteClient {
    client: Client,
    base_url: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Run topic-to-audio on the server.
    pub async fn run_pipeline(
        &self,
        request: &PipelineRequest,
        sink: &dyn ProgressSink,
    ) -> Result<JobResult> {
        self.stream_job("/api/pipeline/stream", request, sink).await
    }

    /// Narrate text on the server.
    pub async fn run_audio(&self, request: &AudioRequest, sink: &dyn ProgressSink) -> Result<JobResult> {
        self.stream_job("/api/audio/generate-stream", request, sink)
            .await
    }

    /// Fetch a job's status. `Ok(None)` means the server does not know it.
    pub async fn get_job(&self, id: &str) -> Result<Option<JobSnapshot>> {
        let response = self
            .client
            .get(self.url(&format!("/api/jobs/{}", id)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_envelope(response).await.map(Some)
    }

    /// Poll until the job finishes or the poll timeout elapses.
    pub async fn poll_job(&self, id: &str, sink: &dyn ProgressSink) -> Result<JobResult> {
        let deadline = Instant::now() + self.poll_timeout;
        let mut last_progress = None;

        loop {
            match self.get_job(id).await {
                Ok(Some(job)) if job.is_complete => return finished(job),
                Ok(Some(job)) => {
                    if last_progress != Some(job.progress) {
                        last_progress = Some(job.progress);
                        sink.emit(ProgressEvent::new(
                            job.status,
                            job.progress,
                            job.message.unwrap_or_else(|| job.status.to_string()),
                        ));
                    }
                }
                Ok(None) => {
                    return Err(ScriptcastError::Remote(format!("Job {} not found", id)));
                }
                Err(e) => warn!("Polling job {} failed: {}", id, e),
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(ScriptcastError::Remote(format!(
                    "Timed out after {:?} waiting for job {}",
                    self.poll_timeout, id
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn stream_job<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        sink: &dyn ProgressSink,
    ) -> Result<JobResult> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        if !response.status().is_success() {
            return Err(read_envelope::<serde_json::Value>(response)
                .await
                .err()
                .unwrap_or_else(|| ScriptcastError::Remote("Server rejected the request".into())));
        }

        let mut job_id: Option<String> = None;
        let mut frames = FrameBuffer::default();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Event stream interrupted: {}", e);
                    break;
                }
            };

            for event in frames.push(&bytes) {
                job_id.get_or_insert_with(|| event.job_id.clone());

                match event.stage {
                    Stage::Complete => {
                        return event.result.ok_or_else(|| {
                            ScriptcastError::Remote("Job completed without a result".into())
                        });
                    }
                    Stage::Error => {
                        return Err(ScriptcastError::Remote(
                            event.error.unwrap_or_else(|| "Unknown error".into()),
                        ));
                    }
                    stage => sink.emit(ProgressEvent {
                        stage,
                        progress: event.progress.unwrap_or(0),
                        message: event.message.unwrap_or_default(),
                        current: event.current,
                        total: event.total,
                    }),
                }
            }
        }

        match job_id {
            Some(id) => {
                warn!("Lost event stream for job {}, polling for status", id);
                self.poll_job(&id, sink).await
            }
            None => Err(ScriptcastError::Remote(
                "Connection closed before the job started".into(),
            )),
        }
    }
}

/// Accumulates raw stream bytes and yields complete `\n\n`-terminated events.
///
/// Frames are decoded only once complete, so a character split across
/// network reads is never mangled.
#[derive(Default)]
struct FrameBuffer {
    pending: Vec<u8>,
}

impl FrameBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<JobEvent> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(end) = self.pending.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.pending.drain(..end + 2).collect();
            if let Some(event) = parse_frame(&frame) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_frame(frame: &[u8]) -> Option<JobEvent> {
    let frame = match std::str::from_utf8(frame) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Skipping event that is not UTF-8: {}", e);
            return None;
        }
    };
    let payload: String = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .collect();
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str(&payload) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("Skipping unparseable event {:?}: {}", payload, e);
            None
        }
    }
}

fn finished(job: JobSnapshot) -> Result<JobResult> {
    match job.result {
        Some(result) => Ok(result),
        None => Err(ScriptcastError::Remote(
            job.error.unwrap_or_else(|| format!("Job {} ended without a result", job.id)),
        )),
    }
}

async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let text = response.text().await?;
    let envelope: Envelope<T> = serde_json::from_str(&text).map_err(|_| {
        ScriptcastError::Remote(format!("Unexpected response ({}): {}", status, text))
    })?;
    if let Some(error) = envelope.error {
        return Err(ScriptcastError::Remote(format!(
            "{}: {}",
            error.code, error.message
        )));
    }
    envelope
        .data
        .ok_or_else(|| ScriptcastError::Remote(format!("Empty response ({})", status)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{NoopSink, Stage};
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for Recorder {
        fn emit(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn audio_json() -> Value {
        json!({
            "outputPath": "output/narration.mp3",
            "fileSizeBytes": 2048,
            "estimatedDurationSeconds": 24.0,
            "chunkCount": 2,
            "format": "mp3"
        })
    }

    fn sse(events: &[Value]) -> String {
        events
            .iter()
            .map(|e| format!("data: {}\n\n", e))
            .collect()
    }

    fn snapshot(status: &str, progress: u8, result: Option<Value>) -> Value {
        let mut data = json!({
            "id": "job-1",
            "kind": "audio",
            "status": status,
            "progress": progress,
            "startTime": "2026-10-18T10:00:00Z",
            "lastUpdate": "2026-10-18T10:01:00Z",
            "isComplete": status == "complete" || status == "error"
        });
        if let Some(result) = result {
            data["result"] = result;
        }
        json!({"success": true, "data": data})
    }

    async fn mount_stream(server: &MockServer, body: String) {
        Mock::given(method("POST"))
            .and(path("/api/audio/generate-stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(server)
            .await;
    }

    fn client(server: &MockServer) -> RemoteClient {
        RemoteClient::new(server.uri())
            .with_poll_interval(Duration::from_millis(10))
            .with_poll_timeout(Duration::from_millis(500))
    }

    #[test]
    fn test_parse_frame() {
        let event = parse_frame(b"data: {\"type\":\"chunk_start\",\"jobId\":\"j\",\"progress\":30}\n\n").unwrap();
        assert_eq!(event.stage, Stage::ChunkStart);
        assert_eq!(event.progress, Some(30));
        assert!(parse_frame(b": keep-alive\n\n").is_none());
        assert!(parse_frame(b"data: not json\n\n").is_none());
        assert!(parse_frame(b"data: \xff\xfe\n\n").is_none());
    }

    #[test]
    fn test_frame_split_inside_character() {
        let frame = sse(&[json!({
            "type": "complete",
            "jobId": "job-1",
            "result": {
                "outputPath": "out/café.mp3",
                "fileSizeBytes": 10,
                "estimatedDurationSeconds": 1.0,
                "chunkCount": 1,
                "format": "mp3"
            }
        })]);
        let bytes = frame.as_bytes();
        let split = frame.find('é').unwrap() + 1;

        let mut frames = FrameBuffer::default();
        assert!(frames.push(&bytes[..split]).is_empty());
        let events = frames.push(&bytes[split..]);

        assert_eq!(events.len(), 1);
        let result = events[0].result.as_ref().unwrap();
        assert_eq!(result.audio().output_path, PathBuf::from("out/café.mp3"));
    }

    #[test]
    fn test_frames_across_reads() {
        let body = sse(&[
            json!({"type": "starting", "jobId": "job-1", "progress": 0}),
            json!({"type": "planning", "jobId": "job-1", "progress": 1}),
        ]);
        let mut frames = FrameBuffer::default();
        let mut stages = Vec::new();
        for piece in body.as_bytes().chunks(7) {
            stages.extend(frames.push(piece).into_iter().map(|e| e.stage));
        }
        assert_eq!(stages, [Stage::Starting, Stage::Planning]);
    }

    #[tokio::test]
    async fn test_stream_to_completion() {
        let server = MockServer::start().await;
        mount_stream(
            &server,
            sse(&[
                json!({"type": "starting", "jobId": "job-1", "progress": 0, "message": "Starting"}),
                json!({"type": "chunk_start", "jobId": "job-1", "progress": 45, "message": "Chunk 2", "current": 2, "total": 2}),
                json!({"type": "complete", "jobId": "job-1", "progress": 100, "result": audio_json()}),
            ]),
        )
        .await;

        let recorder = Recorder::default();
        let result = client(&server)
            .run_audio(&AudioRequest::new("Hello."), &recorder)
            .await
            .unwrap();

        assert_eq!(result.audio().chunk_count, 2);
        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].stage, Stage::ChunkStart);
        assert_eq!(events[1].current, Some(2));
    }

    #[tokio::test]
    async fn test_error_event_fails() {
        let server = MockServer::start().await;
        mount_stream(
            &server,
            sse(&[
                json!({"type": "starting", "jobId": "job-1", "progress": 0}),
                json!({"type": "error", "jobId": "job-1", "error": "Speech API error (500): down"}),
            ]),
        )
        .await;

        let err = client(&server)
            .run_audio(&AudioRequest::new("Hello."), &NoopSink)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Speech API error (500)"));
    }

    #[tokio::test]
    async fn test_dropped_stream_falls_back_to_polling() {
        let server = MockServer::start().await;
        mount_stream(
            &server,
            sse(&[json!({"type": "starting", "jobId": "job-1", "progress": 0})]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(snapshot(
                "complete",
                100,
                Some(audio_json()),
            )))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server)
            .run_audio(&AudioRequest::new("Hello."), &NoopSink)
            .await
            .unwrap();
        assert_eq!(result.audio().file_size_bytes, 2048);
    }

    #[tokio::test]
    async fn test_polling_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(snapshot("chunk_start", 30, None)))
            .mount(&server)
            .await;

        let recorder = Recorder::default();
        let err = RemoteClient::new(server.uri())
            .with_poll_interval(Duration::from_millis(10))
            .with_poll_timeout(Duration::from_millis(60))
            .poll_job("job-1", &recorder)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Timed out"));
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "success": false,
                "error": {"code": "NOT_FOUND", "message": "Job missing not found", "details": null}
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(client.get_job("missing").await.unwrap().is_none());
        let err = client.poll_job("missing", &NoopSink).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_rejected_request_surfaces_error_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/pipeline/stream"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "error": {"code": "VALIDATION_ERROR", "message": "Topic is required", "details": null}
            })))
            .mount(&server)
            .await;

        let request = PipelineRequest::new(crate::script::ScriptRequest::new("", 3));
        let err = client(&server)
            .run_pipeline(&request, &NoopSink)
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptcastError::Remote(_)));
        assert!(err.to_string().contains("VALIDATION_ERROR: Topic is required"));
    }

    #[tokio::test]
    async fn test_stream_closed_before_start() {
        let server = MockServer::start().await;
        mount_stream(&server, String::new()).await;

        let err = client(&server)
            .run_audio(&AudioRequest::new("Hello."), &NoopSink)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("before the job started"));
    }
}
