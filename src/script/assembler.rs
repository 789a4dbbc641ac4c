use super::planner::ChapterPlanner;
use super::storage::ScriptStore;
use super::validator::{validate_chapter, ValidationReport};
use super::{
    estimate_spoken_minutes, ChapterStats, GeneratedScript, ScriptPreview, ScriptRequest,
    LONG_FORM_THRESHOLD_MINUTES,
};
use crate::error::{Result, ScriptcastError};
use crate::llm::{CompletionOptions, TextGenerator};
use crate::progress::{CancelFlag, ProgressEvent, ProgressSink, Stage};
use crate::text::word_count;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Characters of the previous chapter handed to the next one for continuity.
const CONTEXT_TAIL_CHARS: usize = 500;

/// Retry settings for per-chapter generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), doubling each time.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

/// Result of generating one chapter with retries.
#[derive(Debug)]
pub enum ChapterOutcome {
    /// Passed validation on attempt `attempts`.
    Accepted {
        text: String,
        report: ValidationReport,
        attempts: u32,
    },
    /// Every attempt failed validation; the most recent text is used anyway.
    AcceptedDegraded {
        text: String,
        report: ValidationReport,
        reason: String,
        attempts: u32,
    },
    /// The service never produced text.
    Failed {
        error: ScriptcastError,
        attempts: u32,
    },
}

/// Turns requests or outlines into finished, persisted scripts.
pub struct ScriptAssembler {
    generator: Arc<dyn TextGenerator>,
    planner: ChapterPlanner,
    store: Arc<dyn ScriptStore>,
    retry: RetryPolicy,
}

impl ScriptAssembler {
    pub fn new(generator: Arc<dyn TextGenerator>, store: Arc<dyn ScriptStore>) -> Self {
        Self {
            planner: ChapterPlanner::new(generator.clone()),
            generator,
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate the request and plan its outline.
    ///
    /// Unlike [`ChapterPlanner::plan`], an outline without chapters is an error.
    pub async fn preview(&self, request: &ScriptRequest) -> Result<ScriptPreview> {
        request.validate()?;
        let reference = request.load_reference_text().await?;
        let preview = self.planner.plan(request, reference.as_deref()).await?;
        if preview.chapters.is_empty() {
            return Err(empty_outline_error());
        }
        Ok(preview)
    }

    /// Generate a script, choosing the direct or chapter-based path.
    ///
    /// Requests of `LONG_FORM_THRESHOLD_MINUTES` or more always go through
    /// chapters, since a single call cannot reliably produce that much text.
    pub async fn generate(
        &self,
        request: &ScriptRequest,
        sink: &dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<GeneratedScript> {
        request.validate()?;
        let reference = request.load_reference_text().await?;

        if !request.requires_chapters() {
            return self
                .direct(request, reference.as_deref(), sink, cancel)
                .await;
        }

        self.chaptered(request, reference.as_deref(), sink, cancel)
            .await
    }

    /// Single-call generation with no chapter structure.
    ///
    /// Requests of `LONG_FORM_THRESHOLD_MINUTES` or more still go through
    /// chapters.
    pub async fn generate_direct(
        &self,
        request: &ScriptRequest,
        sink: &dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<GeneratedScript> {
        request.validate()?;
        let reference = request.load_reference_text().await?;
        if request.duration_minutes >= LONG_FORM_THRESHOLD_MINUTES {
            return self
                .chaptered(request, reference.as_deref(), sink, cancel)
                .await;
        }
        self.direct(request, reference.as_deref(), sink, cancel)
            .await
    }

    /// Generate every chapter of a previously planned outline, in order.
    pub async fn generate_from_preview(
        &self,
        preview: &ScriptPreview,
        reference: Option<&str>,
        sink: &dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<GeneratedScript> {
        preview.validate()?;
        self.from_preview(preview, reference, sink, cancel).await
    }

    async fn direct(
        &self,
        request: &ScriptRequest,
        reference: Option<&str>,
        sink: &dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<GeneratedScript> {
        if cancel.is_cancelled() {
            return Err(ScriptcastError::Cancelled);
        }

        let target_words = request.target_word_count();
        info!(
            "Generating {} minute script directly (~{} words)",
            request.duration_minutes, target_words
        );
        sink.emit(ProgressEvent::new(Stage::Generating, 10, "Writing script"));

        let prompt = direct_prompt(request, reference);
        let text = self
            .generator
            .complete(&prompt, CompletionOptions::for_words(target_words))
            .await?;
        let content = clean_generated_text(&text);

        let title = request.topic.trim().to_string();
        self.finish(request.topic.trim(), &title, content, None, sink)
            .await
    }

    async fn chaptered(
        &self,
        request: &ScriptRequest,
        reference: Option<&str>,
        sink: &dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<GeneratedScript> {
        info!(
            "Using chapter-based generation for {} minute script",
            request.duration_minutes
        );
        sink.emit(ProgressEvent::new(Stage::Planning, 2, "Planning chapters"));
        let preview = self.planner.plan(request, reference).await?;
        self.from_preview(&preview, reference, sink, cancel).await
    }

    async fn from_preview(
        &self,
        preview: &ScriptPreview,
        reference: Option<&str>,
        sink: &dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<GeneratedScript> {
        if preview.chapters.is_empty() {
            return Err(empty_outline_error());
        }

        let started = Instant::now();
        let total = preview.chapters.len();
        let mut texts: Vec<String> = Vec::with_capacity(total);
        let mut stats: Vec<ChapterStats> = Vec::with_capacity(total);

        for (index, chapter) in preview.chapters.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ScriptcastError::Cancelled);
            }

            sink.emit(
                ProgressEvent::new(
                    Stage::ChapterStart,
                    chapter_progress(index, total),
                    format!("Writing chapter {}: {}", chapter.number, chapter.title),
                )
                .at(index + 1, total),
            );

            let previous = texts.last().map(String::as_str);
            let outcome = self
                .generate_chapter_with_retry(preview, index, previous, reference)
                .await;

            let (text, report, attempts, degraded_reason) = match outcome {
                ChapterOutcome::Accepted {
                    text,
                    report,
                    attempts,
                } => (text, report, attempts, None),
                ChapterOutcome::AcceptedDegraded {
                    text,
                    report,
                    reason,
                    attempts,
                } => {
                    warn!(
                        "Accepting chapter {} after {} failed validations: {}",
                        chapter.number, attempts, reason
                    );
                    (text, report, attempts, Some(reason))
                }
                ChapterOutcome::Failed { error, attempts } => {
                    warn!(
                        "Chapter {} failed after {} attempts: {}",
                        chapter.number, attempts, error
                    );
                    return Err(error);
                }
            };

            stats.push(ChapterStats {
                chapter_number: chapter.number,
                title: chapter.title.clone(),
                word_count: report.word_count,
                expected_word_count: report.expected_word_count,
                passed_validation: report.valid,
                attempts,
                degraded_reason,
            });
            texts.push(text);

            sink.emit(
                ProgressEvent::new(
                    Stage::ChapterComplete,
                    chapter_progress(index + 1, total),
                    format!("Finished chapter {} of {}", index + 1, total),
                )
                .at(index + 1, total),
            );
        }

        info!(
            "Generated {} chapters in {:.1}s",
            total,
            started.elapsed().as_secs_f64()
        );

        let content = texts.join("\n\n");
        self.finish(&preview.topic, &preview.title, content, Some(stats), sink)
            .await
    }

    /// Generate one chapter, retrying with exponential backoff on validation
    /// failures and retryable service errors.
    pub async fn generate_chapter_with_retry(
        &self,
        preview: &ScriptPreview,
        index: usize,
        previous_text: Option<&str>,
        reference: Option<&str>,
    ) -> ChapterOutcome {
        let chapter = &preview.chapters[index];
        let minutes = preview.estimated_duration_minutes as f64 / preview.chapters.len() as f64;
        let prompt = chapter_prompt(preview, index, minutes, previous_text, reference);
        let target_words = super::validator::expected_words(minutes) as u32;
        let options = CompletionOptions::for_words(target_words);
        let max_attempts = self.retry.max_attempts.max(1);

        let mut last_text: Option<(String, ValidationReport)> = None;
        let mut last_error: Option<ScriptcastError> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay_for(attempt - 1);
                debug!(
                    "Retrying chapter {} (attempt {}) after {:?}",
                    chapter.number, attempt, delay
                );
                tokio::time::sleep(delay).await;
            }

            match self.generator.complete(&prompt, options).await {
                Ok(raw) => {
                    let text = clean_generated_text(&raw);
                    let report = validate_chapter(&text, minutes, chapter);
                    if report.valid {
                        return ChapterOutcome::Accepted {
                            text,
                            report,
                            attempts: attempt,
                        };
                    }
                    warn!(
                        "Chapter {} attempt {} failed validation: {}",
                        chapter.number,
                        attempt,
                        report.reason.as_deref().unwrap_or("unknown")
                    );
                    last_text = Some((text, report));
                }
                Err(e) if !e.is_retryable() => {
                    return ChapterOutcome::Failed {
                        error: e,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    warn!("Chapter {} attempt {} failed: {}", chapter.number, attempt, e);
                    last_error = Some(e);
                }
            }
        }

        match last_text {
            Some((text, report)) => ChapterOutcome::AcceptedDegraded {
                reason: report
                    .reason
                    .clone()
                    .unwrap_or_else(|| "failed validation".to_string()),
                text,
                report,
                attempts: max_attempts,
            },
            None => ChapterOutcome::Failed {
                error: last_error.unwrap_or_else(|| {
                    ScriptcastError::Generation("No chapter text was generated".to_string())
                }),
                attempts: max_attempts,
            },
        }
    }

    async fn finish(
        &self,
        topic: &str,
        title: &str,
        content: String,
        chapter_stats: Option<Vec<ChapterStats>>,
        sink: &dyn ProgressSink,
    ) -> Result<GeneratedScript> {
        let words = word_count(&content);
        let path = self.store.save(title, &content).await?;

        info!(
            "Script \"{}\" ready: {} words, ~{:.1} min, saved to {:?}",
            title,
            words,
            estimate_spoken_minutes(words),
            path
        );
        sink.emit(ProgressEvent::new(
            Stage::Complete,
            100,
            format!("Script ready ({} words)", words),
        ));

        Ok(GeneratedScript {
            topic: topic.to_string(),
            title: title.to_string(),
            content,
            word_count: words,
            estimated_duration_minutes: estimate_spoken_minutes(words),
            chapter_stats,
            file_path: Some(path),
        })
    }
}

fn empty_outline_error() -> ScriptcastError {
    ScriptcastError::Generation(
        "The outline contained no chapters. Try again or rephrase the topic.".to_string(),
    )
}

/// Chapter work spans 10-90% of script progress.
fn chapter_progress(done: usize, total: usize) -> u8 {
    (10 + (done * 80) / total.max(1)) as u8
}

fn direct_prompt(request: &ScriptRequest, reference: Option<&str>) -> String {
    let mut prompt = format!(
        r#"Write a complete narrated {style} script about "{topic}".
Audience: {audience}. Tone: {tone}.
Length: about {words} words, which is roughly {duration} minutes when read aloud.

Write only the words to be spoken. Do not include a title, headings, speaker labels,
stage directions, bracketed notes, or placeholders."#,
        style = request.style,
        topic = request.topic.trim(),
        audience = request.audience,
        tone = request.tone,
        words = request.target_word_count(),
        duration = request.duration_minutes,
    );
    if let Some(reference) = reference {
        prompt.push_str("\n\nUse this reference material:\n");
        prompt.push_str(reference);
    }
    prompt
}

fn chapter_prompt(
    preview: &ScriptPreview,
    index: usize,
    minutes: f64,
    previous_text: Option<&str>,
    reference: Option<&str>,
) -> String {
    let chapter = &preview.chapters[index];
    let total = preview.chapters.len();
    let position = if index == 0 {
        "This is the opening chapter: begin with a hook that draws the listener in."
    } else if index + 1 == total {
        "This is the final chapter: wrap up the whole script with a satisfying conclusion."
    } else {
        "This is a middle chapter: continue naturally from the previous chapter."
    };

    let mut prompt = format!(
        r#"You are writing chapter {number} of {total} of a narrated {style} script titled "{title}" about "{topic}".
Audience: {audience}. Tone: {tone}.

Chapter title: {chapter_title}
Chapter focus: {description}
Length: about {words} words (~{minutes:.1} minutes read aloud).
{position}

Write only the words to be spoken. Do not include the chapter title, headings,
stage directions, bracketed notes, or placeholders."#,
        number = chapter.number,
        total = total,
        style = preview.style,
        title = preview.title,
        topic = preview.topic,
        audience = preview.audience,
        tone = preview.tone,
        chapter_title = chapter.title,
        description = chapter.description,
        words = super::validator::expected_words(minutes),
        minutes = minutes,
        position = position,
    );

    if let Some(previous) = previous_text {
        prompt.push_str("\n\nThe previous chapter ended with:\n\"");
        prompt.push_str(&tail_chars(previous, CONTEXT_TAIL_CHARS));
        prompt.push_str("\"\nPick up from there without repeating it.");
    }
    if let Some(reference) = reference {
        prompt.push_str("\n\nReference material:\n");
        prompt.push_str(reference);
    }
    prompt
}

/// The last `count` characters of `text`.
fn tail_chars(text: &str, count: usize) -> String {
    let total = text.chars().count();
    text.chars().skip(total.saturating_sub(count)).collect()
}

/// Drop markdown headings the model sometimes adds and trim the result.
fn clean_generated_text(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
