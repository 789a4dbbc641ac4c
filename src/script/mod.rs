pub mod assembler;
pub mod planner;
pub mod storage;
pub mod validator;

pub use assembler::{ChapterOutcome, RetryPolicy, ScriptAssembler};
pub use planner::{chapter_count, parse_outline, ChapterPlanner};
pub use storage::{FileScriptStore, ScriptStore};
pub use validator::{validate_chapter, ValidationReport};

use crate::error::{Result, ScriptcastError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Words per minute used for expected-length math during generation.
pub const VALIDATION_WORDS_PER_MINUTE: u32 = 200;

/// Words per minute used to estimate spoken duration of finished text.
pub const SPOKEN_WORDS_PER_MINUTE: f64 = 150.0;

/// Requests at or above this duration always use chapter-based generation.
pub const LONG_FORM_THRESHOLD_MINUTES: u32 = 20;

pub const MAX_TOPIC_CHARS: usize = 500;
pub const MIN_DURATION_MINUTES: u32 = 1;
pub const MAX_DURATION_MINUTES: u32 = 180;

/// Reference material beyond this many characters is dropped from prompts.
const MAX_REFERENCE_CHARS: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Educational,
    Storytelling,
    Conversational,
    Documentary,
    Motivational,
}

impl Style {
    pub const ALL: [Style; 5] = [
        Style::Educational,
        Style::Storytelling,
        Style::Conversational,
        Style::Documentary,
        Style::Motivational,
    ];
}

impl std::fmt::Display for Style {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Style::Educational => write!(f, "educational"),
            Style::Storytelling => write!(f, "storytelling"),
            Style::Conversational => write!(f, "conversational"),
            Style::Documentary => write!(f, "documentary"),
            Style::Motivational => write!(f, "motivational"),
        }
    }
}

impl std::str::FromStr for Style {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "educational" => Ok(Style::Educational),
            "storytelling" => Ok(Style::Storytelling),
            "conversational" => Ok(Style::Conversational),
            "documentary" => Ok(Style::Documentary),
            "motivational" => Ok(Style::Motivational),
            _ => Err(format!("Unknown style: {}. Use one of 'educational', 'storytelling', 'conversational', 'documentary', 'motivational'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    #[default]
    General,
    Beginners,
    Intermediate,
    Experts,
    Children,
}

impl Audience {
    pub const ALL: [Audience; 5] = [
        Audience::General,
        Audience::Beginners,
        Audience::Intermediate,
        Audience::Experts,
        Audience::Children,
    ];
}

impl std::fmt::Display for Audience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Audience::General => write!(f, "general"),
            Audience::Beginners => write!(f, "beginners"),
            Audience::Intermediate => write!(f, "intermediate"),
            Audience::Experts => write!(f, "experts"),
            Audience::Children => write!(f, "children"),
        }
    }
}

impl std::str::FromStr for Audience {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" => Ok(Audience::General),
            "beginners" => Ok(Audience::Beginners),
            "intermediate" => Ok(Audience::Intermediate),
            "experts" => Ok(Audience::Experts),
            "children" => Ok(Audience::Children),
            _ => Err(format!("Unknown audience: {}. Use one of 'general', 'beginners', 'intermediate', 'experts', 'children'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Informative,
    Friendly,
    Professional,
    Casual,
    Inspirational,
}

impl Tone {
    pub const ALL: [Tone; 5] = [
        Tone::Informative,
        Tone::Friendly,
        Tone::Professional,
        Tone::Casual,
        Tone::Inspirational,
    ];
}

impl std::fmt::Display for Tone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tone::Informative => write!(f, "informative"),
            Tone::Friendly => write!(f, "friendly"),
            Tone::Professional => write!(f, "professional"),
            Tone::Casual => write!(f, "casual"),
            Tone::Inspirational => write!(f, "inspirational"),
        }
    }
}

impl std::str::FromStr for Tone {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "informative" => Ok(Tone::Informative),
            "friendly" => Ok(Tone::Friendly),
            "professional" => Ok(Tone::Professional),
            "casual" => Ok(Tone::Casual),
            "inspirational" => Ok(Tone::Inspirational),
            _ => Err(format!("Unknown tone: {}. Use one of 'informative', 'friendly', 'professional', 'casual', 'inspirational'", s)),
        }
    }
}

/// Caller input for script generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRequest {
    pub topic: String,
    pub duration_minutes: u32,
    #[serde(default)]
    pub style: Style,
    #[serde(default)]
    pub audience: Audience,
    #[serde(default)]
    pub tone: Tone,
    #[serde(default)]
    pub reference_file: Option<PathBuf>,
    /// Ask for chapter-based generation even below the long-form threshold.
    #[serde(default)]
    pub use_chapters: bool,
}

impl ScriptRequest {
    pub fn new(topic: impl Into<String>, duration_minutes: u32) -> Self {
        Self {
            topic: topic.into(),
            duration_minutes,
            style: Style::default(),
            audience: Audience::default(),
            tone: Tone::default(),
            reference_file: None,
            use_chapters: false,
        }
    }

    /// Reject malformed input before any external call is made.
    pub fn validate(&self) -> Result<()> {
        let topic = self.topic.trim();
        if topic.is_empty() {
            return Err(ScriptcastError::Validation("Topic is required".to_string()));
        }
        if topic.chars().count() > MAX_TOPIC_CHARS {
            return Err(ScriptcastError::Validation(format!(
                "Topic must be at most {} characters",
                MAX_TOPIC_CHARS
            )));
        }
        if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&self.duration_minutes) {
            return Err(ScriptcastError::Validation(format!(
                "Duration must be between {} and {} minutes, got {}",
                MIN_DURATION_MINUTES, MAX_DURATION_MINUTES, self.duration_minutes
            )));
        }
        if let Some(ref path) = self.reference_file {
            if !path.is_file() {
                return Err(ScriptcastError::Validation(format!(
                    "Reference file not found: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Whether this request must go through chapter-based generation.
    pub fn requires_chapters(&self) -> bool {
        self.use_chapters || self.duration_minutes >= LONG_FORM_THRESHOLD_MINUTES
    }

    /// Target word count for the whole script.
    pub fn target_word_count(&self) -> u32 {
        self.duration_minutes * VALIDATION_WORDS_PER_MINUTE
    }

    /// Read the reference file, if any, truncated for prompt use.
    pub async fn load_reference_text(&self) -> Result<Option<String>> {
        let Some(ref path) = self.reference_file else {
            return Ok(None);
        };
        let text = tokio::fs::read_to_string(path).await?;
        let text: String = text.chars().take(MAX_REFERENCE_CHARS).collect();
        Ok(Some(text))
    }
}

/// One planned chapter of the outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterOutline {
    pub number: usize,
    pub title: String,
    pub description: String,
}

/// Outline produced by the planner and re-supplied by the caller for generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptPreview {
    pub topic: String,
    pub title: String,
    pub chapters: Vec<ChapterOutline>,
    pub estimated_duration_minutes: u32,
    pub word_count_target: u32,
    pub raw_model_output: String,
    #[serde(default)]
    pub style: Style,
    #[serde(default)]
    pub audience: Audience,
    #[serde(default)]
    pub tone: Tone,
}

impl ScriptPreview {
    /// Reject an outline a caller edited into an unusable shape.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&self.estimated_duration_minutes) {
            return Err(ScriptcastError::Validation(format!(
                "Outline duration must be between {} and {} minutes, got {}",
                MIN_DURATION_MINUTES, MAX_DURATION_MINUTES, self.estimated_duration_minutes
            )));
        }
        for (index, chapter) in self.chapters.iter().enumerate() {
            if chapter.number != index + 1 {
                return Err(ScriptcastError::Validation(format!(
                    "Outline chapters must be numbered 1 to {} in order, found {} at position {}",
                    self.chapters.len(),
                    chapter.number,
                    index + 1
                )));
            }
        }
        Ok(())
    }
}

/// Per-chapter generation statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterStats {
    pub chapter_number: usize,
    pub title: String,
    pub word_count: usize,
    pub expected_word_count: usize,
    pub passed_validation: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

/// A finished script.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedScript {
    pub topic: String,
    pub title: String,
    pub content: String,
    pub word_count: usize,
    pub estimated_duration_minutes: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_stats: Option<Vec<ChapterStats>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

impl GeneratedScript {
    /// Chapters that were accepted after failing validation on every attempt.
    pub fn degraded_chapters(&self) -> usize {
        self.chapter_stats
            .as_ref()
            .map(|stats| stats.iter().filter(|s| !s.passed_validation).count())
            .unwrap_or(0)
    }
}

/// Spoken duration estimate in minutes, rounded to two decimals.
pub fn estimate_spoken_minutes(word_count: usize) -> f64 {
    crate::text::round2(word_count as f64 / SPOKEN_WORDS_PER_MINUTE)
}
