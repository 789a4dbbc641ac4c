use super::{ChapterOutline, ScriptPreview, ScriptRequest};
use crate::error::Result;
use crate::llm::{CompletionOptions, TextGenerator};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

const MIN_CHAPTERS: u32 = 3;
const MAX_CHAPTERS: u32 = 8;
const OUTLINE_MAX_TOKENS: u32 = 2048;

static TITLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^TITLE\s*:\s*(.+)$").expect("title regex"));
static CHAPTER_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^CHAPTER\s+(\d+)\s*[:.\-]?\s*(.*)$").expect("chapter regex")
});
/// Any other upper-case tag (e.g. `DURATION:`) closes the open chapter.
static METADATA_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z _]*:").expect("metadata regex"));

/// Number of chapters for a target duration: `clamp(ceil(d / 2), 3, 8)`.
pub fn chapter_count(duration_minutes: u32) -> u32 {
    duration_minutes.div_ceil(2).clamp(MIN_CHAPTERS, MAX_CHAPTERS)
}

/// Parsed outline text: optional overall title plus chapters numbered from 1.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutline {
    pub title: Option<String>,
    pub chapters: Vec<ChapterOutline>,
}

/// Parse `TITLE:` / `CHAPTER n:` tagged outline text.
///
/// Description lines following a chapter tag are joined with single spaces
/// until the next chapter or metadata tag. Untagged lines outside a chapter
/// are skipped. Chapters are renumbered so numbering is contiguous from 1.
pub fn parse_outline(raw: &str) -> ParsedOutline {
    let mut title = None;
    let mut chapters: Vec<ChapterOutline> = Vec::new();
    let mut description: Vec<&str> = Vec::new();
    let mut in_chapter = false;

    for raw_line in raw.lines() {
        let line = raw_line
            .trim()
            .trim_matches(|c: char| c == '#' || c == '*')
            .trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = CHAPTER_TAG.captures(line) {
            if in_chapter {
                close_chapter(&mut chapters, &mut description);
            }
            let number = chapters.len() + 1;
            if caps[1].parse::<usize>().ok() != Some(number) {
                debug!("Renumbering outline chapter {} as {}", &caps[1], number);
            }
            let chapter_title = caps[2].trim().trim_matches('*').trim();
            chapters.push(ChapterOutline {
                number,
                title: if chapter_title.is_empty() {
                    format!("Chapter {}", number)
                } else {
                    chapter_title.to_string()
                },
                description: String::new(),
            });
            in_chapter = true;
            continue;
        }

        if let Some(caps) = TITLE_TAG.captures(line) {
            if in_chapter {
                close_chapter(&mut chapters, &mut description);
                in_chapter = false;
            }
            title = Some(caps[1].trim().to_string());
            continue;
        }

        if METADATA_TAG.is_match(line) {
            if in_chapter {
                close_chapter(&mut chapters, &mut description);
                in_chapter = false;
            }
            continue;
        }

        if in_chapter {
            description.push(line);
        }
    }

    if in_chapter {
        close_chapter(&mut chapters, &mut description);
    }

    ParsedOutline { title, chapters }
}

fn close_chapter(chapters: &mut [ChapterOutline], description: &mut Vec<&str>) {
    if let Some(last) = chapters.last_mut() {
        last.description = description.join(" ");
    }
    description.clear();
}

/// Produces a chapter outline with one text-generation call.
pub struct ChapterPlanner {
    generator: Arc<dyn TextGenerator>,
}

impl ChapterPlanner {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    fn build_prompt(request: &ScriptRequest, chapters: u32, reference: Option<&str>) -> String {
        let minutes_per_chapter = request.duration_minutes as f64 / chapters as f64;
        let mut prompt = format!(
            r#"You are planning a narrated {style} script about "{topic}".
Audience: {audience}. Tone: {tone}.
Total length: {duration} minutes (about {words} words), split into exactly {chapters} chapters of roughly {per_chapter:.1} minutes each.

Respond using exactly this format and nothing else:
TITLE: <overall title>
CHAPTER 1: <chapter title>
<two or three sentences describing what the chapter covers>
CHAPTER 2: <chapter title>
<description>
...
DURATION: {duration} minutes
"#,
            style = request.style,
            topic = request.topic.trim(),
            audience = request.audience,
            tone = request.tone,
            duration = request.duration_minutes,
            words = request.target_word_count(),
            chapters = chapters,
            per_chapter = minutes_per_chapter,
        );

        if let Some(reference) = reference {
            prompt.push_str("\nBase the outline on this reference material:\n");
            prompt.push_str(reference);
            prompt.push('\n');
        }

        prompt
    }

    /// Plan the outline. A response without chapter tags yields zero chapters;
    /// callers must treat that as a failed plan.
    pub async fn plan(
        &self,
        request: &ScriptRequest,
        reference: Option<&str>,
    ) -> Result<ScriptPreview> {
        let chapters = chapter_count(request.duration_minutes);
        info!(
            "Planning {} chapters for \"{}\" ({} min) with {}",
            chapters,
            request.topic,
            request.duration_minutes,
            self.generator.name()
        );

        let prompt = Self::build_prompt(request, chapters, reference);
        let options = CompletionOptions {
            max_tokens: OUTLINE_MAX_TOKENS,
            ..CompletionOptions::default()
        };
        let raw = self.generator.complete(&prompt, options).await?;

        let parsed = parse_outline(&raw);
        if parsed.chapters.is_empty() {
            warn!("Outline response contained no chapter tags");
        } else if parsed.chapters.len() as u32 != chapters {
            warn!(
                "Outline has {} chapters, requested {}",
                parsed.chapters.len(),
                chapters
            );
        }

        Ok(ScriptPreview {
            topic: request.topic.trim().to_string(),
            title: parsed
                .title
                .unwrap_or_else(|| request.topic.trim().to_string()),
            chapters: parsed.chapters,
            estimated_duration_minutes: request.duration_minutes,
            word_count_target: request.target_word_count(),
            raw_model_output: raw,
            style: request.style,
            audience: request.audience,
            tone: request.tone,
        })
    }
}
