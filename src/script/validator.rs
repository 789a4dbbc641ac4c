//! Heuristic checks deciding whether a generated chapter is acceptable.

use super::{ChapterOutline, VALIDATION_WORDS_PER_MINUTE};
use crate::text::word_count;
use serde::Serialize;

const MIN_LENGTH_RATIO: f64 = 0.5;
const MAX_LENGTH_RATIO: f64 = 2.0;
const MIN_CONTENT_CHARS: usize = 100;
const MIN_TITLE_WORD_CHARS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub word_count: usize,
    pub expected_word_count: usize,
}

impl ValidationReport {
    fn fail(reason: String, word_count: usize, expected_word_count: usize) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            word_count,
            expected_word_count,
        }
    }
}

/// Expected word count for a span of narration.
pub fn expected_words(duration_minutes: f64) -> usize {
    (duration_minutes * VALIDATION_WORDS_PER_MINUTE as f64).round() as usize
}

/// Score generated chapter text. The first failing rule wins.
pub fn validate_chapter(
    text: &str,
    expected_duration_minutes: f64,
    chapter: &ChapterOutline,
) -> ValidationReport {
    let words = word_count(text);
    let expected = expected_words(expected_duration_minutes);

    if (words as f64) < MIN_LENGTH_RATIO * expected as f64 {
        return ValidationReport::fail(
            format!("Content too short: {} words (expected ~{})", words, expected),
            words,
            expected,
        );
    }

    if (words as f64) > MAX_LENGTH_RATIO * expected as f64 {
        return ValidationReport::fail(
            format!("Content too long: {} words (expected ~{})", words, expected),
            words,
            expected,
        );
    }

    if text.trim().chars().count() < MIN_CONTENT_CHARS {
        return ValidationReport::fail(
            format!("Content too short: under {} characters", MIN_CONTENT_CHARS),
            words,
            expected,
        );
    }

    if text.contains('[') || text.contains(']') || text.contains("TODO") {
        return ValidationReport::fail(
            "Contains placeholder content".to_string(),
            words,
            expected,
        );
    }

    let title_words: Vec<String> = chapter
        .title
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .collect();
    let keywords: Vec<&String> = title_words
        .iter()
        .filter(|w| w.chars().count() >= MIN_TITLE_WORD_CHARS)
        .collect();
    if title_words.len() > 1 && !keywords.is_empty() {
        let lowered = text.to_lowercase();
        let on_topic = keywords.iter().any(|w| lowered.contains(w.as_str()));
        if !on_topic {
            return ValidationReport::fail(
                format!("Content appears off-topic for chapter '{}'", chapter.title),
                words,
                expected,
            );
        }
    }

    ValidationReport {
        valid: true,
        reason: None,
        word_count: words,
        expected_word_count: expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(title: &str) -> ChapterOutline {
        ChapterOutline {
            number: 1,
            title: title.to_string(),
            description: String::new(),
        }
    }

    fn words_about(topic: &str, count: usize) -> String {
        let filler = ["the", "practice", "of", topic, "helps", "people", "feel", "calm"];
        (0..count)
            .map(|i| filler[i % filler.len()])
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_too_short() {
        let report = validate_chapter(&words_about("meditation", 400), 5.0, &chapter("Meditation Basics"));
        assert!(!report.valid);
        assert!(report.reason.unwrap().contains("short"));
        assert_eq!(report.expected_word_count, 1000);
        assert_eq!(report.word_count, 400);
    }

    #[test]
    fn test_too_long() {
        let report = validate_chapter(&words_about("meditation", 2200), 5.0, &chapter("Meditation Basics"));
        assert!(!report.valid);
        assert!(report.reason.unwrap().contains("long"));
    }

    #[test]
    fn test_placeholder() {
        let text = format!("{} [pause] {}", words_about("meditation", 500), words_about("meditation", 499));
        let report = validate_chapter(&text, 5.0, &chapter("Meditation Basics"));
        assert!(!report.valid);
        assert!(report.reason.unwrap().contains("placeholder"));
    }

    #[test]
    fn test_todo_marker_is_placeholder() {
        let text = format!("{} TODO", words_about("meditation", 999));
        let report = validate_chapter(&text, 5.0, &chapter("Meditation Basics"));
        assert!(report.reason.unwrap().contains("placeholder"));
    }

    #[test]
    fn test_valid_on_topic() {
        let report = validate_chapter(&words_about("meditation", 1000), 5.0, &chapter("Meditation Basics"));
        assert!(report.valid, "{:?}", report.reason);
        assert!(report.reason.is_none());
    }

    #[test]
    fn test_off_topic() {
        let report = validate_chapter(&words_about("gardening", 1000), 5.0, &chapter("Meditation Basics"));
        assert!(!report.valid);
        assert!(report.reason.unwrap().contains("off-topic"));
    }

    #[test]
    fn test_single_word_title_skips_topic_check() {
        let report = validate_chapter(&words_about("gardening", 1000), 5.0, &chapter("Introduction"));
        assert!(report.valid);
    }

    #[test]
    fn test_title_of_short_words_skips_topic_check() {
        let report = validate_chapter(&words_about("tea", 1000), 5.0, &chapter("Tea and Me"));
        assert!(report.valid, "{:?}", report.reason);
    }

    #[test]
    fn test_title_match_is_case_insensitive() {
        let text = words_about("MEDITATION", 1000);
        let report = validate_chapter(&text, 5.0, &chapter("meditation basics"));
        assert!(report.valid);
    }

    #[test]
    fn test_degenerate_short_text() {
        // 12 words is within range for 20 expected, but under the character floor.
        let text = "one two three four five six seven eight nine ten eleven twelve.";
        let report = validate_chapter(text, 0.1, &chapter("Intro"));
        assert_eq!(report.expected_word_count, 20);
        assert!(!report.valid);
        assert!(report.reason.unwrap().contains("short"));
    }
}
