use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Terminal punctuation followed by whitespace ends a sentence.
static SENTENCE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+").expect("sentence boundary regex"));

/// Overlap is specified in characters and approximated as words of ~10 chars.
const CHARS_PER_OVERLAP_WORD: usize = 10;

/// Split text into sentences, keeping terminal punctuation attached.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for boundary in SENTENCE_BOUNDARY.find_iter(text) {
        let sentence = text[start..boundary.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = boundary.end();
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

/// Split text into sentence-aligned chunks of at most `max_chunk_chars`.
///
/// Each chunk after the first is seeded with the trailing words of the chunk
/// before it (`overlap_chars / 10` words) so the speech service keeps prosody
/// across boundaries. A sentence longer than `max_chunk_chars` is never cut and
/// becomes an oversized chunk on its own. Whitespace-only input yields no chunks.
pub fn split_text(text: &str, max_chunk_chars: usize, overlap_chars: usize) -> Vec<String> {
    let overlap_words = overlap_chars / CHARS_PER_OVERLAP_WORD;
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for sentence in split_sentences(text) {
        let sentence_chars = sentence.chars().count();

        if current_chars > 0 && current_chars + 1 + sentence_chars > max_chunk_chars {
            let closed = std::mem::take(&mut current);
            current = trailing_words(&closed, overlap_words);
            current_chars = current.chars().count();
            chunks.push(closed);
        }

        if current_chars > 0 {
            current.push(' ');
            current_chars += 1;
        }
        current.push_str(sentence);
        current_chars += sentence_chars;
    }

    if current_chars > 0 {
        chunks.push(current);
    }

    debug!(
        "Split {} chars into {} chunks (max {}, overlap {} words)",
        text.len(),
        chunks.len(),
        max_chunk_chars,
        overlap_words
    );

    chunks
}

/// The last `count` whitespace-separated words of `text`, joined by spaces.
fn trailing_words(text: &str, count: usize) -> String {
    if count == 0 {
        return String::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let start = words.len().saturating_sub(count);
    words[start..].join(" ")
}
