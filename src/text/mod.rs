pub mod chunker;

pub use chunker::{split_sentences, split_text};

/// Count words by whitespace splitting.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
