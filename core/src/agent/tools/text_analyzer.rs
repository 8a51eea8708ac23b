//! Text statistics tool

use super::{Tool, ToolOutput};
use crate::agent::types::ToolType;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct TextAnalyzerTool;

impl TextAnalyzerTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for TextAnalyzerTool {
    fn tool_type(&self) -> ToolType {
        ToolType::TextAnalyzer
    }

    fn description(&self) -> &str {
        "Count characters, words and sentences and rate readability"
    }

    async fn execute(&self, input: &str) -> ToolOutput {
        let stats = analyze(input);
        match serde_json::to_value(&stats) {
            Ok(value) => ToolOutput::success(value),
            Err(e) => ToolOutput::failure(format!("failed to encode statistics: {}", e)),
        }
    }
}

/// Statistics reported for a piece of text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextStats {
    pub text_length: usize,
    pub text_length_no_spaces: usize,
    pub word_count: usize,
    pub unique_words: usize,
    pub sentence_count: usize,
    pub avg_word_length: f64,
    pub avg_sentence_length: f64,
    pub longest_word: String,
    pub longest_word_length: usize,
    pub readability: Readability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Readability {
    Simple,
    Moderate,
    Complex,
}

impl Readability {
    fn from_avg_word_length(avg: f64) -> Self {
        if avg < 5.0 {
            Readability::Simple
        } else if avg < 7.0 {
            Readability::Moderate
        } else {
            Readability::Complex
        }
    }
}

/// Compute [`TextStats`]. Lengths count chars, not bytes.
pub fn analyze(text: &str) -> TextStats {
    let words: Vec<&str> = text.split_whitespace().collect();
    let word_count = words.len();

    let unique_words = words
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<HashSet<_>>()
        .len();

    let sentence_count = text
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count();

    let total_word_chars: usize = words.iter().map(|w| w.chars().count()).sum();
    let avg_word_length = if word_count > 0 {
        total_word_chars as f64 / word_count as f64
    } else {
        0.0
    };
    let avg_sentence_length = if sentence_count > 0 {
        word_count as f64 / sentence_count as f64
    } else {
        0.0
    };

    // First word of maximal length wins ties.
    let mut longest_word = "";
    let mut longest_word_length = 0;
    for word in &words {
        let len = word.chars().count();
        if len > longest_word_length {
            longest_word = word;
            longest_word_length = len;
        }
    }

    TextStats {
        text_length: text.chars().count(),
        text_length_no_spaces: text.chars().filter(|c| *c != ' ').count(),
        word_count,
        unique_words,
        sentence_count,
        avg_word_length: round2(avg_word_length),
        avg_sentence_length: round2(avg_sentence_length),
        longest_word: longest_word.to_string(),
        longest_word_length,
        readability: Readability::from_avg_word_length(avg_word_length),
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hello_world() {
        let stats = analyze("Hello World");
        assert_eq!(stats.word_count, 2);
        assert_eq!(stats.text_length, 11);
        assert_eq!(stats.text_length_no_spaces, 10);
        assert_eq!(stats.unique_words, 2);
        assert_eq!(stats.sentence_count, 1);
        assert_eq!(stats.longest_word, "Hello");
        assert_eq!(stats.readability, Readability::Simple);
    }

    #[test]
    fn sentences_and_case_insensitive_uniques() {
        let stats = analyze("The cat sat. the CAT ran!  Why?? ");
        assert_eq!(stats.word_count, 7);
        assert_eq!(stats.unique_words, 5);
        assert_eq!(stats.sentence_count, 3);
        assert_eq!(stats.avg_sentence_length, 2.33);
    }

    #[test]
    fn readability_tiers() {
        assert_eq!(analyze("extraordinarily complicated").readability, Readability::Complex);
        assert_eq!(analyze("a cat sat").readability, Readability::Simple);
        assert_eq!(analyze("bubble").readability, Readability::Moderate);
    }

    #[test]
    fn empty_text_is_all_zeros() {
        let stats = analyze("");
        assert_eq!(stats.word_count, 0);
        assert_eq!(stats.sentence_count, 0);
        assert_eq!(stats.avg_word_length, 0.0);
        assert_eq!(stats.longest_word, "");
        assert_eq!(stats.readability, Readability::Simple);
    }

    #[tokio::test]
    async fn tool_output_shape() {
        let out = TextAnalyzerTool::new().execute("150").await;
        assert!(out.is_success());
        assert_eq!(out.get("word_count"), Some(&json!(1)));
        assert_eq!(out.get("readability"), Some(&json!("simple")));
        assert_eq!(out.get("avg_word_length"), Some(&json!(3.0)));
    }
}
