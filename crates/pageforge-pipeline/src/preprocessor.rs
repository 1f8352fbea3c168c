//! Segments raw chunk text into sentences with token/verb/complexity metadata.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessedSentence {
    pub text: String,
    pub token_count: usize,
    pub has_verb: bool,
    pub complexity_score: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessOutput {
    pub sentences: Vec<PreprocessedSentence>,
    pub raw_text: String,
    pub count: usize,
}

/// Minimum surviving sentence length, in content tokens; shorter spans are
/// treated as extraction artifacts (running headers, page numbers).
const MIN_SENTENCE_TOKENS: usize = 3;

const SUBORDINATE_MARKERS: &[&str] = &["que", "qui", "dont", "lorsque", "parce que", "bien que", "puisque"];
const COORDINATE_MARKERS: &[&str] = &["et", "mais", "ou", "donc", "or", "ni", "car"];

/// A sentence segmenter plus POS-level verb detection. The real NLP stack
/// that implements this lives outside this crate; this trait is the seam.
pub trait LinguisticEngine: Send + Sync {
    fn segment(&self, text: &str) -> Vec<String>;
    fn has_conjugated_verb(&self, sentence: &str) -> bool;
}

/// Cleans up common PDF-extraction artifacts: rejoined hyphenation, curly
/// quotes and guillemets normalized to plain ASCII equivalents, collapsed
/// whitespace runs, spacing inserted after sentence punctuation, and the
/// handful of ligatures PDF extractors commonly leave behind.
fn clean_extraction_artifacts(text: &str) -> String {
    let mut cleaned = text.replace("\u{ad}\n", "").replace("-\n", "");
    cleaned = cleaned
        .replace('\u{2019}', "'")
        .replace('\u{2018}', "'")
        .replace('\u{201c}', "\"")
        .replace('\u{201d}', "\"")
        .replace('\u{ab}', "\"")
        .replace('\u{bb}', "\"")
        .replace("\u{fb01}", "fi")
        .replace("\u{fb02}", "fl");

    let mut out = String::with_capacity(cleaned.len());
    let mut prev_space = false;
    for ch in cleaned.drain(..).collect::<String>().chars() {
        if ch.is_whitespace() {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(ch);
            prev_space = false;
        }
    }

    let mut spaced = String::with_capacity(out.len());
    let chars: Vec<char> = out.chars().collect();
    for (i, &ch) in chars.iter().enumerate() {
        spaced.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            if let Some(&next) = chars.get(i + 1) {
                if next.is_alphanumeric() {
                    spaced.push(' ');
                }
            }
        }
    }
    spaced.trim().to_string()
}

fn word_count(sentence: &str) -> usize {
    sentence.split_whitespace().filter(|w| w.chars().any(|c| c.is_alphanumeric())).count()
}

fn count_markers(sentence: &str, markers: &[&str]) -> usize {
    let lowered = sentence.to_lowercase();
    markers.iter().filter(|m| lowered.contains(*m)).count()
}

fn heuristic_segment(text: &str) -> Vec<String> {
    text.split(|c| c == '.' || c == '!' || c == '?')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Preprocesses `chunk_text` into sentence-level metadata. When `engine` is
/// `None`, degrades to a heuristic sentence break with `has_verb=false` and
/// `complexity_score=word_count` — the Validator still runs against this
/// degraded output rather than the pipeline failing outright.
pub fn preprocess(chunk_text: &str, engine: Option<&dyn LinguisticEngine>) -> PreprocessOutput {
    let raw_text = clean_extraction_artifacts(chunk_text);

    let segments = match engine {
        Some(engine) => engine.segment(&raw_text),
        None => heuristic_segment(&raw_text),
    };

    let mut sentences = Vec::new();
    for segment in segments {
        let token_count = word_count(&segment);
        if token_count < MIN_SENTENCE_TOKENS {
            continue;
        }
        let has_verb = engine.map(|e| e.has_conjugated_verb(&segment)).unwrap_or(false);
        let complexity_score = if engine.is_some() {
            token_count + 3 * count_markers(&segment, SUBORDINATE_MARKERS) + 2 * count_markers(&segment, COORDINATE_MARKERS)
        } else {
            token_count
        };
        sentences.push(PreprocessedSentence { text: segment, token_count, has_verb, complexity_score });
    }

    let count = sentences.len();
    PreprocessOutput { sentences, raw_text, count }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubEngine;
    impl LinguisticEngine for StubEngine {
        fn segment(&self, text: &str) -> Vec<String> {
            heuristic_segment(text)
        }
        fn has_conjugated_verb(&self, sentence: &str) -> bool {
            sentence.to_lowercase().contains("est") || sentence.to_lowercase().contains("sont")
        }
    }

    #[test]
    fn degrades_gracefully_without_engine() {
        let out = preprocess("Le chat dort. Il est noir.", None);
        assert_eq!(out.count, 2);
        assert!(out.sentences.iter().all(|s| !s.has_verb));
        assert!(out.sentences.iter().all(|s| s.complexity_score == s.token_count));
    }

    #[test]
    fn drops_short_artifact_sentences() {
        let out = preprocess("Page 3. Le chat noir dort paisiblement sur le tapis.", None);
        assert_eq!(out.count, 1);
    }

    #[test]
    fn rejoins_hyphenated_linebreaks() {
        let cleaned = clean_extraction_artifacts("la situ-\nation est claire");
        assert!(cleaned.contains("situation"));
    }

    #[test]
    fn normalizes_curly_quotes_and_guillemets() {
        let cleaned = clean_extraction_artifacts("\u{ab}bonjour\u{bb} \u{2019}monde\u{2019}");
        assert!(cleaned.contains('"'));
        assert!(cleaned.contains('\''));
    }

    #[test]
    fn uses_engine_for_verb_and_complexity_when_available() {
        let out = preprocess("Le chat noir est fatigue parce que la journee fut longue.", Some(&StubEngine));
        assert_eq!(out.count, 1);
        assert!(out.sentences[0].has_verb);
        assert!(out.sentences[0].complexity_score > out.sentences[0].token_count);
    }
}
