//! Quality gate applied to normalized sentences before they enter History.

use serde::{Deserialize, Serialize};

const RELATIVE_PRONOUNS: &[&str] = &["qui", "que", "dont", "ou", "lequel", "laquelle", "lesquels"];
const SUBORDINATING_CONJUNCTIONS: &[&str] = &["parce que", "puisque", "bien que", "lorsque", "quand", "si"];
const PREPOSITIONS: &[&str] = &["de", "a", "pour", "avec", "sans", "dans", "sur", "sous"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Length,
    NoVerb,
    Fragment,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationStats {
    pub total: usize,
    pub accepted: usize,
    pub rejected_length: usize,
    pub rejected_no_verb: usize,
    pub rejected_fragment: usize,
}

impl ValidationStats {
    pub fn acceptance_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.accepted as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationOutput {
    pub accepted: Vec<String>,
    pub stats: ValidationStats,
}

#[derive(Debug, Clone, Copy)]
pub struct ValidatorConfig {
    pub min_words: usize,
    pub max_words: usize,
    pub min_pass_rate: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self { min_words: 4, max_words: 8, min_pass_rate: 0.30 }
    }
}

fn word_count(sentence: &str) -> usize {
    sentence.split_whitespace().filter(|w| w.chars().any(|c| c.is_alphanumeric())).count()
}

fn first_word(sentence: &str) -> Option<&str> {
    sentence.split_whitespace().next()
}

fn starts_with_any<'a>(sentence: &str, markers: &'a [&'a str]) -> bool {
    let lowered = sentence.to_lowercase();
    markers.iter().any(|m| lowered.starts_with(m))
}

/// Checks whether `sentence` is a relative-clause / subordinate-clause /
/// preposition-led fragment per the spec's rule 3. `has_verb` is the
/// sentence-level verb presence already computed by the Preprocessor.
fn is_fragment(sentence: &str, has_verb: bool) -> bool {
    if let Some(first) = first_word(sentence) {
        let lowered_first = first.to_lowercase().trim_matches(|c: char| !c.is_alphanumeric()).to_string();
        if RELATIVE_PRONOUNS.contains(&lowered_first.as_str()) {
            return true;
        }
    }
    if starts_with_any(sentence, SUBORDINATING_CONJUNCTIONS) && !has_verb {
        return true;
    }
    if starts_with_any(sentence, PREPOSITIONS) {
        let words: Vec<&str> = sentence.split_whitespace().collect();
        let half = (words.len() / 2).max(1);
        let first_half = words[..half.min(words.len())].join(" ");
        if !has_verb && !first_half.is_empty() {
            return true;
        }
    }
    false
}

/// Validates normalized sentence text against the length / verb / fragment
/// rules. `has_verb` carries forward the Preprocessor's per-sentence verb
/// detection since normalization may rephrase but rarely changes clause
/// structure drastically; callers pass the pre-normalization verb flag
/// paired positionally with `texts`.
pub fn validate(texts: &[String], has_verb: &[bool], config: &ValidatorConfig) -> ValidationOutput {
    let mut stats = ValidationStats::default();
    let mut accepted = Vec::new();

    for (text, &verb) in texts.iter().zip(has_verb.iter()) {
        stats.total += 1;
        let words = word_count(text);
        if words < config.min_words || words > config.max_words {
            stats.rejected_length += 1;
            continue;
        }
        if !verb {
            stats.rejected_no_verb += 1;
            continue;
        }
        if is_fragment(text, verb) {
            stats.rejected_fragment += 1;
            continue;
        }
        stats.accepted += 1;
        accepted.push(text.clone());
    }

    ValidationOutput { accepted, stats }
}

/// Per the spec's acceptance-rate bands: below `min_pass_rate` the chunk
/// must be failed (`LOW_VALIDATION_PASS_RATE`); between the floor and 0.70
/// it is merely logged as a warning.
pub fn acceptance_band(stats: &ValidationStats, config: &ValidatorConfig) -> AcceptanceBand {
    let rate = stats.acceptance_rate();
    if rate < config.min_pass_rate {
        AcceptanceBand::Fail
    } else if rate < 0.70 {
        AcceptanceBand::Warn
    } else {
        AcceptanceBand::Ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptanceBand {
    Ok,
    Warn,
    Fail,
}
