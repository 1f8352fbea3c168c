//! Classifies sentences into a processing tier and drives batching.

use crate::preprocessor::PreprocessedSentence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Passthrough,
    Light,
    Heavy,
}

#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    /// When true, the passthrough fast path is disabled and every sentence
    /// is routed through the LLM (debugging aid to compare normalized vs
    /// raw output for sentences that would otherwise bypass it).
    pub force_llm: bool,
    /// When true, light-tier sentences are never batched together; each is
    /// sent as its own single-sentence call.
    pub disable_batching: bool,
    pub light_complexity_ceiling: usize,
    pub heavy_complexity_floor: usize,
    pub heavy_token_floor: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            force_llm: false,
            disable_batching: false,
            light_complexity_ceiling: 12,
            heavy_complexity_floor: 12,
            heavy_token_floor: 10,
        }
    }
}

pub fn classify(sentence: &PreprocessedSentence, config: &RouterConfig) -> Tier {
    if sentence.complexity_score > config.heavy_complexity_floor || sentence.token_count > config.heavy_token_floor {
        return Tier::Heavy;
    }
    if !config.force_llm && (4..=8).contains(&sentence.token_count) && sentence.has_verb {
        return Tier::Passthrough;
    }
    Tier::Light
}

#[derive(Debug, Clone)]
pub struct RoutedBatch<'a> {
    pub tier: Tier,
    pub sentences: Vec<&'a PreprocessedSentence>,
}

/// Routes a whole chunk's sentences, grouping consecutive light-tier
/// sentences into single batches (unless `disable_batching`). Passthrough
/// sentences are emitted as singleton batches to keep ordering simple;
/// callers skip the LLM call for that tier entirely.
pub fn route<'a>(sentences: &'a [PreprocessedSentence], config: &RouterConfig) -> Vec<RoutedBatch<'a>> {
    let mut batches = Vec::new();
    let mut pending_light: Vec<&PreprocessedSentence> = Vec::new();

    let flush_light = |pending: &mut Vec<&'a PreprocessedSentence>, batches: &mut Vec<RoutedBatch<'a>>| {
        if !pending.is_empty() {
            batches.push(RoutedBatch { tier: Tier::Light, sentences: std::mem::take(pending) });
        }
    };

    for sentence in sentences {
        match classify(sentence, config) {
            Tier::Passthrough => {
                flush_light(&mut pending_light, &mut batches);
                batches.push(RoutedBatch { tier: Tier::Passthrough, sentences: vec![sentence] });
            }
            Tier::Heavy => {
                flush_light(&mut pending_light, &mut batches);
                batches.push(RoutedBatch { tier: Tier::Heavy, sentences: vec![sentence] });
            }
            Tier::Light => {
                if config.disable_batching {
                    batches.push(RoutedBatch { tier: Tier::Light, sentences: vec![sentence] });
                } else {
                    pending_light.push(sentence);
                }
            }
        }
    }
    flush_light(&mut pending_light, &mut batches);
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(token_count: usize, has_verb: bool, complexity_score: usize) -> PreprocessedSentence {
        PreprocessedSentence { text: "x".into(), token_count, has_verb, complexity_score }
    }

    #[test]
    fn short_verbed_sentence_is_passthrough() {
        let s = sentence(6, true, 6);
        assert_eq!(classify(&s, &RouterConfig::default()), Tier::Passthrough);
    }

    #[test]
    fn long_sentence_is_heavy_regardless_of_verb() {
        let s = sentence(11, true, 11);
        assert_eq!(classify(&s, &RouterConfig::default()), Tier::Heavy);
    }

    #[test]
    fn complex_sentence_is_heavy() {
        let s = sentence(9, true, 13);
        assert_eq!(classify(&s, &RouterConfig::default()), Tier::Heavy);
    }

    #[test]
    fn mid_sentence_without_verb_is_light() {
        let s = sentence(6, false, 6);
        assert_eq!(classify(&s, &RouterConfig::default()), Tier::Light);
    }

    #[test]
    fn force_llm_disables_passthrough() {
        let s = sentence(6, true, 6);
        let config = RouterConfig { force_llm: true, ..Default::default() };
        assert_eq!(classify(&s, &config), Tier::Light);
    }

    #[test]
    fn consecutive_light_sentences_batch_together() {
        let sentences = vec![sentence(6, false, 6), sentence(7, false, 7)];
        let batches = route(&sentences, &RouterConfig::default());
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].sentences.len(), 2);
    }

    #[test]
    fn disable_batching_splits_light_sentences() {
        let sentences = vec![sentence(6, false, 6), sentence(7, false, 7)];
        let config = RouterConfig { disable_batching: true, ..Default::default() };
        let batches = route(&sentences, &config);
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn heavy_and_passthrough_break_a_pending_light_batch() {
        let sentences = vec![sentence(6, false, 6), sentence(6, true, 6), sentence(6, false, 6)];
        let batches = route(&sentences, &RouterConfig::default());
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1].tier, Tier::Passthrough);
    }
}
