//! Chunk planning plus the per-chunk preprocess → route → normalize →
//! validate pipeline. Owns no persistence; the JobEngine drives these
//! pure/async functions against Store-loaded data and writes results back.

pub mod chunker;
pub mod error;
pub mod estimate;
pub mod extractor;
pub mod normalizer;
pub mod preprocessor;
pub mod router;
pub mod validator;

pub use chunker::{plan, PlannedChunk};
pub use error::PipelineError;
pub use estimate::{estimate, Estimate, EstimateInput};
pub use extractor::TextExtractor;
pub use normalizer::{normalize_single_with_fallback, normalize_with_retry, Normalizer};
pub use preprocessor::{preprocess, LinguisticEngine, PreprocessOutput, PreprocessedSentence};
pub use router::{classify, route, RouterConfig, Tier};
pub use validator::{acceptance_band, validate, AcceptanceBand, ValidationOutput, ValidationStats, ValidatorConfig};

/// Runs preprocess → route → normalize → validate for one chunk's raw text,
/// returning the accepted sentence strings plus validation stats. This is
/// the pure core of `JobEngine::process_chunk`'s stage 2; the caller is
/// responsible for timeouts, retries at the chunk level, and persistence.
///
/// `cancelled` is polled at each stage boundary (preprocess/route/normalize/
/// validate) so a worker that observes a job-level cancellation signal mid
/// chunk can return early instead of running the rest of the pipeline.
pub async fn run_chunk_pipeline(
    chunk_text: &str,
    engine: Option<std::sync::Arc<dyn LinguisticEngine>>,
    normalizer: &dyn Normalizer,
    breaker: &pageforge_resilience::CircuitBreaker,
    router_config: &RouterConfig,
    validator_config: &ValidatorConfig,
    call_timeout: std::time::Duration,
    cancelled: &dyn Fn() -> bool,
) -> Result<ValidationOutput, PipelineError> {
    if cancelled() {
        return Err(PipelineError::Cancelled);
    }
    // Sentence segmentation/POS tagging is CPU-bound; run it on the
    // scheduler's blocking pool (the "Air Gap") so it never stalls the
    // worker's async reactor, which also owns heartbeats and progress
    // publication for this chunk.
    let owned_text = chunk_text.to_string();
    let segmenter = engine.clone();
    let preprocessed = pageforge_scheduler::offload_compute(move || preprocess(&owned_text, segmenter.as_deref()))
        .await
        .map_err(|err| PipelineError::StageWorkerPanicked(err.to_string()))?;

    if cancelled() {
        return Err(PipelineError::Cancelled);
    }
    let batches = route(&preprocessed.sentences, router_config);

    let mut normalized_texts = Vec::with_capacity(preprocessed.count);
    let mut has_verb_flags = Vec::with_capacity(preprocessed.count);

    for batch in batches {
        if cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let raw: Vec<String> = batch.sentences.iter().map(|s| s.text.clone()).collect();
        let texts = match normalize_with_retry(normalizer, breaker, &raw, batch.tier, call_timeout).await {
            Ok(texts) => texts,
            Err(_) if raw.len() > 1 => {
                let mut fallback = Vec::with_capacity(raw.len());
                for sentence in &raw {
                    fallback.push(normalize_single_with_fallback(normalizer, breaker, sentence, batch.tier, call_timeout).await);
                }
                fallback
            }
            Err(err) => return Err(err),
        };
        for (sentence, text) in batch.sentences.iter().zip(texts.into_iter()) {
            normalized_texts.push(text);
            has_verb_flags.push(sentence.has_verb);
        }
    }

    if cancelled() {
        return Err(PipelineError::Cancelled);
    }
    // Validation is the other CPU-bound leg; offload it the same way.
    let cfg = *validator_config;
    let output = pageforge_scheduler::offload_compute(move || validate(&normalized_texts, &has_verb_flags, &cfg))
        .await
        .map_err(|err| PipelineError::StageWorkerPanicked(err.to_string()))?;
    if acceptance_band(&output.stats, validator_config) == AcceptanceBand::Fail {
        return Err(PipelineError::LowValidationPassRate { accepted: output.stats.accepted, total: output.stats.total });
    }
    Ok(output)
}
