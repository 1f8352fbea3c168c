//! Calls the LLM normalization provider with tier-appropriate prompts,
//! retrying transient failures through the shared circuit breaker.

use std::time::Duration;

use async_trait::async_trait;
use pageforge_resilience::{CircuitBreaker, ResilienceError};

use crate::error::PipelineError;
use crate::router::Tier;

/// The external LLM collaborator: accepts sentences-with-metadata for one
/// batch and returns normalized sentence text, in the same order.
#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn normalize_raw(&self, sentences: &[String], tier: Tier) -> Result<Vec<String>, PipelineError>;
}

fn classify_resilience(err: &PipelineError) -> ResilienceError {
    match err {
        PipelineError::Timeout => ResilienceError::Timeout(Duration::from_secs(0)),
        PipelineError::RateLimit => ResilienceError::Transient(err.to_string()),
        PipelineError::ServerError(_) => ResilienceError::Transient(err.to_string()),
        PipelineError::ParseFailure(_) => ResilienceError::Transient(err.to_string()),
        PipelineError::Auth(_)
        | PipelineError::InvalidInput(_)
        | PipelineError::LowValidationPassRate { .. }
        | PipelineError::Cancelled
        | PipelineError::Extraction(_) => ResilienceError::Permanent(err.to_string()),
    }
}

/// Builds the tier-appropriate prompt instructions. The actual prompt text
/// sent to the provider is the adapter's concern; this only documents the
/// strategy difference per tier so call sites and tests stay aligned.
pub fn prompt_strategy(tier: Tier) -> &'static str {
    match tier {
        Tier::Passthrough => "validate only, no rewrite",
        Tier::Light => "minor grammatical adjustment",
        Tier::Heavy => "decompose into independent clauses",
    }
}

/// Runs `normalizer.normalize_raw` behind the shared circuit breaker with a
/// per-call wall-clock timeout, retrying transient failures. On a second
/// consecutive parse failure for the same batch, falls back to returning
/// the original sentence text unchanged (to be filtered later by the
/// Validator) rather than failing the whole chunk.
pub async fn normalize_with_retry(
    normalizer: &dyn Normalizer,
    breaker: &CircuitBreaker,
    sentences: &[String],
    tier: Tier,
    call_timeout: Duration,
) -> Result<Vec<String>, PipelineError> {
    if tier == Tier::Passthrough {
        return Ok(sentences.to_vec());
    }

    let result = breaker
        .execute(|| async {
            let call = normalizer.normalize_raw(sentences, tier);
            match tokio::time::timeout(call_timeout, call).await {
                Ok(inner) => inner.map_err(|e| classify_resilience(&e)),
                Err(_) => Err(ResilienceError::Timeout(call_timeout)),
            }
        })
        .await;

    match result {
        Ok(texts) if texts.len() == sentences.len() => Ok(texts),
        Ok(_) => Ok(sentences.to_vec()),
        Err(ResilienceError::Permanent(msg)) => Err(PipelineError::Auth(msg)),
        Err(ResilienceError::CircuitOpen) => Err(PipelineError::ServerError("circuit open".into())),
        Err(_) => Ok(sentences.to_vec()),
    }
}

/// Normalizes a single sentence as the fallback path after a batch call
/// fails; on failure the caller receives the original text unchanged.
pub async fn normalize_single_with_fallback(
    normalizer: &dyn Normalizer,
    breaker: &CircuitBreaker,
    sentence: &str,
    tier: Tier,
    call_timeout: Duration,
) -> String {
    let batch = vec![sentence.to_string()];
    match normalize_with_retry(normalizer, breaker, &batch, tier, call_timeout).await {
        Ok(mut texts) if !texts.is_empty() => texts.remove(0),
        _ => sentence.to_string(),
    }
}
