//! Boundary adapters for the two collaborators the system purposefully
//! does not implement: PDF byte extraction and LLM-backed normalization.
//! Both traits (`TextExtractor`, `Normalizer`) are defined in the pipeline
//! crate; wiring a real provider in means swapping the adapter `main.rs`
//! constructs here, nothing else in the engine changes.

use async_trait::async_trait;

use pageforge_pipeline::{Normalizer, PipelineError, TextExtractor, Tier};

/// Returns a fixed amount of placeholder text per page, scaled so the
/// chunker/estimator's page-count math stays meaningful end to end without
/// a real PDF decoder wired in.
pub struct PlaceholderExtractor;

#[async_trait]
impl TextExtractor for PlaceholderExtractor {
    async fn extract(&self, source_ref: &str, page_start: i64, page_end: i64) -> Result<String, PipelineError> {
        if page_end <= page_start {
            return Err(PipelineError::Extraction(format!("empty page range for {source_ref}")));
        }
        let page_count = page_end - page_start;
        let mut text = String::new();
        for page in 0..page_count {
            text.push_str(&format!(
                "Ceci est le texte de la page {} du document {source_ref}. Il contient plusieurs phrases. ",
                page_start + page
            ));
        }
        Ok(text)
    }
}

/// Echoes its input back unchanged. A real deployment replaces this with
/// an HTTP client against the configured normalization provider; the
/// pipeline's retry/circuit-breaker/fallback logic does not care which
/// `Normalizer` it's driving.
pub struct EchoNormalizer;

#[async_trait]
impl Normalizer for EchoNormalizer {
    async fn normalize_raw(&self, sentences: &[String], _tier: Tier) -> Result<Vec<String>, PipelineError> {
        Ok(sentences.to_vec())
    }
}
