use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum PipelineError {
    #[error("normalize call timed out")]
    Timeout,
    #[error("provider rate limit signalled")]
    RateLimit,
    #[error("provider returned a server error: {0}")]
    ServerError(String),
    #[error("output failed to parse as a JSON list of strings: {0}")]
    ParseFailure(String),
    #[error("authentication or quota failure: {0}")]
    Auth(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("chunk acceptance rate {accepted}/{total} is below the configured floor")]
    LowValidationPassRate { accepted: usize, total: usize },

    #[error("cancellation observed at a pipeline stage boundary")]
    Cancelled,

    #[error("text extraction failed: {0}")]
    Extraction(String),

    #[error("a CPU-bound pipeline stage panicked on the blocking pool: {0}")]
    StageWorkerPanicked(String),
}

impl PipelineError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::Timeout
                | PipelineError::RateLimit
                | PipelineError::ServerError(_)
                | PipelineError::ParseFailure(_)
        )
    }
}
