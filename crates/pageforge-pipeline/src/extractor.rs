//! `TextExtractor`: the PDF-byte-extraction collaborator. Out of scope per
//! the system's purpose statement — this crate only defines the seam a
//! chunk execution asks through for its page range's raw text.

use async_trait::async_trait;

use crate::error::PipelineError;

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Returns the raw text for `[page_start, page_end)` of the document
    /// referenced by `source_ref` (an opaque pointer the upload transport
    /// assigned at confirm time).
    async fn extract(&self, source_ref: &str, page_start: i64, page_end: i64) -> Result<String, PipelineError>;
}
