//! Typed, transactional persistence for Jobs, JobChunks, the CreditLedger
//! and History. The `Store` trait is the boundary the JobEngine and
//! CreditLedger callers depend on; `backends::sqlite::SqliteStore` is the
//! only implementation, backed by a WAL-mode SQLite pool.

pub mod error;
pub mod ledger;
pub mod types;

pub mod backends {
    pub mod sqlite;
}

pub use backends::sqlite::SqliteStore;
pub use error::{StoreError, StoreResult};
pub use ledger::CreditLedger;
pub use types::*;

use async_trait::async_trait;

/// Parameters needed to create a new Job row. Planning (chunk rows) happens
/// separately via `plan_chunks`, in the JobEngine's `start` step.
#[derive(Debug, Clone)]
pub struct NewJobParams {
    pub user_id: String,
    pub model: String,
    pub pricing_version: String,
    pub pricing_rate: f64,
    pub estimated_tokens: i64,
    pub estimated_credits: i64,
    pub filename: String,
    pub source_ref: String,
    pub page_count: i64,
    pub reserved_credits: i64,
    pub created_at: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn new_job(&self, params: NewJobParams) -> StoreResult<Job>;
    async fn get_job(&self, job_id: i64) -> StoreResult<Option<Job>>;
    async fn plan_chunks(&self, job_id: i64, plans: Vec<ChunkPlan>, max_retries: i64) -> StoreResult<()>;
    async fn transition_job(&self, job_id: i64, status: JobStatus) -> StoreResult<()>;
    async fn set_job_failed(&self, job_id: i64, error_code: &str, error_message: &str) -> StoreResult<()>;
    async fn update_progress(&self, job_id: i64, progress_percent: f64, current_step: &str) -> StoreResult<()>;
    async fn set_job_actuals(&self, job_id: i64, actual_tokens: i64, actual_credits: i64) -> StoreResult<()>;

    /// Atomically flips `refunded` from false to true and reports whether
    /// *this* call won the flip. Callers must only append the ledger's
    /// `refund` delta when this returns `true` — it is the single gate that
    /// keeps the normal failure/cancel path and the abandoned-reservation
    /// watchdog from both refunding the same job's reservation.
    async fn claim_refund(&self, job_id: i64) -> StoreResult<bool>;

    /// Atomically selects one pending chunk for this job, marks it running,
    /// stamps `started_at`/`heartbeat_at`, and increments `attempts`. Uses
    /// row-level locking so two workers cannot claim the same chunk.
    async fn claim_pending_chunk(&self, job_id: i64, worker_id: &str) -> StoreResult<Option<JobChunk>>;

    /// Updates `heartbeat_at`; fails if the chunk is not owned by `worker_id`
    /// or is not running.
    async fn heartbeat(&self, chunk_id: i64, worker_id: &str) -> StoreResult<()>;

    /// Transitions running -> {succeeded|failed} and stamps `finished_at`.
    async fn settle_chunk(
        &self,
        chunk_id: i64,
        outcome: ChunkOutcome,
        result_ref: Option<String>,
        error_code: Option<String>,
        error: Option<String>,
    ) -> StoreResult<()>;

    /// Resets a chunk back to `pending` for re-enqueue after a transient
    /// failure. Attempts is left untouched (it was already incremented by
    /// the claim that just failed).
    async fn requeue_chunk(&self, chunk_id: i64) -> StoreResult<()>;

    /// Atomic post-increment of `completed_chunks`, returning the new value.
    async fn increment_counter_and_read(&self, job_id: i64) -> StoreResult<i64>;

    async fn get_chunks(&self, job_id: i64) -> StoreResult<Vec<JobChunk>>;
    async fn get_chunk(&self, chunk_id: i64) -> StoreResult<Option<JobChunk>>;

    async fn create_history(
        &self,
        job_id: i64,
        user_id: &str,
        filename: &str,
        sentences: Vec<Sentence>,
        chunk_ids: Vec<i64>,
        settings_snapshot: serde_json::Value,
        created_at: i64,
    ) -> StoreResult<History>;

    async fn get_history_by_job(&self, job_id: i64) -> StoreResult<Option<History>>;

    /// Chunks in `running` whose heartbeat is older than `stuck_threshold_secs`.
    async fn stuck_chunks(&self, stuck_threshold_secs: i64, now: i64) -> StoreResult<Vec<JobChunk>>;

    /// Jobs in `processing` with `completed_chunks == total_chunks` but no History.
    async fn unfinalized_jobs(&self) -> StoreResult<Vec<Job>>;

    /// Terminal jobs (failed/cancelled) whose reservation was never refunded.
    async fn abandoned_reservations(&self) -> StoreResult<Vec<Job>>;

    /// Persists the opaque payload a successful chunk's `result_ref` points
    /// at (the validated sentence list plus per-stage counters).
    async fn save_chunk_result(&self, result_ref: &str, chunk_id: i64, payload: serde_json::Value, actual_tokens: i64) -> StoreResult<()>;

    async fn load_chunk_result(&self, result_ref: &str) -> StoreResult<Option<(serde_json::Value, i64)>>;
}
