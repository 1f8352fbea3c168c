use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job {0} not found")]
    JobNotFound(i64),

    #[error("chunk {0} not found")]
    ChunkNotFound(i64),

    #[error("chunk {chunk_id} is not owned by worker {worker_id} or is not running")]
    NotOwnedByWorker { chunk_id: i64, worker_id: String },

    #[error("retry budget exhausted for a transient store failure: {0}")]
    RetriesExhausted(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
