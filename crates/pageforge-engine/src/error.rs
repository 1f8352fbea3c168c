use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("job {0} not found")]
    JobNotFound(i64),
    #[error("job {0} is already in a terminal state")]
    AlreadyTerminal(i64),
    #[error("{0}")]
    InsufficientCredits(pageforge_store::ledger::CreditLedgerError),
    #[error(transparent)]
    Store(#[from] pageforge_store::StoreError),
    #[error(transparent)]
    Scheduler(#[from] pageforge_scheduler::SchedulerError),
}

pub type EngineResult<T> = Result<T, EngineError>;
