use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task exceeded its hard time limit and was aborted")]
    HardTimeout,
    #[error("task observed a soft-timeout cancellation signal")]
    SoftTimeout,
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("scheduler is shutting down, task was not started")]
    ShuttingDown,
    #[error(transparent)]
    Task(#[from] anyhow::Error),
}
