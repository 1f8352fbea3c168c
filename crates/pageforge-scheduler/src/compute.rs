//! The "Air Gap": offloads CPU-bound pipeline stages (sentence segmentation,
//! validation) onto Tokio's blocking thread pool so they never starve the
//! async reactor that workers use for heartbeats and progress publication.

use tokio::task;

use crate::error::SchedulerError;

pub async fn offload_compute<F, T>(task: F) -> Result<T, SchedulerError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(task).await.map_err(|join_err| SchedulerError::Panicked(join_err.to_string()))
}
