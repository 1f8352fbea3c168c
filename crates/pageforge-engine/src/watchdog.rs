//! Background reconciliation sweeps: stuck chunks whose claimant died
//! mid-heartbeat, jobs whose fan-in counter reached `total_chunks` but no
//! worker observed it, and terminal jobs whose credit reservation was never
//! refunded. Grounded on `orbit-sentinel::daemon::Sentinel`'s ticking
//! OODA loop, with its repair concurrency cap carried over as a semaphore so
//! a large backlog cannot spawn unbounded repair tasks at once.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use pageforge_store::ChunkOutcome;

use crate::engine::{now_ts, JobEngine};
use crate::error::EngineResult;

impl JobEngine {
    /// Runs the watchdog loop until the process exits; intended to be
    /// spawned once at boot alongside the scheduler.
    pub async fn run_watchdogs(&self) {
        let mut ticker = tokio::time::interval(self.config.watchdog_interval);
        loop {
            ticker.tick().await;
            self.watchdog_sweep().await;
        }
    }

    /// Runs one pass of all three watchdogs. Public so `force_finalize` and
    /// tests can trigger a sweep without waiting on the interval timer.
    pub async fn watchdog_sweep(&self) {
        let semaphore = Arc::new(Semaphore::new(self.config.watchdog_max_concurrent_repairs.max(1)));
        if let Err(err) = self.sweep_stuck_chunks(&semaphore).await {
            error!(%err, "stuck-chunk watchdog sweep failed");
        }
        if let Err(err) = self.sweep_unfinalized_jobs(&semaphore).await {
            error!(%err, "unfinalized-job watchdog sweep failed");
        }
        if let Err(err) = self.sweep_abandoned_reservations(&semaphore).await {
            error!(%err, "abandoned-reservation watchdog sweep failed");
        }
    }

    async fn sweep_stuck_chunks(&self, semaphore: &Arc<Semaphore>) -> EngineResult<()> {
        let stuck = self.store.stuck_chunks(self.config.chunk_stuck_threshold_secs, now_ts()).await?;
        for chunk in stuck {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                warn!("stuck-chunk sweep skipped remaining chunks: repair concurrency cap reached");
                break;
            };
            let engine = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let stale_secs = engine.config.chunk_stuck_threshold_secs;
                if let Err(err) = engine
                    .store
                    .settle_chunk(chunk.id, ChunkOutcome::Failed, None, Some("STUCK".to_string()), Some(format!("heartbeat stale past {stale_secs}s")))
                    .await
                {
                    error!(chunk_id = chunk.id, %err, "failed to force-settle stuck chunk");
                    return;
                }

                if !chunk.retries_exhausted() {
                    if let Err(err) = engine.store.requeue_chunk(chunk.id).await {
                        error!(chunk_id = chunk.id, %err, "failed to requeue stuck chunk");
                        return;
                    }
                    if let Err(err) = engine.enqueue_process_chunk(chunk.job_id, Duration::ZERO).await {
                        error!(chunk_id = chunk.id, %err, "failed to re-enqueue stuck chunk");
                    }
                    info!(chunk_id = chunk.id, job_id = chunk.job_id, "stuck chunk requeued");
                } else if let Err(err) = engine.on_chunk_settled(chunk.job_id).await {
                    error!(job_id = chunk.job_id, %err, "failed to advance fan-in after exhausted stuck chunk");
                }
            });
        }
        Ok(())
    }

    async fn sweep_unfinalized_jobs(&self, semaphore: &Arc<Semaphore>) -> EngineResult<()> {
        let jobs = self.store.unfinalized_jobs().await?;
        for job in jobs {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                warn!("unfinalized-job sweep skipped remaining jobs: repair concurrency cap reached");
                break;
            };
            let engine = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                match engine.finalize(job.id).await {
                    Ok(()) => info!(job_id = job.id, "unfinalized job recovered by watchdog"),
                    Err(err) => error!(job_id = job.id, %err, "watchdog finalize failed"),
                }
            });
        }
        Ok(())
    }

    async fn sweep_abandoned_reservations(&self, semaphore: &Arc<Semaphore>) -> EngineResult<()> {
        let jobs = self.store.abandoned_reservations().await?;
        for job in jobs {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                warn!("abandoned-reservation sweep skipped remaining jobs: repair concurrency cap reached");
                break;
            };
            let engine = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                // `refund_job` itself claims the `refunded` flag atomically, so
                // this sweep can race the normal failure/cancel path without
                // ever double-refunding the same reservation.
                if let Err(err) = engine.refund_job(&job).await {
                    error!(job_id = job.id, %err, "abandoned-reservation refund failed");
                    return;
                }
                info!(job_id = job.id, "abandoned reservation refunded by watchdog");
            });
        }
        Ok(())
    }
}
