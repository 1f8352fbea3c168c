//! Fixed-size worker pool pulling tasks from a shared queue. Each task is
//! given a soft time limit (a `CancellationToken` is tripped so the task can
//! return early at its own stage boundaries) and a hard time limit (the
//! task future is forcibly abandoned). Workers self-recycle after a
//! configured number of tasks or once their process RSS crosses a cap, so a
//! single job cannot accumulate unbounded heap growth across a worker's
//! lifetime.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::SchedulerError;

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), SchedulerError>> + Send>>;
pub type Task = Box<dyn FnOnce(CancellationToken) -> TaskFuture + Send>;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Fixed worker count, matching vCPU count by convention.
    pub concurrency: usize,
    /// Queue depth per worker before `submit` backpressures the caller.
    pub prefetch_per_worker: usize,
    pub soft_timeout: Duration,
    pub hard_timeout: Duration,
    /// A worker exits (and is replaced) after processing this many tasks.
    pub max_tasks_per_worker: u64,
    /// A worker exits (and is replaced) once process RSS exceeds this cap.
    /// `None` disables the RSS check (e.g. on platforms without `/proc`).
    pub max_rss_mb: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            prefetch_per_worker: 4,
            soft_timeout: Duration::from_secs(300),
            hard_timeout: Duration::from_secs(360),
            max_tasks_per_worker: 500,
            max_rss_mb: Some(1024),
        }
    }
}

/// Reads the resident set size of the current process in megabytes, via
/// `/proc/self/statm`. Returns `None` off Linux or if the read fails; the
/// recycling check treats that as "RSS unknown, don't recycle on it".
fn current_rss_mb() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size_kb = 4; // standard 4KiB pages on the platforms this ships to
    Some(resident_pages * page_size_kb / 1024)
}

struct SharedQueue {
    receiver: AsyncMutex<mpsc::Receiver<Task>>,
}

/// Bounded pool of cooperative workers; tasks run off the request path.
pub struct Scheduler {
    sender: mpsc::Sender<Task>,
    config: SchedulerConfig,
    tasks_submitted: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn spawn(config: SchedulerConfig) -> Self {
        let capacity = (config.concurrency * config.prefetch_per_worker).max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let queue = Arc::new(SharedQueue { receiver: AsyncMutex::new(receiver) });
        let tasks_submitted = Arc::new(AtomicU64::new(0));

        for worker_id in 0..config.concurrency.max(1) {
            let queue = queue.clone();
            let config = config.clone();
            tokio::spawn(async move {
                run_worker_generation(worker_id, queue, config).await;
            });
        }

        Self { sender, config, tasks_submitted }
    }

    /// Enqueues a task; backpressures (awaits) once every worker's prefetch
    /// slot is full, rather than growing the queue unboundedly.
    pub async fn submit(&self, task: Task) -> Result<(), SchedulerError> {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
        self.sender.send(task).await.map_err(|_| SchedulerError::ShuttingDown)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn submitted_count(&self) -> u64 {
        self.tasks_submitted.load(Ordering::Relaxed)
    }
}

/// Runs one worker "generation": a loop that pulls tasks until it hits its
/// recycle threshold, then returns so a fresh generation can be spawned in
/// its place, the async analogue of the teacher's blocking-thread recycling.
async fn run_worker_generation(worker_id: usize, queue: Arc<SharedQueue>, config: SchedulerConfig) {
    loop {
        let mut processed = 0u64;
        run_worker_slot(worker_id, &queue, &config, &mut processed).await;
        info!(worker_id, processed, "worker slot recycled, respawning");
    }
}

#[instrument(skip(queue, config, processed), fields(worker_id))]
async fn run_worker_slot(worker_id: usize, queue: &Arc<SharedQueue>, config: &SchedulerConfig, processed: &mut u64) {
    loop {
        let task = {
            let mut receiver = queue.receiver.lock().await;
            receiver.recv().await
        };
        let Some(task) = task else {
            return;
        };

        let token = CancellationToken::new();
        let outcome = run_with_limits(task(token.clone()), config.soft_timeout, config.hard_timeout, &token).await;
        if let Err(err) = outcome {
            warn!(worker_id, %err, "task ended in error");
        }

        *processed += 1;
        if *processed >= config.max_tasks_per_worker {
            info!(worker_id, processed, "task count recycle threshold reached");
            return;
        }
        if let Some(cap) = config.max_rss_mb {
            if let Some(rss) = current_rss_mb() {
                if rss > cap {
                    warn!(worker_id, rss_mb = rss, cap_mb = cap, "memory recycle threshold reached");
                    return;
                }
            }
        }
    }
}

/// Races the task against the soft timeout (tripping `token` so the task can
/// observe cancellation at its own stage boundaries) and then against the
/// remaining hard timeout budget, after which the task future is dropped.
async fn run_with_limits(
    fut: TaskFuture,
    soft: Duration,
    hard: Duration,
    token: &CancellationToken,
) -> Result<(), SchedulerError> {
    tokio::pin!(fut);
    let soft_sleep = tokio::time::sleep(soft);
    tokio::pin!(soft_sleep);

    tokio::select! {
        res = &mut fut => return res,
        _ = &mut soft_sleep => {
            warn!("task exceeded its soft time limit, signalling cancellation");
            token.cancel();
        }
    }

    let hard_remaining = hard.saturating_sub(soft);
    match tokio::time::timeout(hard_remaining, fut).await {
        Ok(res) => res,
        Err(_) => Err(SchedulerError::HardTimeout),
    }
}
