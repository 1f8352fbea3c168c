//! `JobEngine`: the orchestrator tying a Job's lifecycle to the Store,
//! the Pipeline's pure stages, the Scheduler's worker pool, and the
//! Progress channel's pub/sub. Grounded on `orbit-web::reactor::Reactor`'s
//! claim-and-spawn loop, generalized from "one reactor polling one pending
//! transfer" to "fan out N chunks per job, fan back in on the last one".

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use pageforge_pipeline::{run_chunk_pipeline, LinguisticEngine, Normalizer, TextExtractor};
use pageforge_progress::{JobSnapshotSource, ProgressChannel, ProgressEvent, ProgressSnapshot};
use pageforge_resilience::CircuitBreaker;
use pageforge_store::{
    ChunkOutcome, ChunkPlan, ChunkStatus, CreditLedger, Job, JobChunk, JobStatus, NewJobParams, Sentence, Store,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Parameters for starting a new job, mirroring `ControlAPI::confirm`'s
/// inputs once credits have already been reserved by the caller.
#[derive(Debug, Clone)]
pub struct StartJobParams {
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
}

pub struct JobEngine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) ledger: Arc<CreditLedger>,
    pub(crate) scheduler: Arc<pageforge_scheduler::Scheduler>,
    pub(crate) progress: Arc<ProgressChannel>,
    extractor: Arc<dyn TextExtractor>,
    linguistic: Option<Arc<dyn LinguisticEngine>>,
    normalizer: Arc<dyn Normalizer>,
    breaker: Arc<CircuitBreaker>,
    pub(crate) config: EngineConfig,
    cancelled_jobs: Arc<RwLock<HashSet<i64>>>,
}

impl Clone for JobEngine {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            scheduler: self.scheduler.clone(),
            progress: self.progress.clone(),
            extractor: self.extractor.clone(),
            linguistic: self.linguistic.clone(),
            normalizer: self.normalizer.clone(),
            breaker: self.breaker.clone(),
            config: self.config.clone(),
            cancelled_jobs: self.cancelled_jobs.clone(),
        }
    }
}

impl JobEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<CreditLedger>,
        scheduler: Arc<pageforge_scheduler::Scheduler>,
        progress: Arc<ProgressChannel>,
        extractor: Arc<dyn TextExtractor>,
        linguistic: Option<Arc<dyn LinguisticEngine>>,
        normalizer: Arc<dyn Normalizer>,
        breaker: Arc<CircuitBreaker>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            scheduler,
            progress,
            extractor,
            linguistic,
            normalizer,
            breaker,
            config,
            cancelled_jobs: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Creates the Job row, reserves credits against the ledger, plans
    /// chunks, transitions to `processing`, and fans the chunks out. The
    /// single-chunk case skips the scheduler entirely and runs inline, so a
    /// short document never pays queueing latency for its only unit of work.
    #[instrument(skip(self, params))]
    pub async fn start(&self, params: StartJobParams) -> EngineResult<Job> {
        let now = now_ts();
        let job = self
            .store
            .new_job(NewJobParams {
                user_id: params.user_id.clone(),
                model: params.model,
                pricing_version: params.pricing_version.clone(),
                pricing_rate: params.pricing_rate,
                estimated_tokens: params.estimated_tokens,
                estimated_credits: params.estimated_credits,
                filename: params.filename,
                source_ref: params.source_ref,
                page_count: params.page_count,
                reserved_credits: params.reserved_credits,
                created_at: now,
            })
            .await?;

        let month = month_key(now);
        self.ledger
            .reserve(&params.user_id, job.id, params.reserved_credits, &month, &params.pricing_version, now)
            .await?
            .map_err(EngineError::InsufficientCredits)?;

        self.store.transition_job(job.id, JobStatus::Queued).await?;
        self.store.update_progress(job.id, 5.0, "Planning").await?;

        let planned = pageforge_pipeline::plan(params.page_count);
        let plans: Vec<ChunkPlan> = planned
            .iter()
            .map(|p| ChunkPlan { chunk_index: p.chunk_index, page_start: p.page_start, page_end: p.page_end, has_overlap: p.has_overlap })
            .collect();
        let total_chunks = plans.len();
        self.store.plan_chunks(job.id, plans, self.config.chunk_max_retries).await?;

        self.store.transition_job(job.id, JobStatus::Processing).await?;
        self.store.update_progress(job.id, 15.0, "Normalizing").await?;
        if let Some(job) = self.store.get_job(job.id).await? {
            self.publish_snapshot(&job).await;
        }

        if total_chunks == 1 {
            self.process_chunk(job.id).await?;
        } else {
            for _ in 0..total_chunks {
                self.enqueue_process_chunk(job.id, Duration::ZERO).await?;
            }
        }

        self.store.get_job(job.id).await?.ok_or(EngineError::JobNotFound(job.id))
    }

    /// Claims whatever chunk is next pending for `job_id` and runs it
    /// through the pipeline. The Store's `claim_pending_chunk` is scoped to
    /// a job, not a specific chunk, so this is the unit of work a scheduler
    /// task (or the single-chunk fast path in `start`) actually performs.
    #[instrument(skip(self))]
    pub async fn process_chunk(&self, job_id: i64) -> EngineResult<()> {
        let worker_id = worker_id();
        let Some(chunk) = self.store.claim_pending_chunk(job_id, &worker_id).await? else {
            return Ok(());
        };

        if self.is_cancelled(job_id).await {
            self.store
                .settle_chunk(chunk.id, ChunkOutcome::Failed, None, Some("CANCELLED".into()), Some("job cancelled before chunk ran".into()))
                .await?;
            return self.on_chunk_settled(job_id).await;
        }

        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(());
        };

        let cancelled_jobs = self.cancelled_jobs.clone();
        let is_cancelled = move || cancelled_jobs.try_read().map(|set| set.contains(&job_id)).unwrap_or(false);

        let extracted = self.extractor.extract(&job.source_ref, chunk.page_start, chunk.page_end).await;
        let chunk_text = match extracted {
            Ok(text) => text,
            Err(err) => return self.handle_chunk_failure(job_id, &chunk, err).await,
        };

        let result = run_chunk_pipeline(
            &chunk_text,
            self.linguistic.clone(),
            self.normalizer.as_ref(),
            &self.breaker,
            &self.config.router_config,
            &self.config.validator_config,
            self.config.chunk_call_timeout,
            &is_cancelled,
        )
        .await;

        match result {
            Ok(output) => {
                let actual_tokens = approximate_tokens(&output.accepted);
                let sentences: Vec<Sentence> = output
                    .accepted
                    .into_iter()
                    .enumerate()
                    .map(|(position, text)| Sentence { text, original_ref: None, source_chunk_id: chunk.id, position: position as i64 })
                    .collect();
                let payload = serde_json::json!({ "sentences": sentences, "stats": output.stats });
                let result_ref = format!("blake3:{}", blake3::hash(payload.to_string().as_bytes()).to_hex());
                self.store.save_chunk_result(&result_ref, chunk.id, payload, actual_tokens).await?;
                self.store.settle_chunk(chunk.id, ChunkOutcome::Succeeded, Some(result_ref), None, None).await?;
                self.on_chunk_settled(job_id).await
            }
            Err(err) => self.handle_chunk_failure(job_id, &chunk, err).await,
        }
    }

    async fn handle_chunk_failure(&self, job_id: i64, chunk: &JobChunk, err: pageforge_pipeline::PipelineError) -> EngineResult<()> {
        let (code, transient) = classify_chunk_failure(&err);
        let retryable = transient && !chunk.retries_exhausted();
        let persisted_code = if transient && !retryable { "NORMALIZE_EXHAUSTED" } else { code };

        self.store
            .settle_chunk(chunk.id, ChunkOutcome::Failed, None, Some(persisted_code.to_string()), Some(err.to_string()))
            .await?;

        if retryable {
            self.store.requeue_chunk(chunk.id).await?;
            let delay = self.config.chunk_retry_base_delay.mul_f64(2f64.powi((chunk.attempts - 1).max(0) as i32));
            self.enqueue_process_chunk(job_id, delay).await?;
            return Ok(());
        }

        warn!(job_id, chunk_id = chunk.id, code = persisted_code, "chunk failed without retry");
        self.on_chunk_settled(job_id).await
    }

    /// Increments the fan-in counter; the worker that observes the counter
    /// reach `total_chunks` is the one that finalizes. Safe under races
    /// because `increment_counter_and_read` is an atomic post-increment and
    /// `finalize` itself is idempotent against being invoked twice.
    pub(crate) async fn on_chunk_settled(&self, job_id: i64) -> EngineResult<()> {
        let new_count = self.store.increment_counter_and_read(job_id).await?;
        let Some(job) = self.store.get_job(job_id).await? else { return Ok(()) };
        if job.status.is_terminal() {
            return Ok(());
        }

        let progress = (15.0 + (new_count as f64 / job.total_chunks.max(1) as f64) * 60.0).min(75.0);
        self.store.update_progress(job_id, progress, "Normalizing").await?;
        if let Some(job) = self.store.get_job(job_id).await? {
            self.publish_snapshot(&job).await;
        }

        if new_count >= job.total_chunks {
            self.finalize(job_id).await?;
        }
        Ok(())
    }

    /// Merges accepted sentences across every succeeded chunk, in
    /// chunk-index order, settles the ledger reservation, and writes the
    /// job's History. A no-op if the job is already terminal (the watchdog's
    /// safety net racing a worker that already finalized) or if any chunk is
    /// still pending/running.
    #[instrument(skip(self))]
    pub async fn finalize(&self, job_id: i64) -> EngineResult<()> {
        let job = self.store.get_job(job_id).await?.ok_or(EngineError::JobNotFound(job_id))?;
        if job.status.is_terminal() {
            return Ok(());
        }

        let mut chunks = self.store.get_chunks(job_id).await?;
        if chunks.iter().any(|c| matches!(c.status, ChunkStatus::Pending | ChunkStatus::Running)) {
            return Ok(());
        }
        chunks.sort_by_key(|c| c.chunk_index);

        let succeeded: Vec<&JobChunk> = chunks.iter().filter(|c| c.status == ChunkStatus::Succeeded).collect();
        if succeeded.is_empty() {
            let error_code = most_frequent_error_code(&chunks).unwrap_or_else(|| "ALL_CHUNKS_FAILED".to_string());
            self.store
                .set_job_failed(job_id, "ALL_CHUNKS_FAILED", &format!("every chunk failed, most frequent error: {error_code}"))
                .await?;
            self.refund_job(&job).await?;
            if let Some(job) = self.store.get_job(job_id).await? {
                self.publish_snapshot(&job).await;
            }
            self.progress.release(job_id).await;
            return Ok(());
        }

        let mut sentences = Vec::new();
        let mut chunk_ids = Vec::new();
        let mut actual_tokens_total = 0i64;
        let mut prev_texts: HashSet<String> = HashSet::new();

        for chunk in &succeeded {
            chunk_ids.push(chunk.id);
            let Some(result_ref) = &chunk.result_ref else { continue };
            let Some((payload, tokens)) = self.store.load_chunk_result(result_ref).await? else { continue };
            actual_tokens_total += tokens;

            let chunk_sentences: Vec<Sentence> = payload.get("sentences").and_then(|v| serde_json::from_value(v.clone()).ok()).unwrap_or_default();
            let mut this_texts = HashSet::new();
            for sentence in chunk_sentences {
                this_texts.insert(sentence.text.clone());
                // overlap-window sentences are deduplicated against the
                // previous chunk by exact text equality, not by page math,
                // since re-segmentation at the boundary can shift offsets.
                if chunk.has_overlap && prev_texts.contains(&sentence.text) {
                    continue;
                }
                sentences.push(sentence);
            }
            prev_texts = this_texts;
        }

        for (position, sentence) in sentences.iter_mut().enumerate() {
            sentence.position = position as i64;
        }

        let actual_credits = ((actual_tokens_total as f64 / 1000.0) * job.pricing_rate).ceil() as i64;
        self.store.set_job_actuals(job_id, actual_tokens_total, actual_credits).await?;

        let now = now_ts();
        self.store
            .create_history(job_id, &job.user_id, &job.filename, sentences, chunk_ids, serde_json::json!({ "model": job.model }), now)
            .await?;
        self.store.transition_job(job_id, JobStatus::Completed).await?;

        let month = month_key(now);
        self.ledger.finalize_adjust(&job.user_id, job_id, job.reserved_credits, actual_credits, &month, &job.pricing_version, now).await?;

        self.store.update_progress(job_id, 100.0, "Completed").await?;
        if let Some(job) = self.store.get_job(job_id).await? {
            self.publish_snapshot(&job).await;
        }
        self.progress.release(job_id).await;
        info!(job_id, actual_tokens_total, actual_credits, "job finalized");
        Ok(())
    }

    /// Marks a not-yet-terminal job cancelled, refunds its reservation, and
    /// signals in-flight chunk workers via `cancelled_jobs` so they stop at
    /// their next stage boundary. A chunk that completes before observing
    /// the signal still settles normally; its result is simply never merged
    /// since `finalize` is never reached for a job already terminal.
    #[instrument(skip(self))]
    pub async fn cancel(&self, job_id: i64) -> EngineResult<()> {
        let job = self.store.get_job(job_id).await?.ok_or(EngineError::JobNotFound(job_id))?;
        if job.status.is_terminal() {
            return Err(EngineError::AlreadyTerminal(job_id));
        }

        self.cancelled_jobs.write().await.insert(job_id);
        self.store.transition_job(job_id, JobStatus::Cancelled).await?;
        self.refund_job(&job).await?;

        if let Some(job) = self.store.get_job(job_id).await? {
            self.publish_snapshot(&job).await;
        }
        self.cancelled_jobs.write().await.remove(&job_id);
        self.progress.release(job_id).await;
        Ok(())
    }

    /// Privileged escape hatch: re-runs the unfinalized-job check for one
    /// job immediately instead of waiting for the watchdog's next tick.
    pub async fn force_finalize(&self, job_id: i64) -> EngineResult<()> {
        self.finalize(job_id).await
    }

    pub(crate) async fn is_cancelled(&self, job_id: i64) -> bool {
        self.cancelled_jobs.read().await.contains(&job_id)
    }

    /// Refunds `job`'s reservation exactly once. `claim_refund` is the
    /// single gate: it wins the flip at most once per job, so a watchdog
    /// sweep racing this same call (the job failed/cancelled path and the
    /// abandoned-reservation sweep both land here) can never append a
    /// second `refund` delta for the same reservation.
    pub(crate) async fn refund_job(&self, job: &Job) -> EngineResult<()> {
        if !self.store.claim_refund(job.id).await? {
            return Ok(());
        }
        let now = now_ts();
        let month = month_key(now);
        let reserved = self.ledger.reserved_amount_for_job(job.id).await?;
        self.ledger.refund(&job.user_id, job.id, reserved, &month, &job.pricing_version, now).await?;
        Ok(())
    }

    pub(crate) async fn publish_snapshot(&self, job: &Job) {
        self.progress.publish(ProgressEvent::Progress(job_snapshot(job))).await;
    }

    /// Enqueues `process_chunk(job_id)` on the scheduler, after `delay` if
    /// nonzero. Backoff sleeps happen off the scheduler's worker slots (a
    /// `tokio::spawn` timer, not an occupied prefetch slot) so a chunk
    /// waiting out its retry delay cannot starve other jobs' work.
    pub(crate) async fn enqueue_process_chunk(&self, job_id: i64, delay: Duration) -> EngineResult<()> {
        if delay.is_zero() {
            let engine = self.clone();
            self.scheduler
                .submit(Box::new(move |_token| {
                    Box::pin(async move {
                        if let Err(err) = engine.process_chunk(job_id).await {
                            warn!(job_id, %err, "process_chunk task failed");
                        }
                        Ok(())
                    })
                }))
                .await?;
            return Ok(());
        }

        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = engine.enqueue_process_chunk(job_id, Duration::ZERO).await {
                warn!(job_id, %err, "failed to re-enqueue chunk after backoff delay");
            }
        });
        Ok(())
    }
}

/// Adapts the Store's Job lookup to the Progress crate's snapshot source
/// seam, so `ProgressChannel::subscribe` can hand a late joiner current
/// state without the progress crate depending on persistence.
pub struct StoreSnapshotSource(pub Arc<dyn Store>);

#[async_trait]
impl JobSnapshotSource for StoreSnapshotSource {
    async fn snapshot(&self, job_id: i64) -> Option<ProgressSnapshot> {
        let job = self.0.get_job(job_id).await.ok().flatten()?;
        Some(job_snapshot(&job))
    }
}

pub(crate) fn job_snapshot(job: &Job) -> ProgressSnapshot {
    ProgressSnapshot {
        job_id: job.id,
        status: job.status.to_string(),
        progress_percent: job.progress_percent,
        current_step: job.current_step.clone(),
        completed_chunks: job.completed_chunks,
        total_chunks: job.total_chunks,
        timestamp: now_ts(),
    }
}

/// Maps a pipeline failure to its persisted error code. Whether it is
/// eligible for the chunk's remaining retry budget is `PipelineError`'s own
/// `is_transient()` call, kept as the single source of truth rather than
/// re-derived here.
fn classify_chunk_failure(err: &pageforge_pipeline::PipelineError) -> (&'static str, bool) {
    use pageforge_pipeline::PipelineError;
    let code = match err {
        PipelineError::Timeout => "NORMALIZE_TIMEOUT",
        PipelineError::RateLimit => "NORMALIZE_RATE_LIMIT",
        PipelineError::ServerError(_) => "NORMALIZE_SERVER_ERROR",
        PipelineError::ParseFailure(_) => "NORMALIZE_PARSE",
        PipelineError::Auth(_) => "NORMALIZE_AUTH",
        PipelineError::InvalidInput(_) => "INVALID_INPUT",
        PipelineError::LowValidationPassRate { .. } => "LOW_VALIDATION_PASS_RATE",
        PipelineError::Cancelled => "CANCELLED",
        PipelineError::Extraction(_) => "EXTRACTION_FAILED",
        PipelineError::StageWorkerPanicked(_) => "STAGE_WORKER_PANICKED",
    };
    (code, err.is_transient())
}

/// Token-usage telemetry is not part of the `Normalizer` trait's surface
/// (the LLM provider is out of scope), so actual token counts are
/// approximated from the accepted sentence text's word count rather than
/// read off a provider response.
fn approximate_tokens(accepted: &[String]) -> i64 {
    accepted.iter().map(|s| s.split_whitespace().count() as i64).sum()
}

fn most_frequent_error_code(chunks: &[JobChunk]) -> Option<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for chunk in chunks {
        if let Some(code) = &chunk.last_error_code {
            *counts.entry(code.clone()).or_insert(0) += 1;
        }
    }
    counts.into_iter().max_by_key(|(_, n)| *n).map(|(code, _)| code)
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) fn month_key(now: i64) -> String {
    chrono::DateTime::from_timestamp(now, 0).map(|dt| dt.format("%Y-%m").to_string()).unwrap_or_else(|| "1970-01".to_string())
}

fn worker_id() -> String {
    use rand::Rng;
    let suffix: u32 = rand::rng().random();
    format!("worker-{suffix:08x}")
}
