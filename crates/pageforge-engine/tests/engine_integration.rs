use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use pageforge_engine::{EngineConfig, JobEngine, StartJobParams};
use pageforge_pipeline::{LinguisticEngine, Normalizer, PipelineError, TextExtractor, Tier};
use pageforge_progress::ProgressChannel;
use pageforge_resilience::CircuitBreaker;
use pageforge_scheduler::{Scheduler, SchedulerConfig};
use pageforge_store::{ChunkPlan, CreditLedger, JobStatus, NewJobParams, SqliteStore, Store};

struct FakeExtractor;
#[async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract(&self, _source_ref: &str, _page_start: i64, _page_end: i64) -> Result<String, PipelineError> {
        Ok("Le chat noir est fatigue aujourd'hui. Il est parti tres loin hier.".to_string())
    }
}

struct SlowExtractor;
#[async_trait]
impl TextExtractor for SlowExtractor {
    async fn extract(&self, _source_ref: &str, _page_start: i64, _page_end: i64) -> Result<String, PipelineError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok("Le chat noir est fatigue aujourd'hui. Il est parti tres loin hier.".to_string())
    }
}

struct FailingExtractor;
#[async_trait]
impl TextExtractor for FailingExtractor {
    async fn extract(&self, _source_ref: &str, _page_start: i64, _page_end: i64) -> Result<String, PipelineError> {
        Err(PipelineError::Extraction("no bytes at source_ref".into()))
    }
}

struct EchoNormalizer;
#[async_trait]
impl Normalizer for EchoNormalizer {
    async fn normalize_raw(&self, sentences: &[String], _tier: Tier) -> Result<Vec<String>, PipelineError> {
        Ok(sentences.to_vec())
    }
}

struct StubLinguisticEngine;
impl LinguisticEngine for StubLinguisticEngine {
    fn segment(&self, text: &str) -> Vec<String> {
        text.split(|c| c == '.' || c == '!' || c == '?').map(|s| s.trim()).filter(|s| !s.is_empty()).map(String::from).collect()
    }
    fn has_conjugated_verb(&self, sentence: &str) -> bool {
        sentence.to_lowercase().contains("est")
    }
}

async fn build_engine(extractor: Arc<dyn TextExtractor>, config: EngineConfig) -> (JobEngine, Arc<dyn Store>) {
    let sqlite_store = SqliteStore::open_in_memory().await.unwrap();
    let pool = sqlite_store.pool().clone();
    let store: Arc<dyn Store> = Arc::new(sqlite_store);

    let ledger = Arc::new(CreditLedger::new(pool, -100));
    let now = chrono::Utc::now().timestamp();
    let month = chrono::DateTime::from_timestamp(now, 0).unwrap().format("%Y-%m").to_string();
    ledger.ensure_monthly_grant("u1", &month, 1_000_000, "v1", now).await.unwrap();

    let scheduler = Arc::new(Scheduler::spawn(SchedulerConfig { concurrency: 4, ..Default::default() }));
    let progress = Arc::new(ProgressChannel::new());
    let breaker = Arc::new(CircuitBreaker::new_default());

    let engine = JobEngine::new(
        store.clone(),
        ledger,
        scheduler,
        progress,
        extractor,
        Some(Arc::new(StubLinguisticEngine) as Arc<dyn LinguisticEngine>),
        Arc::new(EchoNormalizer),
        breaker,
        config,
    );
    (engine, store)
}

fn start_params(page_count: i64) -> StartJobParams {
    StartJobParams {
        user_id: "u1".into(),
        model: "balanced".into(),
        pricing_version: "v1".into(),
        pricing_rate: 1.0,
        estimated_tokens: 1000,
        estimated_credits: 5,
        filename: "doc.pdf".into(),
        source_ref: "upload://doc.pdf".into(),
        page_count,
        reserved_credits: 5,
    }
}

async fn wait_for_terminal(store: &Arc<dyn Store>, job_id: i64) -> pageforge_store::Job {
    let mut job = store.get_job(job_id).await.unwrap().unwrap();
    for _ in 0..100 {
        if job.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        job = store.get_job(job_id).await.unwrap().unwrap();
    }
    job
}

#[tokio::test]
async fn single_chunk_job_completes_inline_and_creates_history() {
    let (engine, store) = build_engine(Arc::new(FakeExtractor), EngineConfig::default()).await;
    let job = engine.start(start_params(10)).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_percent, 100.0);

    let history = store.get_history_by_job(job.id).await.unwrap().unwrap();
    assert!(!history.sentences.is_empty());
    assert_eq!(history.chunk_ids.len(), 1);
}

#[tokio::test]
async fn multi_chunk_job_fans_out_and_eventually_completes() {
    let (engine, store) = build_engine(Arc::new(FakeExtractor), EngineConfig::default()).await;
    // page_count=180 plans exactly 4 chunks (chunker's own seed scenario).
    let job = engine.start(start_params(180)).await.unwrap();

    let reloaded = wait_for_terminal(&store, job.id).await;
    assert_eq!(reloaded.status, JobStatus::Completed);

    let history = store.get_history_by_job(job.id).await.unwrap().unwrap();
    assert_eq!(history.chunk_ids.len(), 4);
}

#[tokio::test]
async fn job_fails_when_every_chunk_fails_extraction() {
    let (engine, store) = build_engine(Arc::new(FailingExtractor), EngineConfig { chunk_max_retries: 0, ..EngineConfig::default() }).await;
    let job = engine.start(start_params(10)).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_code.as_deref(), Some("ALL_CHUNKS_FAILED"));
    assert!(job.refunded);
    assert!(store.get_history_by_job(job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn cancel_before_chunks_settle_refunds_and_skips_history() {
    let (engine, store) = build_engine(Arc::new(SlowExtractor), EngineConfig::default()).await;
    let job = engine.start(start_params(180)).await.unwrap();

    engine.cancel(job.id).await.unwrap();

    let reloaded = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, JobStatus::Cancelled);
    assert!(reloaded.refunded);

    // let any in-flight chunk worker observe the cancellation signal and settle.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let still = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(still.status, JobStatus::Cancelled);
    assert!(store.get_history_by_job(job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn cancelling_an_already_terminal_job_is_rejected() {
    let (engine, _store) = build_engine(Arc::new(FakeExtractor), EngineConfig::default()).await;
    let job = engine.start(start_params(10)).await.unwrap();
    assert!(engine.cancel(job.id).await.is_err());
}

#[tokio::test]
async fn stuck_chunk_watchdog_requeues_and_job_eventually_completes() {
    let config = EngineConfig { chunk_stuck_threshold_secs: 0, chunk_max_retries: 2, ..EngineConfig::default() };
    let (engine, store) = build_engine(Arc::new(FakeExtractor), config).await;

    let now = chrono::Utc::now().timestamp();
    let job = store
        .new_job(NewJobParams {
            user_id: "u1".into(),
            model: "balanced".into(),
            pricing_version: "v1".into(),
            pricing_rate: 1.0,
            estimated_tokens: 100,
            estimated_credits: 1,
            filename: "doc.pdf".into(),
            source_ref: "upload://doc.pdf".into(),
            page_count: 10,
            reserved_credits: 1,
            created_at: now,
        })
        .await
        .unwrap();
    store.transition_job(job.id, JobStatus::Queued).await.unwrap();
    store.transition_job(job.id, JobStatus::Processing).await.unwrap();
    store
        .plan_chunks(job.id, vec![ChunkPlan { chunk_index: 0, page_start: 0, page_end: 10, has_overlap: false }], 2)
        .await
        .unwrap();

    // simulate a worker that claimed the chunk and crashed before settling it.
    let claimed = store.claim_pending_chunk(job.id, "dead-worker").await.unwrap().unwrap();
    assert_eq!(claimed.attempts, 1);

    // timestamps are second-granularity; make sure the heartbeat's second has
    // fully elapsed before the sweep computes its cutoff against "now".
    tokio::time::sleep(Duration::from_millis(1100)).await;
    engine.watchdog_sweep().await;

    let reloaded = wait_for_terminal(&store, job.id).await;
    assert_eq!(reloaded.status, JobStatus::Completed);
}
