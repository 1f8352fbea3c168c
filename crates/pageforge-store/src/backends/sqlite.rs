//! SQLite-backed `Store` implementation. The atomic claim uses the same
//! `UPDATE ... WHERE rowid = (SELECT ... LIMIT 1) RETURNING` idiom the
//! teacher's job-state crate uses to let concurrent workers race for chunks
//! without ever double-claiming one.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use pageforge_resilience::{CircuitBreaker, CircuitBreakerConfig, ResilienceError};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use crate::error::{StoreError, StoreResult};
use crate::types::*;
use crate::{NewJobParams, Store};

pub struct SqliteStore {
    pool: SqlitePool,
    breaker: CircuitBreaker,
}

fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = db_err.message().to_ascii_lowercase();
            msg.contains("locked") || msg.contains("busy")
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        _ => false,
    }
}

impl SqliteStore {
    pub async fn open(path: &str) -> StoreResult<Self> {
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(&url)
            .await?;
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            StoreError::RetriesExhausted(format!("migration failed: {e}"))
        })?;
        Ok(Self {
            pool,
            breaker: CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: 8,
                max_retries: 5,
                initial_backoff: Duration::from_millis(20),
                max_backoff: Duration::from_millis(500),
                ..Default::default()
            }),
        })
    }

    pub async fn open_in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            StoreError::RetriesExhausted(format!("migration failed: {e}"))
        })?;
        Ok(Self {
            pool,
            breaker: CircuitBreaker::new_default(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Retries the given unit of work on transient SQLite contention
    /// (`database is locked`/`SQLITE_BUSY`) with exponential backoff,
    /// surfacing any other failure immediately. A transient failure means
    /// the attempt's transaction never committed, so replaying the whole
    /// closure has no double-effect. This is `safe_commit`.
    async fn safe_commit<F, Fut, T>(&self, op: F) -> StoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        let result = self
            .breaker
            .execute(|| async {
                op().await.map_err(|e| {
                    if is_transient(&e) {
                        ResilienceError::Transient(e.to_string())
                    } else {
                        ResilienceError::Permanent(e.to_string())
                    }
                })
            })
            .await;
        result.map_err(|e| match e {
            ResilienceError::Permanent(msg) => StoreError::Database(sqlx::Error::Protocol(msg)),
            other => StoreError::RetriesExhausted(other.to_string()),
        })
    }
}

fn row_to_job(row: &SqliteRow) -> StoreResult<Job> {
    let status: String = row.try_get("status")?;
    Ok(Job {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        status: JobStatus::from_str(&status).map_err(StoreError::InvalidTransition)?,
        total_chunks: row.try_get("total_chunks")?,
        completed_chunks: row.try_get("completed_chunks")?,
        progress_percent: row.try_get("progress_percent")?,
        current_step: row.try_get("current_step")?,
        model: row.try_get("model")?,
        pricing_version: row.try_get("pricing_version")?,
        pricing_rate: row.try_get("pricing_rate")?,
        estimated_tokens: row.try_get("estimated_tokens")?,
        estimated_credits: row.try_get("estimated_credits")?,
        actual_tokens: row.try_get("actual_tokens")?,
        actual_credits: row.try_get("actual_credits")?,
        error_code: row.try_get("error_code")?,
        error_message: row.try_get("error_message")?,
        filename: row.try_get("filename")?,
        source_ref: row.try_get("source_ref")?,
        page_count: row.try_get("page_count")?,
        reserved_credits: row.try_get("reserved_credits")?,
        refunded: row.try_get::<i64, _>("refunded")? != 0,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn row_to_chunk(row: &SqliteRow) -> StoreResult<JobChunk> {
    let status: String = row.try_get("status")?;
    Ok(JobChunk {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        chunk_index: row.try_get("chunk_index")?,
        page_start: row.try_get("page_start")?,
        page_end: row.try_get("page_end")?,
        has_overlap: row.try_get::<i64, _>("has_overlap")? != 0,
        status: ChunkStatus::from_str(&status).map_err(StoreError::InvalidTransition)?,
        attempts: row.try_get("attempts")?,
        max_retries: row.try_get("max_retries")?,
        last_error_code: row.try_get("last_error_code")?,
        last_error: row.try_get("last_error")?,
        result_ref: row.try_get("result_ref")?,
        claimed_by: row.try_get("claimed_by")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        heartbeat_at: row.try_get("heartbeat_at")?,
    })
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip(self, params))]
    async fn new_job(&self, params: NewJobParams) -> StoreResult<Job> {
        let created_at = params.created_at;
        let id: i64 = sqlx::query(
            r#"INSERT INTO jobs
                (user_id, status, total_chunks, completed_chunks, progress_percent,
                 current_step, model, pricing_version, pricing_rate, estimated_tokens,
                 estimated_credits, filename, source_ref, page_count, reserved_credits, refunded, created_at)
               VALUES (?, 'pending', 0, 0, 0, '', ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)"#,
        )
        .bind(&params.user_id)
        .bind(&params.model)
        .bind(&params.pricing_version)
        .bind(params.pricing_rate)
        .bind(params.estimated_tokens)
        .bind(params.estimated_credits)
        .bind(&params.filename)
        .bind(&params.source_ref)
        .bind(params.page_count)
        .bind(params.reserved_credits)
        .bind(created_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.get_job(id).await?.ok_or(StoreError::JobNotFound(id))
    }

    async fn get_job(&self, job_id: i64) -> StoreResult<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    #[instrument(skip(self, plans))]
    async fn plan_chunks(&self, job_id: i64, plans: Vec<ChunkPlan>, max_retries: i64) -> StoreResult<()> {
        let total = plans.len() as i64;
        let mut tx = self.pool.begin().await?;
        for plan in &plans {
            sqlx::query(
                r#"INSERT INTO job_chunks
                    (job_id, chunk_index, page_start, page_end, has_overlap, status, attempts, max_retries)
                   VALUES (?, ?, ?, ?, ?, 'pending', 0, ?)"#,
            )
            .bind(job_id)
            .bind(plan.chunk_index)
            .bind(plan.page_start)
            .bind(plan.page_end)
            .bind(plan.has_overlap as i64)
            .bind(max_retries)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("UPDATE jobs SET total_chunks = ? WHERE id = ?")
            .bind(total)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn transition_job(&self, job_id: i64, status: JobStatus) -> StoreResult<()> {
        let now = now_ts();
        match status {
            JobStatus::Processing => {
                sqlx::query("UPDATE jobs SET status = ?, started_at = COALESCE(started_at, ?) WHERE id = ?")
                    .bind(status.to_string())
                    .bind(now)
                    .bind(job_id)
                    .execute(&self.pool)
                    .await?;
            }
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                sqlx::query("UPDATE jobs SET status = ?, completed_at = ? WHERE id = ?")
                    .bind(status.to_string())
                    .bind(now)
                    .bind(job_id)
                    .execute(&self.pool)
                    .await?;
            }
            _ => {
                sqlx::query("UPDATE jobs SET status = ? WHERE id = ?")
                    .bind(status.to_string())
                    .bind(job_id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn set_job_failed(&self, job_id: i64, error_code: &str, error_message: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', error_code = ?, error_message = ?, completed_at = ? WHERE id = ?",
        )
        .bind(error_code)
        .bind(error_message)
        .bind(now_ts())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_progress(&self, job_id: i64, progress_percent: f64, current_step: &str) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET progress_percent = ?, current_step = ? WHERE id = ?")
            .bind(progress_percent)
            .bind(current_step)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_job_actuals(&self, job_id: i64, actual_tokens: i64, actual_credits: i64) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET actual_tokens = ?, actual_credits = ? WHERE id = ?")
            .bind(actual_tokens)
            .bind(actual_credits)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// `WHERE refunded = 0` makes the flip itself the compare-and-swap: two
    /// concurrent callers (a worker settling a chunk failure and the
    /// abandoned-reservation watchdog sweeping the same job) can both race
    /// to run this statement, but only one `UPDATE` can match the row while
    /// it is still unrefunded, so only one ever sees `rows_affected() == 1`.
    async fn claim_refund(&self, job_id: i64) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE jobs SET refunded = 1 WHERE id = ? AND refunded = 0")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn claim_pending_chunk(&self, job_id: i64, worker_id: &str) -> StoreResult<Option<JobChunk>> {
        let now = now_ts();
        let row = self
            .safe_commit(|| {
                sqlx::query(
                    r#"UPDATE job_chunks
                       SET status = 'running', attempts = attempts + 1, claimed_by = ?,
                           started_at = ?, heartbeat_at = ?
                       WHERE rowid = (
                           SELECT rowid FROM job_chunks
                           WHERE job_id = ? AND status = 'pending'
                           ORDER BY chunk_index ASC
                           LIMIT 1
                       )
                       RETURNING *"#,
                )
                .bind(worker_id)
                .bind(now)
                .bind(now)
                .bind(job_id)
                .fetch_optional(&self.pool)
            })
            .await?;
        row.as_ref().map(row_to_chunk).transpose()
    }

    async fn heartbeat(&self, chunk_id: i64, worker_id: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE job_chunks SET heartbeat_at = ? WHERE id = ? AND claimed_by = ? AND status = 'running'",
        )
        .bind(now_ts())
        .bind(chunk_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotOwnedByWorker {
                chunk_id,
                worker_id: worker_id.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, result_ref, error))]
    async fn settle_chunk(
        &self,
        chunk_id: i64,
        outcome: ChunkOutcome,
        result_ref: Option<String>,
        error_code: Option<String>,
        error: Option<String>,
    ) -> StoreResult<()> {
        let status = match outcome {
            ChunkOutcome::Succeeded => ChunkStatus::Succeeded,
            ChunkOutcome::Failed => ChunkStatus::Failed,
        };
        sqlx::query(
            r#"UPDATE job_chunks
               SET status = ?, result_ref = ?, last_error_code = ?, last_error = ?, finished_at = ?
               WHERE id = ? AND status = 'running'"#,
        )
        .bind(status.to_string())
        .bind(result_ref)
        .bind(error_code)
        .bind(error)
        .bind(now_ts())
        .bind(chunk_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn requeue_chunk(&self, chunk_id: i64) -> StoreResult<()> {
        sqlx::query(
            "UPDATE job_chunks SET status = 'pending', claimed_by = NULL, started_at = NULL, heartbeat_at = NULL WHERE id = ?",
        )
        .bind(chunk_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_counter_and_read(&self, job_id: i64) -> StoreResult<i64> {
        self.safe_commit(|| async move {
            let mut tx = self.pool.begin().await?;
            sqlx::query("UPDATE jobs SET completed_chunks = completed_chunks + 1 WHERE id = ?")
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            let new_count: i64 = sqlx::query("SELECT completed_chunks FROM jobs WHERE id = ?")
                .bind(job_id)
                .fetch_one(&mut *tx)
                .await?
                .try_get("completed_chunks")?;
            tx.commit().await?;
            Ok(new_count)
        })
        .await
    }

    async fn get_chunks(&self, job_id: i64) -> StoreResult<Vec<JobChunk>> {
        let rows = sqlx::query("SELECT * FROM job_chunks WHERE job_id = ? ORDER BY chunk_index ASC")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn get_chunk(&self, chunk_id: i64) -> StoreResult<Option<JobChunk>> {
        let row = sqlx::query("SELECT * FROM job_chunks WHERE id = ?")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_chunk).transpose()
    }

    #[instrument(skip(self, sentences, chunk_ids, settings_snapshot))]
    async fn create_history(
        &self,
        job_id: i64,
        user_id: &str,
        filename: &str,
        sentences: Vec<Sentence>,
        chunk_ids: Vec<i64>,
        settings_snapshot: serde_json::Value,
        created_at: i64,
    ) -> StoreResult<History> {
        let sentences_json = serde_json::to_string(&sentences)
            .map_err(|e| StoreError::InvalidTransition(e.to_string()))?;
        let chunk_ids_json = serde_json::to_string(&chunk_ids)
            .map_err(|e| StoreError::InvalidTransition(e.to_string()))?;
        let settings_json = settings_snapshot.to_string();

        let id: i64 = sqlx::query(
            r#"INSERT INTO histories (job_id, user_id, filename, sentences, chunk_ids, settings_snapshot, exported, created_at)
               VALUES (?, ?, ?, ?, ?, ?, 0, ?)"#,
        )
        .bind(job_id)
        .bind(user_id)
        .bind(filename)
        .bind(&sentences_json)
        .bind(&chunk_ids_json)
        .bind(&settings_json)
        .bind(created_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(History {
            id,
            job_id,
            user_id: user_id.to_string(),
            filename: filename.to_string(),
            sentences,
            chunk_ids,
            settings_snapshot,
            exported: false,
            created_at,
        })
    }

    async fn get_history_by_job(&self, job_id: i64) -> StoreResult<Option<History>> {
        let row = sqlx::query("SELECT * FROM histories WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let sentences: String = row.try_get("sentences")?;
        let chunk_ids: String = row.try_get("chunk_ids")?;
        let settings: String = row.try_get("settings_snapshot")?;
        Ok(Some(History {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            user_id: row.try_get("user_id")?,
            filename: row.try_get("filename")?,
            sentences: serde_json::from_str(&sentences).unwrap_or_default(),
            chunk_ids: serde_json::from_str(&chunk_ids).unwrap_or_default(),
            settings_snapshot: serde_json::from_str(&settings).unwrap_or(serde_json::Value::Null),
            exported: row.try_get::<i64, _>("exported")? != 0,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn stuck_chunks(&self, stuck_threshold_secs: i64, now: i64) -> StoreResult<Vec<JobChunk>> {
        let cutoff = now - stuck_threshold_secs;
        let rows = sqlx::query("SELECT * FROM job_chunks WHERE status = 'running' AND heartbeat_at < ?")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn unfinalized_jobs(&self) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query(
            r#"SELECT j.* FROM jobs j
               LEFT JOIN histories h ON h.job_id = j.id
               WHERE j.status = 'processing'
                 AND j.total_chunks > 0
                 AND j.completed_chunks = j.total_chunks
                 AND h.id IS NULL"#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn abandoned_reservations(&self) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE status IN ('failed', 'cancelled') AND refunded = 0",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn save_chunk_result(&self, result_ref: &str, chunk_id: i64, payload: serde_json::Value, actual_tokens: i64) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO chunk_results (result_ref, chunk_id, payload, actual_tokens, created_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(result_ref) DO UPDATE SET payload = excluded.payload, actual_tokens = excluded.actual_tokens"#,
        )
        .bind(result_ref)
        .bind(chunk_id)
        .bind(payload.to_string())
        .bind(actual_tokens)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_chunk_result(&self, result_ref: &str) -> StoreResult<Option<(serde_json::Value, i64)>> {
        let row = sqlx::query("SELECT payload, actual_tokens FROM chunk_results WHERE result_ref = ?")
            .bind(result_ref)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let payload: String = row.try_get("payload")?;
        let actual_tokens: i64 = row.try_get("actual_tokens")?;
        let value = serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null);
        Ok(Some((value, actual_tokens)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn new_job_and_plan_chunks() {
        let store = test_store().await;
        let job = store
            .new_job(NewJobParams {
                user_id: "u1".into(),
                model: "balanced".into(),
                pricing_version: "v1".into(),
                pricing_rate: 1.0,
                estimated_tokens: 11000,
                estimated_credits: 12,
                filename: "doc.pdf".into(),
                source_ref: "upload://doc.pdf".into(),
                page_count: 20,
                reserved_credits: 12,
                created_at: 0,
            })
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        store
            .plan_chunks(
                job.id,
                vec![ChunkPlan { chunk_index: 0, page_start: 0, page_end: 20, has_overlap: false }],
                2,
            )
            .await
            .unwrap();

        let reloaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.total_chunks, 1);
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = test_store().await;
        let job = store
            .new_job(NewJobParams {
                user_id: "u1".into(),
                model: "balanced".into(),
                pricing_version: "v1".into(),
                pricing_rate: 1.0,
                estimated_tokens: 1000,
                estimated_credits: 2,
                filename: "doc.pdf".into(),
                source_ref: "upload://doc.pdf".into(),
                page_count: 100,
                reserved_credits: 2,
                created_at: 0,
            })
            .await
            .unwrap();
        store
            .plan_chunks(
                job.id,
                vec![ChunkPlan { chunk_index: 0, page_start: 0, page_end: 50, has_overlap: false }],
                2,
            )
            .await
            .unwrap();

        let claimed_a = store.claim_pending_chunk(job.id, "worker-a").await.unwrap();
        assert!(claimed_a.is_some());
        let claimed_b = store.claim_pending_chunk(job.id, "worker-b").await.unwrap();
        assert!(claimed_b.is_none());
    }

    #[tokio::test]
    async fn settle_and_increment_counter() {
        let store = test_store().await;
        let job = store
            .new_job(NewJobParams {
                user_id: "u1".into(),
                model: "balanced".into(),
                pricing_version: "v1".into(),
                pricing_rate: 1.0,
                estimated_tokens: 1000,
                estimated_credits: 2,
                filename: "doc.pdf".into(),
                source_ref: "upload://doc.pdf".into(),
                page_count: 50,
                reserved_credits: 2,
                created_at: 0,
            })
            .await
            .unwrap();
        store
            .plan_chunks(
                job.id,
                vec![ChunkPlan { chunk_index: 0, page_start: 0, page_end: 50, has_overlap: false }],
                2,
            )
            .await
            .unwrap();
        let chunk = store.claim_pending_chunk(job.id, "w1").await.unwrap().unwrap();
        store
            .settle_chunk(chunk.id, ChunkOutcome::Succeeded, Some("ref".into()), None, None)
            .await
            .unwrap();
        let new_count = store.increment_counter_and_read(job.id).await.unwrap();
        assert_eq!(new_count, 1);
    }

    #[tokio::test]
    async fn heartbeat_requires_ownership() {
        let store = test_store().await;
        let job = store
            .new_job(NewJobParams {
                user_id: "u1".into(),
                model: "balanced".into(),
                pricing_version: "v1".into(),
                pricing_rate: 1.0,
                estimated_tokens: 1000,
                estimated_credits: 2,
                filename: "doc.pdf".into(),
                source_ref: "upload://doc.pdf".into(),
                page_count: 50,
                reserved_credits: 2,
                created_at: 0,
            })
            .await
            .unwrap();
        store
            .plan_chunks(job.id, vec![ChunkPlan { chunk_index: 0, page_start: 0, page_end: 50, has_overlap: false }], 2)
            .await
            .unwrap();
        let chunk = store.claim_pending_chunk(job.id, "w1").await.unwrap().unwrap();
        assert!(store.heartbeat(chunk.id, "w1").await.is_ok());
        assert!(store.heartbeat(chunk.id, "intruder").await.is_err());
    }

    #[tokio::test]
    async fn chunk_result_round_trips() {
        let store = test_store().await;
        let job = store
            .new_job(NewJobParams {
                user_id: "u1".into(),
                model: "balanced".into(),
                pricing_version: "v1".into(),
                pricing_rate: 1.0,
                estimated_tokens: 1000,
                estimated_credits: 2,
                filename: "doc.pdf".into(),
                source_ref: "upload://doc.pdf".into(),
                page_count: 50,
                reserved_credits: 2,
                created_at: 0,
            })
            .await
            .unwrap();
        store
            .plan_chunks(job.id, vec![ChunkPlan { chunk_index: 0, page_start: 0, page_end: 50, has_overlap: false }], 2)
            .await
            .unwrap();
        let chunk = store.claim_pending_chunk(job.id, "w1").await.unwrap().unwrap();
        store
            .save_chunk_result(
                "blake3:deadbeef",
                chunk.id,
                serde_json::json!({"sentences": ["a", "b"]}),
                42,
            )
            .await
            .unwrap();
        let (payload, tokens) = store.load_chunk_result("blake3:deadbeef").await.unwrap().unwrap();
        assert_eq!(tokens, 42);
        assert_eq!(payload["sentences"][0], "a");
    }

    #[tokio::test]
    async fn stuck_chunk_detection() {
        let store = test_store().await;
        let job = store
            .new_job(NewJobParams {
                user_id: "u1".into(),
                model: "balanced".into(),
                pricing_version: "v1".into(),
                pricing_rate: 1.0,
                estimated_tokens: 1000,
                estimated_credits: 2,
                filename: "doc.pdf".into(),
                source_ref: "upload://doc.pdf".into(),
                page_count: 50,
                reserved_credits: 2,
                created_at: 0,
            })
            .await
            .unwrap();
        store
            .plan_chunks(job.id, vec![ChunkPlan { chunk_index: 0, page_start: 0, page_end: 50, has_overlap: false }], 2)
            .await
            .unwrap();
        let chunk = store.claim_pending_chunk(job.id, "w1").await.unwrap().unwrap();
        let far_future = chunk.heartbeat_at.unwrap() + 10_000;
        let stuck = store.stuck_chunks(60, far_future).await.unwrap();
        assert_eq!(stuck.len(), 1);
    }
}
