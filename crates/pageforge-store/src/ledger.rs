//! CreditLedger: an append-only balance ledger with monthly grant,
//! two-phase reserve/finalize, refund, and admin adjustment. Shares the
//! same SQLite pool and transactional scope as the rest of the Store,
//! rather than living behind a second trait/crate boundary — every ledger
//! write here is already inside the same `safe_commit`-guarded unit of
//! work as the Job row it accompanies.

use sqlx::{Row, SqlitePool};
use tracing::instrument;

use crate::error::StoreResult;
use crate::types::LedgerReason;

#[derive(Debug, Clone, Copy)]
pub struct CreditLedgerError {
    pub required: i64,
    pub available: i64,
}

impl std::fmt::Display for CreditLedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "INSUFFICIENT_CREDITS: required {} but only {} available",
            self.required, self.available
        )
    }
}

pub struct CreditLedger {
    pool: SqlitePool,
    overdraft_floor: i64,
}

impl CreditLedger {
    pub fn new(pool: SqlitePool, overdraft_floor: i64) -> Self {
        Self { pool, overdraft_floor }
    }

    async fn balance(&self, user_id: &str, month_key: &str) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COALESCE(SUM(delta), 0) AS balance FROM credit_ledger WHERE user_id = ? AND month_key = ?")
            .bind(user_id)
            .bind(month_key)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("balance")?)
    }

    /// Idempotent insert of a `grant` delta when (user, month_key) has no
    /// grant yet. The `(user_id, month_key)`-scoped `NOT EXISTS` check plus
    /// the insert runs as one statement so concurrent workers racing to
    /// grant the same user/month never double-grant.
    #[instrument(skip(self))]
    pub async fn ensure_monthly_grant(
        &self,
        user_id: &str,
        month_key: &str,
        amount: i64,
        pricing_version: &str,
        now: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO credit_ledger (user_id, delta, reason, month_key, job_id, pricing_version, created_at)
               SELECT ?, ?, 'grant', ?, NULL, ?, ?
               WHERE NOT EXISTS (
                   SELECT 1 FROM credit_ledger WHERE user_id = ? AND month_key = ? AND reason = 'grant'
               )"#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(month_key)
        .bind(pricing_version)
        .bind(now)
        .bind(user_id)
        .bind(month_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reserves `credits` for `job_id` under a user-scoped check: the
    /// balance minus the reservation must not drop below `overdraft_floor`.
    pub async fn reserve(
        &self,
        user_id: &str,
        job_id: i64,
        credits: i64,
        month_key: &str,
        pricing_version: &str,
        now: i64,
    ) -> StoreResult<Result<(), CreditLedgerError>> {
        let mut tx = self.pool.begin().await?;
        let balance: i64 = sqlx::query(
            "SELECT COALESCE(SUM(delta), 0) AS balance FROM credit_ledger WHERE user_id = ? AND month_key = ?",
        )
        .bind(user_id)
        .bind(month_key)
        .fetch_one(&mut *tx)
        .await?
        .try_get("balance")?;

        if balance - credits < self.overdraft_floor {
            tx.rollback().await?;
            return Ok(Err(CreditLedgerError { required: credits, available: balance }));
        }

        sqlx::query(
            r#"INSERT INTO credit_ledger (user_id, delta, reason, month_key, job_id, pricing_version, created_at)
               VALUES (?, ?, 'reserve', ?, ?, ?, ?)"#,
        )
        .bind(user_id)
        .bind(-credits)
        .bind(month_key)
        .bind(job_id)
        .bind(pricing_version)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Ok(()))
    }

    /// Appends `delta = reserved - actual_credits` (may be positive or
    /// negative) once a job's actual usage is known.
    pub async fn finalize_adjust(
        &self,
        user_id: &str,
        job_id: i64,
        reserved: i64,
        actual_credits: i64,
        month_key: &str,
        pricing_version: &str,
        now: i64,
    ) -> StoreResult<()> {
        let delta = reserved - actual_credits;
        if delta == 0 {
            return Ok(());
        }
        sqlx::query(
            r#"INSERT INTO credit_ledger (user_id, delta, reason, month_key, job_id, pricing_version, created_at)
               VALUES (?, ?, 'finalize_adjust', ?, ?, ?, ?)"#,
        )
        .bind(user_id)
        .bind(delta)
        .bind(month_key)
        .bind(job_id)
        .bind(pricing_version)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Appends `+reserved` on cancellation/failure.
    pub async fn refund(
        &self,
        user_id: &str,
        job_id: i64,
        reserved: i64,
        month_key: &str,
        pricing_version: &str,
        now: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO credit_ledger (user_id, delta, reason, month_key, job_id, pricing_version, created_at)
               VALUES (?, ?, 'refund', ?, ?, ?, ?)"#,
        )
        .bind(user_id)
        .bind(reserved)
        .bind(month_key)
        .bind(job_id)
        .bind(pricing_version)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn admin_adjust(
        &self,
        user_id: &str,
        delta: i64,
        reason_note: &str,
        month_key: &str,
        pricing_version: &str,
        now: i64,
    ) -> StoreResult<()> {
        tracing::info!(user_id, delta, reason_note, "admin credit adjustment");
        sqlx::query(
            r#"INSERT INTO credit_ledger (user_id, delta, reason, month_key, job_id, pricing_version, created_at)
               VALUES (?, ?, 'admin_adjust', ?, NULL, ?, ?)"#,
        )
        .bind(user_id)
        .bind(delta)
        .bind(month_key)
        .bind(pricing_version)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn balance_for(&self, user_id: &str, month_key: &str) -> StoreResult<i64> {
        self.balance(user_id, month_key).await
    }

    /// Sum of ledger reason=='reserve' deltas for a job, used by the
    /// abandoned-reservation watchdog to compute the refund amount.
    pub async fn reserved_amount_for_job(&self, job_id: i64) -> StoreResult<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(-SUM(delta), 0) AS reserved FROM credit_ledger WHERE job_id = ? AND reason = 'reserve'",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("reserved")?)
    }
}
