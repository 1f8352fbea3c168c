//! Typed rows for the Job / JobChunk / CreditLedger / History entities
//! described in the data model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChunkStatus::Pending => "pending",
            ChunkStatus::Running => "running",
            ChunkStatus::Succeeded => "succeeded",
            ChunkStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ChunkStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChunkStatus::Pending),
            "running" => Ok(ChunkStatus::Running),
            "succeeded" => Ok(ChunkStatus::Succeeded),
            "failed" => Ok(ChunkStatus::Failed),
            other => Err(format!("unknown chunk status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub user_id: String,
    pub status: JobStatus,
    pub total_chunks: i64,
    pub completed_chunks: i64,
    pub progress_percent: f64,
    pub current_step: String,
    pub model: String,
    pub pricing_version: String,
    pub pricing_rate: f64,
    pub estimated_tokens: i64,
    pub estimated_credits: i64,
    pub actual_tokens: Option<i64>,
    pub actual_credits: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub filename: String,
    pub source_ref: String,
    pub page_count: i64,
    pub reserved_credits: i64,
    pub refunded: bool,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobChunk {
    pub id: i64,
    pub job_id: i64,
    pub chunk_index: i64,
    pub page_start: i64,
    pub page_end: i64,
    pub has_overlap: bool,
    pub status: ChunkStatus,
    pub attempts: i64,
    pub max_retries: i64,
    pub last_error_code: Option<String>,
    pub last_error: Option<String>,
    pub result_ref: Option<String>,
    pub claimed_by: Option<String>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub heartbeat_at: Option<i64>,
}

impl JobChunk {
    /// `attempts <= max_retries + 1` invariant: true once no attempt remains.
    pub fn retries_exhausted(&self) -> bool {
        self.attempts > self.max_retries
    }
}

/// A planned chunk, produced by the Chunker, not yet persisted.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    pub chunk_index: i64,
    pub page_start: i64,
    pub page_end: i64,
    pub has_overlap: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerReason {
    Grant,
    Reserve,
    FinalizeAdjust,
    Refund,
    AdminAdjust,
}

impl fmt::Display for LedgerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LedgerReason::Grant => "grant",
            LedgerReason::Reserve => "reserve",
            LedgerReason::FinalizeAdjust => "finalize_adjust",
            LedgerReason::Refund => "refund",
            LedgerReason::AdminAdjust => "admin_adjust",
        };
        write!(f, "{s}")
    }
}

impl FromStr for LedgerReason {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grant" => Ok(LedgerReason::Grant),
            "reserve" => Ok(LedgerReason::Reserve),
            "finalize_adjust" => Ok(LedgerReason::FinalizeAdjust),
            "refund" => Ok(LedgerReason::Refund),
            "admin_adjust" => Ok(LedgerReason::AdminAdjust),
            other => Err(format!("unknown ledger reason: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditLedgerEntry {
    pub id: i64,
    pub user_id: String,
    pub delta: i64,
    pub reason: LedgerReason,
    pub month_key: String,
    pub job_id: Option<i64>,
    pub pricing_version: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentence {
    pub text: String,
    pub original_ref: Option<String>,
    pub source_chunk_id: i64,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    pub id: i64,
    pub job_id: i64,
    pub user_id: String,
    pub filename: String,
    pub sentences: Vec<Sentence>,
    pub chunk_ids: Vec<i64>,
    pub settings_snapshot: serde_json::Value,
    pub exported: bool,
    pub created_at: i64,
}
