use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Snapshot(ProgressSnapshot),
    Progress(ProgressSnapshot),
    Error { job_id: i64, message: String, timestamp: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job_id: i64,
    pub status: String,
    pub progress_percent: f64,
    pub current_step: String,
    pub completed_chunks: i64,
    pub total_chunks: i64,
    pub timestamp: i64,
}

impl ProgressEvent {
    pub fn job_id(&self) -> i64 {
        match self {
            ProgressEvent::Snapshot(s) | ProgressEvent::Progress(s) => s.job_id,
            ProgressEvent::Error { job_id, .. } => *job_id,
        }
    }
}
