use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    PartialSuccess,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::PartialSuccess => "partial_success",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn from_counts(synced: u64, failed: u64) -> Self {
        match (synced, failed) {
            (_, 0) => SyncStatus::Success,
            (0, _) => SyncStatus::Failed,
            _ => SyncStatus::PartialSuccess,
        }
    }
}

/// One audit row per stream per scheduled run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub run_id: Uuid,
    pub stream: Stream,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub synced: u64,
    pub failed: u64,
    pub status: SyncStatus,
    pub error: Option<String>,
    pub host: String,
}
