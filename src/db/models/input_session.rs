use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stretch of continuous keyboard/pointer presence. Nothing about the
/// input itself is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSession {
    pub id: Option<i64>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl InputSession {
    pub fn open(start: DateTime<Utc>) -> Self {
        Self {
            id: None,
            start,
            end: None,
        }
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.end.map(|end| (end - self.start).num_seconds())
    }
}
