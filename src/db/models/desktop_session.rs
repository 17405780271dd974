//! Focused-window session: one row per contiguous (application, title) pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesktopSession {
    pub id: Option<i64>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub application_name: String,
    pub window_title: String,
}

impl DesktopSession {
    pub fn open(
        application_name: impl Into<String>,
        window_title: impl Into<String>,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            start,
            end: None,
            application_name: application_name.into(),
            window_title: window_title.into(),
        }
    }

    /// Whole seconds between start and end; `None` while the session is open.
    pub fn duration_seconds(&self) -> Option<i64> {
        self.end.map(|end| (end - self.start).num_seconds())
    }

    pub fn is_same_window(&self, application_name: &str, window_title: &str) -> bool {
        self.application_name == application_name && self.window_title == window_title
    }
}
