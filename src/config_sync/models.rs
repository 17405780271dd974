use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit name written on rows created from the static directory list.
pub const MIGRATION_AUTHOR: &str = "static_migration";

/// One row of `monitored_directories`. Only the admin surface edits these;
/// the agent reads them and, once, seeds them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WatchTarget {
    pub id: i32,
    pub directory_path: String,
    pub display_path: Option<String>,
    pub resolved_path: Option<String>,
    pub enabled: bool,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl WatchTarget {
    /// Symlink-resolved path when known, otherwise the stored path.
    pub fn watch_path(&self) -> PathBuf {
        let path = self
            .resolved_path
            .as_deref()
            .filter(|resolved| !resolved.is_empty())
            .unwrap_or(&self.directory_path);
        PathBuf::from(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWatchTarget {
    pub directory_path: String,
    pub display_path: Option<String>,
    pub resolved_path: Option<String>,
    pub display_name: Option<String>,
}
