//! In-memory config source for tests.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;

use super::{ConfigSource, NewWatchTarget, WatchTarget, MIGRATION_AUTHOR};
use crate::error::AgentError;

pub(crate) fn target(id: i32, path: &Path, enabled: bool) -> WatchTarget {
    let path = path.to_string_lossy().into_owned();
    WatchTarget {
        id,
        directory_path: path.clone(),
        display_path: Some(path),
        resolved_path: None,
        enabled,
        display_name: None,
        description: None,
        created_at: Utc::now(),
        created_by: "admin".into(),
        updated_at: Utc::now(),
        updated_by: "admin".into(),
    }
}

#[derive(Default)]
pub(crate) struct FakeSource {
    rows: Mutex<Vec<WatchTarget>>,
    failing: AtomicBool,
    rejected: Mutex<Vec<PathBuf>>,
}

impl FakeSource {
    pub(crate) fn with_rows(rows: Vec<WatchTarget>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    pub(crate) fn rows(&self) -> Vec<WatchTarget> {
        self.rows.lock().unwrap().clone()
    }

    pub(crate) fn push(&self, row: WatchTarget) {
        self.rows.lock().unwrap().push(row);
    }

    pub(crate) fn set_enabled(&self, id: i32, enabled: bool) {
        for row in self.rows.lock().unwrap().iter_mut() {
            if row.id == id {
                row.enabled = enabled;
                row.updated_at = Utc::now();
            }
        }
    }

    pub(crate) fn fail_reads(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn reject_insert(&self, path: PathBuf) {
        self.rejected.lock().unwrap().push(path);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AgentError::ConfigUnavailable("connection refused".into()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigSource for FakeSource {
    async fn enabled_targets(&self) -> Result<Vec<WatchTarget>> {
        self.check()?;
        Ok(self.rows().into_iter().filter(|row| row.enabled).collect())
    }

    async fn count_targets(&self) -> Result<i64> {
        self.check()?;
        Ok(self.rows.lock().unwrap().len() as i64)
    }

    async fn insert_target(&self, target: &NewWatchTarget) -> Result<bool> {
        self.check()?;
        if self
            .rejected
            .lock()
            .unwrap()
            .iter()
            .any(|path| Path::new(&target.directory_path) == path)
        {
            return Err(anyhow!("permission denied for table monitored_directories"));
        }

        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|row| row.directory_path == target.directory_path) {
            return Ok(false);
        }
        let id = rows.len() as i32 + 1;
        rows.push(WatchTarget {
            id,
            directory_path: target.directory_path.clone(),
            display_path: target.display_path.clone(),
            resolved_path: target.resolved_path.clone(),
            enabled: true,
            display_name: target.display_name.clone(),
            description: None,
            created_at: Utc::now(),
            created_by: MIGRATION_AUTHOR.into(),
            updated_at: Utc::now(),
            updated_by: MIGRATION_AUTHOR.into(),
        });
        Ok(true)
    }
}
