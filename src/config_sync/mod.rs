//! Where the watch set comes from: the central `monitored_directories`
//! table when reachable, the static directory list otherwise.

mod fallback;
mod models;
mod postgres;
mod reconciler;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::AgentError;

pub use fallback::FallbackConfig;
pub use models::{NewWatchTarget, WatchTarget, MIGRATION_AUTHOR};
pub use postgres::PgConfigSource;
pub use reconciler::{reconcile_loop, ReconcileReport, Reconciler};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn enabled_targets(&self) -> Result<Vec<WatchTarget>>;

    async fn count_targets(&self) -> Result<i64>;

    /// Insert unless a row with the same `directory_path` exists. Returns
    /// whether a row was written.
    async fn insert_target(&self, target: &NewWatchTarget) -> Result<bool>;
}

/// Chosen once at startup and kept for the life of the process.
pub enum ConfigMode {
    Central(Arc<dyn ConfigSource>),
    Fallback,
}

impl ConfigMode {
    pub fn source(&self) -> Option<Arc<dyn ConfigSource>> {
        match self {
            ConfigMode::Central(source) => Some(source.clone()),
            ConfigMode::Fallback => None,
        }
    }
}

/// Probe the config source and seed it from the static list if it is empty.
/// `None` (no connection could be made) and a failed probe both select
/// fallback mode.
pub async fn connect_config(
    source: Option<Arc<dyn ConfigSource>>,
    fallback: &FallbackConfig,
) -> ConfigMode {
    let Some(source) = source else {
        log_warn!("{}", AgentError::ConfigUnavailable("no central connection".into()));
        fallback.log_mode();
        return ConfigMode::Fallback;
    };

    let existing = match source.count_targets().await {
        Ok(count) => count,
        Err(err) => {
            log_warn!("{}: {err:#}", AgentError::ConfigUnavailable("probe failed".into()));
            fallback.log_mode();
            return ConfigMode::Fallback;
        }
    };

    if existing > 0 {
        log_info!("config source has {existing} watch targets, skipping static migration");
    } else {
        let migrated = migrate_static(source.as_ref(), fallback).await;
        log_info!(
            "migrated {migrated}/{} static directories into the config source",
            fallback.migration_rows().len()
        );
    }

    ConfigMode::Central(source)
}

/// Insert each static directory. A row that fails is logged and skipped.
async fn migrate_static(source: &dyn ConfigSource, fallback: &FallbackConfig) -> usize {
    let mut migrated = 0;
    for row in fallback.migration_rows() {
        match source.insert_target(&row).await {
            Ok(true) => migrated += 1,
            Ok(false) => {}
            Err(err) => log_warn!("could not migrate {}: {err:#}", row.directory_path),
        }
    }
    migrated
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::testing::{target, FakeSource};

    fn static_dirs(dir: &tempfile::TempDir, names: &[&str]) -> FallbackConfig {
        let raws: Vec<String> = names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                std::fs::create_dir_all(&path).unwrap();
                path.to_string_lossy().into_owned()
            })
            .collect();
        FallbackConfig::from_static(&raws)
    }

    #[tokio::test]
    async fn empty_source_is_seeded_once() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = static_dirs(&dir, &["a", "b"]);
        let source = Arc::new(FakeSource::with_rows(Vec::new()));

        let mode = connect_config(Some(source.clone()), &fallback).await;
        assert!(matches!(mode, ConfigMode::Central(_)));

        let rows = source.rows();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.enabled && row.created_by == MIGRATION_AUTHOR));
        assert!(rows.iter().all(|row| row.updated_by == MIGRATION_AUTHOR));

        connect_config(Some(source.clone()), &fallback).await;
        assert_eq!(source.rows().len(), 2);
    }

    #[tokio::test]
    async fn populated_source_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = static_dirs(&dir, &["a"]);
        let existing = dir.path().join("admin-added");
        let source = Arc::new(FakeSource::with_rows(vec![target(7, &existing, false)]));

        connect_config(Some(source.clone()), &fallback).await;
        assert_eq!(source.rows().len(), 1);
    }

    #[tokio::test]
    async fn failed_row_insert_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = static_dirs(&dir, &["a", "b"]);
        let source = Arc::new(FakeSource::with_rows(Vec::new()));
        source.reject_insert(std::fs::canonicalize(dir.path().join("a")).unwrap());

        let mode = connect_config(Some(source.clone()), &fallback).await;
        assert!(matches!(mode, ConfigMode::Central(_)));
        let rows = source.rows();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].directory_path.ends_with('b'));
    }

    #[tokio::test]
    async fn unreachable_source_selects_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = static_dirs(&dir, &["a"]);

        assert!(matches!(connect_config(None, &fallback).await, ConfigMode::Fallback));

        let source = Arc::new(FakeSource::with_rows(Vec::new()));
        source.fail_reads(true);
        let mode = connect_config(Some(source.clone()), &fallback).await;
        assert!(matches!(mode, ConfigMode::Fallback));
        assert!(mode.source().is_none());
        assert!(source.rows().is_empty());
    }
}
