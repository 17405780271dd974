use std::{collections::BTreeSet, path::PathBuf};

use super::NewWatchTarget;
use crate::utils::paths::{resolve_directory, ResolvedDir};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// The statically configured directory list, resolved once at startup.
/// Used as the watch set when the config source is unreachable, and as the
/// seed for an empty config source.
#[derive(Debug, Clone, Default)]
pub struct FallbackConfig {
    entries: Vec<(String, ResolvedDir)>,
}

impl FallbackConfig {
    /// Entries that cannot be resolved at all are logged and dropped.
    pub fn from_static(directories: &[String]) -> Self {
        let entries = directories
            .iter()
            .filter(|raw| !raw.trim().is_empty())
            .filter_map(|raw| match resolve_directory(raw) {
                Ok(resolved) => Some((raw.clone(), resolved)),
                Err(err) => {
                    log_warn!("ignoring static directory '{raw}': {err:#}");
                    None
                }
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn desired_paths(&self) -> BTreeSet<PathBuf> {
        self.entries
            .iter()
            .map(|(_, dir)| dir.watch_path().to_path_buf())
            .collect()
    }

    /// Rows to seed an empty config source with. The canonical path is the
    /// absolute, symlink-resolved one; the raw entry is kept for display.
    pub fn migration_rows(&self) -> Vec<NewWatchTarget> {
        self.entries
            .iter()
            .map(|(raw, dir)| NewWatchTarget {
                directory_path: dir.watch_path().to_string_lossy().into_owned(),
                display_path: Some(raw.clone()),
                resolved_path: dir
                    .resolved
                    .as_ref()
                    .map(|path| path.to_string_lossy().into_owned()),
                display_name: None,
            })
            .collect()
    }

    pub fn log_mode(&self) {
        log_info!(
            "fallback mode: watching {} statically configured directories",
            self.entries.len()
        );
    }
}
