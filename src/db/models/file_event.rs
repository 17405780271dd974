//! Filesystem change record, written once by a watch handle flush.

use std::path::{Component, Path};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
}

impl FileEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileEventKind::Created => "created",
            FileEventKind::Modified => "modified",
            FileEventKind::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "created" => Ok(FileEventKind::Created),
            "modified" => Ok(FileEventKind::Modified),
            "deleted" => Ok(FileEventKind::Deleted),
            other => Err(anyhow!("unknown file event type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEvent {
    pub id: Option<i64>,
    pub occurred_at: DateTime<Utc>,
    pub kind: FileEventKind,
    pub file_path: String,
    pub file_path_relative: Option<String>,
    pub file_name: String,
    pub file_extension: Option<String>,
    pub file_size: Option<u64>,
    pub is_symlink: bool,
    pub monitored_root: String,
    pub project_name: Option<String>,
}

impl FileEvent {
    /// Build a record for `path` under `root`, reading size and symlink-ness
    /// from disk where the file still exists.
    pub fn observe(
        kind: FileEventKind,
        path: &Path,
        root: &Path,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let link_meta = std::fs::symlink_metadata(path).ok();
        let is_symlink = link_meta
            .as_ref()
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);

        let file_size = match kind {
            FileEventKind::Deleted => None,
            _ => std::fs::metadata(path)
                .ok()
                .filter(|meta| meta.is_file())
                .map(|meta| meta.len()),
        };

        let relative = path.strip_prefix(root).ok();

        Self {
            id: None,
            occurred_at,
            kind,
            file_path: path.to_string_lossy().into_owned(),
            file_path_relative: relative.map(|rel| rel.to_string_lossy().into_owned()),
            file_name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_extension: path
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .filter(|ext| !ext.is_empty()),
            file_size,
            is_symlink,
            monitored_root: root.to_string_lossy().into_owned(),
            project_name: relative.and_then(guess_project),
        }
    }
}

/// First directory below the monitored root, when the file sits at least one
/// level deep.
fn guess_project(relative: &Path) -> Option<String> {
    let mut components = relative.components();
    let first = components.next()?;
    components.next()?;
    match first {
        Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        _ => None,
    }
}
