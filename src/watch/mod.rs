//! Per-root filesystem watching: hook adapters feed a buffer-owning task
//! that filters, batches and flushes file events into the local store.

mod handle;
mod hook;
mod policy;

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

pub use handle::{EventSink, WatchHandle};
#[cfg(test)]
pub(crate) use handle::tests as testing;
pub use hook::NotifyHook;
pub use policy::WatchPolicy;

/// Bound on queued hook events per handle. The hook thread blocks when the
/// buffer task falls this far behind.
pub const HOOK_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookKind {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    /// One rename, reported once with both ends.
    Moved { from: PathBuf, to: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookEvent {
    pub kind: HookKind,
    pub is_dir: bool,
    pub at: DateTime<Utc>,
}

impl HookEvent {
    pub fn new(kind: HookKind) -> Self {
        Self {
            kind,
            is_dir: false,
            at: Utc::now(),
        }
    }

    pub fn directory(kind: HookKind) -> Self {
        Self {
            is_dir: true,
            ..Self::new(kind)
        }
    }
}

/// Anything kept alive for as long as a registration should keep reporting.
pub trait HookGuard: Send {}

impl<T: Send> HookGuard for T {}

/// The OS notification source. `register` starts delivering events for
/// everything under `root` into `events`; dropping the returned guard stops
/// delivery.
pub trait WatchHook: Send + Sync {
    fn register(
        &self,
        root: &Path,
        events: mpsc::Sender<HookEvent>,
    ) -> Result<Box<dyn HookGuard>>;
}
