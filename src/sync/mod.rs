//! Draining the local buffer into the central store.

mod engine;
mod loop_worker;

use anyhow::Result;
use async_trait::async_trait;

use crate::db::{Stream, UnsyncedRows};

pub use engine::SyncEngine;
pub use loop_worker::sync_loop;

/// The two local operations replication needs. `Database` is the real
/// implementation; tests wrap it to inject failures.
#[async_trait]
pub trait LocalQueue: Send + Sync {
    async fn fetch_unsynced(&self, stream: Stream) -> Result<UnsyncedRows>;

    async fn mark_synced(&self, stream: Stream, ids: Vec<i64>) -> Result<usize>;
}
