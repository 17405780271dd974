//! The shared store every host replicates into.

mod models;
mod postgres;

use anyhow::Result;
use async_trait::async_trait;

use crate::db::{LocalRecord, Stream};

pub use models::{SyncRun, SyncStatus};
pub use postgres::PgCentralStore;

#[async_trait]
pub trait CentralStore: Send + Sync {
    /// Insert every record in one transaction: either all rows become visible
    /// or none do.
    async fn insert_batch(
        &self,
        stream: Stream,
        host: &str,
        records: &[LocalRecord],
    ) -> Result<()>;

    /// Append one audit row.
    async fn record_sync_run(&self, run: &SyncRun) -> Result<()>;
}
