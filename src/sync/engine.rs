use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::LocalQueue;
use crate::{
    central::{CentralStore, SyncRun, SyncStatus},
    db::{LocalRecord, Stream},
    error::is_transient,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Replicates every stream from a local queue into a central store.
///
/// Each batch goes to the central store in one transaction and is marked
/// synced locally only after that commit. A crash in between re-sends the
/// batch on the next run, so delivery is at-least-once.
pub struct SyncEngine {
    local: Arc<dyn LocalQueue>,
    central: Arc<dyn CentralStore>,
    host: String,
    batch_size: usize,
}

impl SyncEngine {
    pub fn new(
        local: Arc<dyn LocalQueue>,
        central: Arc<dyn CentralStore>,
        host: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            local,
            central,
            host: host.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// One scheduled run over all streams. Returns the audit rows produced
    /// (streams with nothing to send produce none).
    pub async fn sync_all(&self, cancel: &CancellationToken) -> Vec<SyncRun> {
        let mut runs = Vec::new();
        for stream in Stream::ALL {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(run) = self.sync_stream(stream, cancel).await {
                runs.push(run);
            }
        }
        runs
    }

    pub async fn sync_stream(&self, stream: Stream, cancel: &CancellationToken) -> Option<SyncRun> {
        let started_at = Utc::now();

        let rows = match self.local.fetch_unsynced(stream).await {
            Ok(rows) => rows,
            Err(err) => {
                if is_transient(&err) {
                    log_warn!("{stream}: local store busy, retrying next run: {err:#}");
                } else {
                    log_error!("{stream}: failed to read unsynced records: {err:#}");
                }
                let run = self.finish(stream, started_at, 0, 0, Some(format!("{err:#}")));
                self.audit(&run).await;
                return Some(run);
            }
        };

        if rows.is_empty() {
            log_debug!("{stream}: nothing to sync");
            return None;
        }

        let mut synced: u64 = 0;
        let mut failed: u64 = rows.malformed.len() as u64;
        let mut last_error = None;

        for bad in &rows.malformed {
            log_warn!("{stream}: skipping malformed record {}: {}", bad.local_id, bad.reason);
        }
        if !rows.malformed.is_empty() {
            last_error = Some(format!("{} malformed record(s)", rows.malformed.len()));
        }

        let batches = rows.records.chunks(self.batch_size);
        let batch_count = batches.len();
        for (index, batch) in batches.enumerate() {
            if cancel.is_cancelled() {
                log_info!(
                    "{stream}: stopping after {index} of {batch_count} batches (shutdown)"
                );
                break;
            }

            match self.send_batch(stream, batch).await {
                Ok(()) => synced += batch.len() as u64,
                Err(err) => {
                    failed += batch.len() as u64;
                    last_error = Some(err);
                }
            }
        }

        if synced == 0 && failed == 0 {
            return None;
        }

        let run = self.finish(stream, started_at, synced, failed, last_error);
        log_info!(
            "{stream}: synced {synced}, failed {failed} ({})",
            run.status.as_str()
        );
        self.audit(&run).await;
        Some(run)
    }

    /// Insert, commit, then mark. Any failure fails the whole batch.
    async fn send_batch(&self, stream: Stream, batch: &[LocalRecord]) -> Result<(), String> {
        let ids: Vec<i64> = batch.iter().filter_map(LocalRecord::local_id).collect();

        if let Err(err) = self.central.insert_batch(stream, &self.host, batch).await {
            if is_transient(&err) {
                log_warn!("{stream}: batch of {} aborted, central store unreachable: {err:#}", batch.len());
            } else {
                log_error!("{stream}: batch of {} rejected: {err:#}", batch.len());
            }
            return Err(format!("{err:#}"));
        }

        if let Err(err) = self.local.mark_synced(stream, ids).await {
            log_error!(
                "{stream}: batch of {} committed centrally but not marked locally, it will be re-sent: {err:#}",
                batch.len()
            );
            return Err(format!("{err:#}"));
        }

        Ok(())
    }

    fn finish(
        &self,
        stream: Stream,
        started_at: chrono::DateTime<Utc>,
        synced: u64,
        failed: u64,
        error: Option<String>,
    ) -> SyncRun {
        let status = if synced == 0 && failed == 0 && error.is_some() {
            SyncStatus::Failed
        } else {
            SyncStatus::from_counts(synced, failed)
        };
        SyncRun {
            run_id: Uuid::new_v4(),
            stream,
            started_at,
            completed_at: Utc::now(),
            synced,
            failed,
            status,
            error: if failed == 0 && synced > 0 { None } else { error },
            host: self.host.clone(),
        }
    }

    async fn audit(&self, run: &SyncRun) {
        if let Err(err) = self.central.record_sync_run(run).await {
            log_error!("{}: failed to write sync audit row: {err:#}", run.stream);
        }
    }
}
