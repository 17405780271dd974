use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::SyncEngine;

const ENABLE_LOGS: bool = true;

use crate::log_info;

/// Runs `sync_all` every `interval`, starting immediately. A run is awaited
/// inside the tick branch, so runs never overlap and cancellation lands
/// between batches.
pub async fn sync_loop(engine: Arc<SyncEngine>, interval: Duration, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let runs = engine.sync_all(&cancel_token).await;
                if !runs.is_empty() {
                    let synced: u64 = runs.iter().map(|run| run.synced).sum();
                    let failed: u64 = runs.iter().map(|run| run.failed).sum();
                    log_info!("sync run finished: {synced} synced, {failed} failed across {} streams", runs.len());
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("sync loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::{
        central::{CentralStore, SyncRun},
        db::{DesktopSession, LocalRecord, Stream, UnsyncedRows},
        sync::LocalQueue,
    };

    /// Always has one desktop session waiting.
    #[derive(Default)]
    struct EndlessQueue {
        next_id: AtomicUsize,
    }

    #[async_trait]
    impl LocalQueue for EndlessQueue {
        async fn fetch_unsynced(&self, stream: Stream) -> Result<UnsyncedRows> {
            if stream != Stream::DesktopSessions {
                return Ok(UnsyncedRows::default());
            }
            let mut session = DesktopSession::open("Code", "main.rs", Utc::now());
            session.id = Some(self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1);
            Ok(UnsyncedRows {
                records: vec![LocalRecord::Desktop(session)],
                malformed: Vec::new(),
            })
        }

        async fn mark_synced(&self, _stream: Stream, ids: Vec<i64>) -> Result<usize> {
            Ok(ids.len())
        }
    }

    /// Each insert takes longer than the loop interval.
    #[derive(Default)]
    struct SlowCentral {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        inserts: AtomicUsize,
        runs: Mutex<Vec<SyncRun>>,
    }

    #[async_trait]
    impl CentralStore for SlowCentral {
        async fn insert_batch(
            &self,
            _stream: Stream,
            _host: &str,
            _records: &[LocalRecord],
        ) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(60)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inserts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn record_sync_run(&self, run: &SyncRun) -> Result<()> {
            self.runs.lock().unwrap().push(run.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn runs_never_overlap_and_stop_on_cancel() {
        let central = Arc::new(SlowCentral::default());
        let engine = Arc::new(SyncEngine::new(
            Arc::new(EndlessQueue::default()),
            central.clone(),
            "devbox_alice",
            100,
        ));
        let token = CancellationToken::new();
        let task = tokio::spawn(sync_loop(engine, Duration::from_millis(5), token.clone()));

        tokio::time::sleep(Duration::from_millis(400)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("sync loop did not stop after cancel")
            .unwrap();

        let inserts = central.inserts.load(Ordering::SeqCst);
        assert!(inserts >= 2, "only {inserts} runs happened");
        assert_eq!(central.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(central.runs.lock().unwrap().len(), inserts);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(central.inserts.load(Ordering::SeqCst), inserts);
    }
}
