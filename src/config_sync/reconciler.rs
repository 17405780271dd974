use std::{
    collections::{BTreeSet, HashMap},
    path::PathBuf,
    sync::Arc,
};

use anyhow::Result;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::ConfigSource;
use crate::watch::{EventSink, WatchHandle, WatchHook, WatchPolicy};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<PathBuf>,
    pub stopped: Vec<PathBuf>,
    /// Desired but unreachable on disk; retried on the next pass.
    pub skipped: Vec<PathBuf>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.skipped.is_empty()
    }
}

/// Keeps the set of live watch handles equal to a desired path set.
pub struct Reconciler {
    hook: Arc<dyn WatchHook>,
    sink: Arc<dyn EventSink>,
    policy: Arc<WatchPolicy>,
    active: HashMap<PathBuf, WatchHandle>,
}

impl Reconciler {
    pub fn new(
        hook: Arc<dyn WatchHook>,
        sink: Arc<dyn EventSink>,
        policy: Arc<WatchPolicy>,
    ) -> Self {
        Self {
            hook,
            sink,
            policy,
            active: HashMap::new(),
        }
    }

    pub fn active_paths(&self) -> BTreeSet<PathBuf> {
        self.active.keys().cloned().collect()
    }

    /// Start what is newly desired, stop (and flush) what no longer is.
    /// Paths present in both sets keep their existing handle.
    pub async fn apply(&mut self, desired: &BTreeSet<PathBuf>) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let removed: Vec<PathBuf> = self
            .active
            .keys()
            .filter(|path| !desired.contains(*path))
            .cloned()
            .collect();
        for path in removed {
            if let Some(handle) = self.active.remove(&path) {
                if let Err(err) = handle.stop().await {
                    log_error!("failed to stop watch on {}: {err:#}", path.display());
                }
            }
            report.stopped.push(path);
        }

        for path in desired {
            if self.active.contains_key(path) {
                continue;
            }
            match WatchHandle::start(
                path.clone(),
                self.hook.as_ref(),
                self.sink.clone(),
                self.policy.clone(),
            ) {
                Ok(handle) => {
                    self.active.insert(path.clone(), handle);
                    report.started.push(path.clone());
                }
                Err(err) => {
                    log_warn!("skipping watch target {}: {err:#}", path.display());
                    report.skipped.push(path.clone());
                }
            }
        }

        report
    }

    /// Re-read enabled targets and apply them. A failed read changes nothing.
    pub async fn reconcile_once(&mut self, source: &dyn ConfigSource) -> Result<ReconcileReport> {
        let targets = source.enabled_targets().await?;
        let desired: BTreeSet<PathBuf> = targets.iter().map(|target| target.watch_path()).collect();
        Ok(self.apply(&desired).await)
    }

    /// Flush and stop every handle.
    pub async fn stop_all(&mut self) {
        self.apply(&BTreeSet::new()).await;
    }
}

/// Periodic reconciliation while a config source is connected. Without one
/// the loop only holds the handles until shutdown. Every handle is stopped
/// (buffers flushed) before the loop returns.
pub async fn reconcile_loop(
    mut reconciler: Reconciler,
    source: Option<Arc<dyn ConfigSource>>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick(), if source.is_some() => {
                if let Some(source) = source.as_deref() {
                    match reconciler.reconcile_once(source).await {
                        Ok(report) if report.is_noop() => log_debug!("watch targets unchanged"),
                        Ok(report) => log_info!(
                            "watch targets reconciled: {} started, {} stopped, {} skipped",
                            report.started.len(),
                            report.stopped.len(),
                            report.skipped.len()
                        ),
                        Err(err) => {
                            log_warn!("config source read failed, keeping current watches: {err:#}")
                        }
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("reconcile loop shutting down");
                break;
            }
        }
    }

    reconciler.stop_all().await;
}
