use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Duration, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::{HookEvent, HookGuard, HookKind, WatchHook, WatchPolicy, HOOK_CHANNEL_CAPACITY};
use crate::{
    db::{Database, FileEvent, FileEventKind},
    error::{is_transient, AgentError},
    utils::paths::check_accessible,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const FINAL_FLUSH_ATTEMPTS: u32 = 3;
const FINAL_FLUSH_BACKOFF: Duration = Duration::from_millis(250);

/// Where flushed snapshots go. One call per snapshot.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn store(&self, events: Vec<FileEvent>) -> Result<()>;
}

#[async_trait]
impl EventSink for Database {
    async fn store(&self, events: Vec<FileEvent>) -> Result<()> {
        self.insert_file_events(events).await.map(|_| ())
    }
}

/// A live watch on one root: the hook registration plus the task that owns
/// its buffer.
pub struct WatchHandle {
    root: PathBuf,
    guard: Option<Box<dyn HookGuard>>,
    cancel_token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Register `hook` on `root` and start buffering. Fails with
    /// `WatchTargetUnreachable` when the directory cannot be read.
    pub fn start(
        root: PathBuf,
        hook: &dyn WatchHook,
        sink: Arc<dyn EventSink>,
        policy: Arc<WatchPolicy>,
    ) -> Result<Self> {
        if let Err(reason) = check_accessible(&root) {
            return Err(anyhow::Error::new(AgentError::WatchTargetUnreachable { path: root })
                .context(reason));
        }

        let (tx, rx) = mpsc::channel(HOOK_CHANNEL_CAPACITY);
        let guard = hook
            .register(&root, tx)
            .with_context(|| format!("failed to register hook on {}", root.display()))?;

        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(buffer_task(
            root.clone(),
            rx,
            sink,
            policy,
            cancel_token.clone(),
        ));

        log_info!("watching {}", root.display());
        Ok(Self {
            root,
            guard: Some(guard),
            cancel_token,
            task: Some(task),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Unregister the hook, flush whatever is buffered, then wait for the
    /// task. No event from this root reaches the store afterwards.
    pub async fn stop(mut self) -> Result<()> {
        drop(self.guard.take());
        self.cancel_token.cancel();
        if let Some(task) = self.task.take() {
            task.await
                .with_context(|| format!("watch task for {} failed to join", self.root.display()))?;
        }
        log_info!("stopped watching {}", self.root.display());
        Ok(())
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn buffer_task(
    root: PathBuf,
    mut rx: mpsc::Receiver<HookEvent>,
    sink: Arc<dyn EventSink>,
    policy: Arc<WatchPolicy>,
    cancel_token: CancellationToken,
) {
    let mut buffer: Vec<FileEvent> = Vec::new();
    let mut ticker =
        tokio::time::interval_at(Instant::now() + policy.flush_interval, policy.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(event) => {
                    accept(&root, &policy, event, &mut buffer);
                    if buffer.len() >= policy.buffer_max {
                        flush(&root, sink.as_ref(), &mut buffer).await;
                    }
                }
                None => {
                    log_debug!("hook for {} closed", root.display());
                    break;
                }
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&root, sink.as_ref(), &mut buffer).await;
                }
            }
            _ = cancel_token.cancelled() => {
                while let Ok(event) = rx.try_recv() {
                    accept(&root, &policy, event, &mut buffer);
                }
                break;
            }
        }
    }

    for attempt in 1..=FINAL_FLUSH_ATTEMPTS {
        flush(&root, sink.as_ref(), &mut buffer).await;
        if buffer.is_empty() {
            return;
        }
        if attempt < FINAL_FLUSH_ATTEMPTS {
            tokio::time::sleep(FINAL_FLUSH_BACKOFF).await;
        }
    }
    log_error!(
        "local store still busy at shutdown, {} events from {} were not saved",
        buffer.len(),
        root.display()
    );
}

/// Filter one hook event into the buffer. Both halves of a move are pushed
/// before the caller looks at the size threshold, so they always share a
/// snapshot.
fn accept(root: &Path, policy: &WatchPolicy, event: HookEvent, buffer: &mut Vec<FileEvent>) {
    if event.is_dir {
        return;
    }

    let halves = match event.kind {
        HookKind::Created(path) => vec![(FileEventKind::Created, path)],
        HookKind::Modified(path) => vec![(FileEventKind::Modified, path)],
        HookKind::Deleted(path) => vec![(FileEventKind::Deleted, path)],
        HookKind::Moved { from, to } => {
            vec![(FileEventKind::Deleted, from), (FileEventKind::Created, to)]
        }
    };

    for (kind, path) in halves {
        if policy.is_excluded(&path) {
            continue;
        }
        buffer.push(FileEvent::observe(kind, &path, root, event.at));
    }
}

async fn flush(root: &Path, sink: &dyn EventSink, buffer: &mut Vec<FileEvent>) {
    if buffer.is_empty() {
        return;
    }

    let snapshot = std::mem::take(buffer);
    let count = snapshot.len();
    match sink.store(snapshot.clone()).await {
        Ok(()) => log_debug!("flushed {count} events from {}", root.display()),
        Err(err) if is_transient(&err) => {
            log_warn!(
                "local store busy, keeping {count} events from {} for the next flush",
                root.display()
            );
            let newer = std::mem::replace(buffer, snapshot);
            buffer.extend(newer);
        }
        Err(err) => {
            log_error!("dropping {count} events from {}: {err:#}", root.display());
        }
    }
}
