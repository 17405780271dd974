//! Input presence tracking. Only the instants at which some keyboard or
//! pointer input happened are seen; what was typed or clicked never is.

use std::{io::ErrorKind, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::{
    process::Command,
    time::{Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::db::{Database, InputSession, LocalRecord};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[async_trait]
pub trait PresenceSource: Send + Sync {
    /// Instant of the most recent input, if it can be determined.
    async fn last_input(&self) -> Option<DateTime<Utc>>;
}

/// X11 idle counter via `xprintidle` (milliseconds since the last input).
#[derive(Debug, Default, Clone, Copy)]
pub struct XprintidleSource;

#[async_trait]
impl PresenceSource for XprintidleSource {
    async fn last_input(&self) -> Option<DateTime<Utc>> {
        let output = match Command::new("xprintidle").kill_on_drop(true).output().await {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                log_debug!("xprintidle exited with {}", output.status);
                return None;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                log_error!("xprintidle not found; input presence cannot be tracked");
                return None;
            }
            Err(err) => {
                log_warn!("failed to run xprintidle: {err}");
                return None;
            }
        };
        let idle_ms: i64 = String::from_utf8_lossy(&output.stdout).trim().parse().ok()?;
        Some(Utc::now() - ChronoDuration::milliseconds(idle_ms))
    }
}

/// Holds the one open input session and applies the idle timeout.
pub struct InputTracker {
    db: Database,
    idle_timeout: ChronoDuration,
    current: Option<InputSession>,
    last_input: Option<DateTime<Utc>>,
}

impl InputTracker {
    /// Sessions a previous process left open are discarded first.
    pub async fn start(db: Database, idle_timeout: Duration) -> Result<Self> {
        let removed = db.delete_incomplete_input_sessions().await?;
        if removed > 0 {
            log_info!("removed {removed} incomplete input sessions from a previous run");
        }
        let idle_timeout = ChronoDuration::from_std(idle_timeout)
            .context("idle timeout out of range")?;
        Ok(Self {
            db,
            idle_timeout,
            current: None,
            last_input: None,
        })
    }

    pub fn current(&self) -> Option<&InputSession> {
        self.current.as_ref()
    }

    pub fn last_input(&self) -> Option<DateTime<Utc>> {
        self.last_input
    }

    /// Instants at or before the last one seen are ignored. A gap longer
    /// than the idle timeout ends the open session at the last input before
    /// the gap; `at` then starts a new one.
    pub async fn record_input(&mut self, at: DateTime<Utc>) -> Result<()> {
        if let Some(last) = self.last_input {
            if at <= last {
                return Ok(());
            }
            if at - last > self.idle_timeout {
                self.close().await?;
            }
        }

        if self.current.is_none() {
            let mut session = InputSession::open(at);
            let id = self
                .db
                .append(&LocalRecord::Input(session.clone()))
                .await
                .context("failed to open input session")?;
            session.id = Some(id);
            log_debug!("input session {id} opened");
            self.current = Some(session);
        }

        self.last_input = Some(at);
        Ok(())
    }

    /// Close the open session if no input arrived within the idle timeout.
    pub async fn check_timeout(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.last_input {
            Some(last) if self.current.is_some() && now - last > self.idle_timeout => {
                self.close().await
            }
            _ => Ok(()),
        }
    }

    /// End the open session at the last observed input.
    /// The session is forgotten only once the store has accepted the close.
    pub async fn close(&mut self) -> Result<()> {
        let Some((id, start)) = self.current.as_ref().map(|session| (session.id, session.start))
        else {
            return Ok(());
        };
        if let (Some(id), Some(end)) = (id, self.last_input) {
            self.db
                .close_input_session(id, end)
                .await
                .with_context(|| format!("failed to close input session {id}"))?;
            log_debug!("input session {id} closed after {}s", (end - start).num_seconds());
        }
        self.current = None;
        Ok(())
    }
}

pub async fn input_loop(
    mut tracker: InputTracker,
    source: Arc<dyn PresenceSource>,
    poll_interval: Duration,
    check_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut check = tokio::time::interval(check_interval);
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = poll.tick() => {
                if let Some(at) = source.last_input().await {
                    if let Err(err) = tracker.record_input(at).await {
                        log_error!("input tracking failed: {err:#}");
                    }
                }
            }
            _ = check.tick() => {
                if let Err(err) = tracker.check_timeout(Utc::now()).await {
                    log_error!("input timeout check failed: {err:#}");
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("input loop shutting down");
                break;
            }
        }
    }

    if let Err(err) = tracker.close().await {
        log_error!("failed to close input session on shutdown: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tracker(idle_secs: u64) -> (tempfile::TempDir, Database, InputTracker) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("local.db")).unwrap();
        let tracker = InputTracker::start(db.clone(), Duration::from_secs(idle_secs))
            .await
            .unwrap();
        (dir, db, tracker)
    }

    #[tokio::test]
    async fn gaps_within_timeout_keep_the_session_open() {
        let (_dir, _db, mut tracker) = tracker(120).await;
        let t0 = Utc::now() - ChronoDuration::minutes(30);

        tracker.record_input(t0).await.unwrap();
        let id = tracker.current().unwrap().id;
        for offset in [60, 180, 300] {
            tracker
                .record_input(t0 + ChronoDuration::seconds(offset))
                .await
                .unwrap();
        }
        assert_eq!(tracker.current().unwrap().id, id);
    }

    #[tokio::test]
    async fn long_gap_ends_session_at_last_input() {
        let (_dir, db, mut tracker) = tracker(120).await;
        let t0 = Utc::now() - ChronoDuration::minutes(30);

        tracker.record_input(t0).await.unwrap();
        let first = tracker.current().unwrap().id.unwrap();
        tracker
            .record_input(t0 + ChronoDuration::seconds(100))
            .await
            .unwrap();
        tracker
            .record_input(t0 + ChronoDuration::seconds(221))
            .await
            .unwrap();

        let closed = db.get_input_session(first).await.unwrap().unwrap();
        assert_eq!(closed.duration_seconds(), Some(100));
        let second = tracker.current().unwrap();
        assert_ne!(second.id, Some(first));
        assert_eq!(second.start.timestamp(), (t0 + ChronoDuration::seconds(221)).timestamp());
    }

    #[tokio::test]
    async fn timeout_check_closes_an_idle_session() {
        let (_dir, db, mut tracker) = tracker(120).await;
        let t0 = Utc::now() - ChronoDuration::minutes(30);
        tracker.record_input(t0).await.unwrap();
        tracker
            .record_input(t0 + ChronoDuration::seconds(15))
            .await
            .unwrap();
        let id = tracker.current().unwrap().id.unwrap();

        tracker
            .check_timeout(t0 + ChronoDuration::seconds(120))
            .await
            .unwrap();
        assert!(tracker.current().is_some());

        tracker
            .check_timeout(t0 + ChronoDuration::seconds(136))
            .await
            .unwrap();
        assert!(tracker.current().is_none());
        let closed = db.get_input_session(id).await.unwrap().unwrap();
        assert_eq!(closed.duration_seconds(), Some(15));
    }

    #[tokio::test]
    async fn failed_timeout_close_is_retried_on_the_next_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.db");
        let db = Database::with_busy_timeout(path.clone(), Duration::from_millis(10)).unwrap();
        let mut tracker = InputTracker::start(db.clone(), Duration::from_secs(120))
            .await
            .unwrap();
        let t0 = Utc::now() - ChronoDuration::minutes(30);
        tracker.record_input(t0).await.unwrap();
        tracker
            .record_input(t0 + ChronoDuration::seconds(40))
            .await
            .unwrap();
        let id = tracker.current().unwrap().id.unwrap();

        let blocker = rusqlite::Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN EXCLUSIVE").unwrap();
        let result = tracker.check_timeout(t0 + ChronoDuration::seconds(200)).await;
        blocker.execute_batch("ROLLBACK").unwrap();

        assert!(result.is_err());
        assert_eq!(tracker.current().unwrap().id, Some(id));

        tracker
            .check_timeout(t0 + ChronoDuration::seconds(210))
            .await
            .unwrap();
        assert!(tracker.current().is_none());
        let closed = db.get_input_session(id).await.unwrap().unwrap();
        assert_eq!(closed.duration_seconds(), Some(40));
    }

    #[tokio::test]
    async fn startup_discards_sessions_left_open() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("local.db")).unwrap();
        db.append(&LocalRecord::Input(InputSession::open(Utc::now())))
            .await
            .unwrap();

        let _tracker = InputTracker::start(db.clone(), Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(
            db.count_unsynced(crate::db::Stream::InputSessions).await.unwrap(),
            0
        );
    }
}
