//! Focused-window tracking. Polls the active window and turns a change of
//! (application, title) into a closed session plus a freshly opened one.

use std::{io::ErrorKind, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::{
    process::Command,
    time::{Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::db::{Database, DesktopSession, LocalRecord};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowObservation {
    pub application_name: String,
    pub window_title: String,
}

#[async_trait]
pub trait WindowSource: Send + Sync {
    /// The focused window, or `None` when it cannot be determined right now.
    async fn active_window(&self) -> Option<WindowObservation>;
}

/// X11 probe via `xdotool getactivewindow` and `xprop`.
#[derive(Debug, Default, Clone, Copy)]
pub struct XdotoolSource;

#[async_trait]
impl WindowSource for XdotoolSource {
    async fn active_window(&self) -> Option<WindowObservation> {
        let window_id = run("xdotool", &["getactivewindow"]).await?;
        let props = run("xprop", &["-id", window_id.trim(), "WM_NAME", "WM_CLASS"]).await?;
        let observation = parse_xprop(&props);
        if observation.is_none() {
            log_debug!("active window has no title or class");
        }
        observation
    }
}

async fn run(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).kill_on_drop(true).output();
    match tokio::time::timeout(PROBE_TIMEOUT, output).await {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(Ok(output)) => {
            log_debug!("{program} exited with {}", output.status);
            None
        }
        Ok(Err(err)) if err.kind() == ErrorKind::NotFound => {
            log_error!("{program} not found; install xdotool and x11-utils");
            None
        }
        Ok(Err(err)) => {
            log_warn!("failed to run {program}: {err}");
            None
        }
        Err(_) => {
            log_warn!("{program} timed out after {}s", PROBE_TIMEOUT.as_secs());
            None
        }
    }
}

/// Pull the title out of `WM_NAME` and the class (last `WM_CLASS` entry).
/// Both must be present.
pub fn parse_xprop(output: &str) -> Option<WindowObservation> {
    let mut title = None;
    let mut class = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.starts_with("WM_NAME") {
            title = Some(unquote(value));
        } else if key.starts_with("WM_CLASS") {
            class = value.split(',').next_back().map(unquote);
        }
    }

    match (class, title) {
        (Some(application_name), Some(window_title))
            if !application_name.is_empty() && !window_title.is_empty() =>
        {
            Some(WindowObservation {
                application_name,
                window_title,
            })
        }
        _ => None,
    }
}

fn unquote(value: &str) -> String {
    value.trim().trim_matches('"').to_string()
}

/// Holds the one open desktop session.
pub struct DesktopTracker {
    db: Database,
    current: Option<DesktopSession>,
}

impl DesktopTracker {
    pub fn new(db: Database) -> Self {
        Self { db, current: None }
    }

    pub fn current(&self) -> Option<&DesktopSession> {
        self.current.as_ref()
    }

    /// Same window: nothing. Different window: close the open session at
    /// `at` and open the next one at the same instant.
    pub async fn observe(&mut self, window: WindowObservation, at: DateTime<Utc>) -> Result<()> {
        if let Some(current) = &self.current {
            if current.is_same_window(&window.application_name, &window.window_title) {
                return Ok(());
            }
        }

        self.close(at).await?;

        let mut session = DesktopSession::open(window.application_name, window.window_title, at);
        let id = self
            .db
            .append(&LocalRecord::Desktop(session.clone()))
            .await
            .context("failed to open desktop session")?;
        session.id = Some(id);
        log_info!(
            "desktop session {id} opened: {} - {}",
            session.application_name,
            session.window_title
        );
        self.current = Some(session);
        Ok(())
    }

    /// The session stays current until the store accepts the close, so a
    /// failed close can be retried.
    pub async fn close(&mut self, at: DateTime<Utc>) -> Result<()> {
        let Some((id, start)) = self.current.as_ref().map(|session| (session.id, session.start))
        else {
            return Ok(());
        };
        if let Some(id) = id {
            self.db
                .close_desktop_session(id, at)
                .await
                .with_context(|| format!("failed to close desktop session {id}"))?;
            log_debug!("desktop session {id} closed after {}s", (at - start).num_seconds());
        }
        self.current = None;
        Ok(())
    }
}

pub async fn desktop_loop(
    mut tracker: DesktopTracker,
    source: Arc<dyn WindowSource>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(window) = source.active_window().await {
                    if let Err(err) = tracker.observe(window, Utc::now()).await {
                        log_error!("desktop tracking failed: {err:#}");
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("desktop loop shutting down");
                break;
            }
        }
    }

    if let Err(err) = tracker.close(Utc::now()).await {
        log_error!("failed to close desktop session on shutdown: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn window(app: &str, title: &str) -> WindowObservation {
        WindowObservation {
            application_name: app.into(),
            window_title: title.into(),
        }
    }

    #[test]
    fn xprop_output_is_parsed() {
        let output = "WM_NAME(UTF8_STRING) = \"main.rs - reprospective - Code\"\n\
                      WM_CLASS(STRING) = \"code\", \"Code\"\n";
        assert_eq!(parse_xprop(output), Some(window("Code", "main.rs - reprospective - Code")));
    }

    #[test]
    fn xprop_without_title_yields_nothing() {
        let output = "WM_NAME:  not found.\nWM_CLASS(STRING) = \"xterm\", \"XTerm\"\n";
        assert_eq!(parse_xprop(output), None);
    }

    #[tokio::test]
    async fn switching_closes_and_opens_at_the_same_instant() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("local.db")).unwrap();
        let mut tracker = DesktopTracker::new(db.clone());
        let t0 = Utc::now() - ChronoDuration::minutes(5);

        tracker.observe(window("Code", "main.rs"), t0).await.unwrap();
        let first = tracker.current().unwrap().id.unwrap();

        // Repeating the same pair never opens a new session.
        tracker
            .observe(window("Code", "main.rs"), t0 + ChronoDuration::seconds(10))
            .await
            .unwrap();
        assert_eq!(tracker.current().unwrap().id, Some(first));

        let t1 = t0 + ChronoDuration::seconds(42);
        tracker.observe(window("Firefox", "docs"), t1).await.unwrap();
        let second = tracker.current().unwrap().clone();
        assert_ne!(second.id, Some(first));
        assert_eq!(second.start.timestamp(), t1.timestamp());

        let closed = db.get_desktop_session(first).await.unwrap().unwrap();
        assert_eq!(closed.end.map(|end| end.timestamp()), Some(t1.timestamp()));
        assert_eq!(closed.duration_seconds(), Some(42));

        // Same app, new title is a switch too.
        tracker
            .observe(window("Firefox", "search"), t1 + ChronoDuration::seconds(3))
            .await
            .unwrap();
        assert_ne!(tracker.current().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn failed_close_keeps_the_session_for_a_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.db");
        let db = Database::with_busy_timeout(path.clone(), Duration::from_millis(10)).unwrap();
        let mut tracker = DesktopTracker::new(db.clone());
        let t0 = Utc::now() - ChronoDuration::minutes(1);

        tracker.observe(window("Terminal", "zsh"), t0).await.unwrap();
        let id = tracker.current().unwrap().id.unwrap();

        let blocker = rusqlite::Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN EXCLUSIVE").unwrap();
        let err = tracker.close(t0 + ChronoDuration::seconds(20)).await.unwrap_err();
        blocker.execute_batch("ROLLBACK").unwrap();

        assert!(crate::error::is_transient(&err), "expected transient, got {err:#}");
        assert_eq!(tracker.current().unwrap().id, Some(id));

        tracker.close(t0 + ChronoDuration::seconds(25)).await.unwrap();
        assert!(tracker.current().is_none());
        let closed = db.get_desktop_session(id).await.unwrap().unwrap();
        assert_eq!(closed.duration_seconds(), Some(25));
    }

    #[tokio::test]
    async fn close_ends_the_open_session_once() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("local.db")).unwrap();
        let mut tracker = DesktopTracker::new(db.clone());
        let t0 = Utc::now() - ChronoDuration::minutes(1);

        tracker.observe(window("Terminal", "zsh"), t0).await.unwrap();
        let id = tracker.current().unwrap().id.unwrap();
        tracker.close(t0 + ChronoDuration::seconds(30)).await.unwrap();
        tracker.close(t0 + ChronoDuration::seconds(90)).await.unwrap();

        assert!(tracker.current().is_none());
        let closed = db.get_desktop_session(id).await.unwrap().unwrap();
        assert_eq!(closed.duration_seconds(), Some(30));
    }
}
