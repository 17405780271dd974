use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use notify::{
    event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
    Event, EventKind, RecursiveMode, Watcher,
};
use tokio::sync::mpsc;

use super::{HookEvent, HookGuard, HookKind, WatchHook};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Hook backed by the platform's native notifier (inotify, FSEvents, ...).
/// Callbacks arrive on notify's own thread, so sending blocks that thread,
/// never the runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyHook;

impl WatchHook for NotifyHook {
    fn register(
        &self,
        root: &Path,
        events: mpsc::Sender<HookEvent>,
    ) -> Result<Box<dyn HookGuard>> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for hook_event in translate(&event, Utc::now()) {
                    if events.blocking_send(hook_event).is_err() {
                        log_debug!("watch handle gone, dropping filesystem event");
                        break;
                    }
                }
            }
            Err(err) => log_warn!("filesystem watcher error: {err}"),
        })
        .context("failed to create filesystem watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", root.display()))?;

        Ok(Box::new(watcher))
    }
}

fn translate(event: &Event, at: DateTime<Utc>) -> Vec<HookEvent> {
    let each = |make: &dyn Fn(&PathBuf) -> (HookKind, bool)| -> Vec<HookEvent> {
        event
            .paths
            .iter()
            .map(|path| {
                let (kind, is_dir) = make(path);
                HookEvent { kind, is_dir, at }
            })
            .collect()
    };

    match &event.kind {
        EventKind::Create(kind) => each(&|path| {
            let is_dir = matches!(kind, CreateKind::Folder) || path.is_dir();
            (HookKind::Created(path.clone()), is_dir)
        }),
        EventKind::Modify(ModifyKind::Name(mode)) => rename(mode, &event.paths, at),
        // Permission and timestamp changes are not content changes.
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => each(&|path| (HookKind::Modified(path.clone()), path.is_dir())),
        EventKind::Remove(kind) => each(&|path| {
            (HookKind::Deleted(path.clone()), matches!(kind, RemoveKind::Folder))
        }),
        _ => Vec::new(),
    }
}

fn rename(mode: &RenameMode, paths: &[PathBuf], at: DateTime<Utc>) -> Vec<HookEvent> {
    let event = |kind, is_dir| HookEvent { kind, is_dir, at };
    match (mode, paths) {
        (RenameMode::Both, [from, to, ..]) => vec![event(
            HookKind::Moved {
                from: from.clone(),
                to: to.clone(),
            },
            to.is_dir(),
        )],
        (RenameMode::From, [from, ..]) => vec![event(HookKind::Deleted(from.clone()), false)],
        (RenameMode::To, [to, ..]) => vec![event(HookKind::Created(to.clone()), to.is_dir())],
        // Unpaired halves: whichever side still exists was the destination.
        _ => paths
            .iter()
            .map(|path| {
                if path.exists() {
                    event(HookKind::Created(path.clone()), path.is_dir())
                } else {
                    event(HookKind::Deleted(path.clone()), false)
                }
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::DataChange;

    #[test]
    fn paired_rename_becomes_one_move() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/w/old.rs"))
            .add_path(PathBuf::from("/w/new.rs"));
        let out = translate(&event, Utc::now());
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].kind,
            HookKind::Moved {
                from: PathBuf::from("/w/old.rs"),
                to: PathBuf::from("/w/new.rs"),
            }
        );
    }

    #[test]
    fn folder_events_are_flagged() {
        let created = Event::new(EventKind::Create(CreateKind::Folder)).add_path(PathBuf::from("/w/sub"));
        assert!(translate(&created, Utc::now())[0].is_dir);

        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path(PathBuf::from("/w/a.rs"));
        let out = translate(&removed, Utc::now());
        assert_eq!(out[0].kind, HookKind::Deleted(PathBuf::from("/w/a.rs")));
        assert!(!out[0].is_dir);
    }

    #[test]
    fn data_changes_are_modifications_and_access_is_ignored() {
        let modified = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/w/a.rs"));
        assert_eq!(
            translate(&modified, Utc::now())[0].kind,
            HookKind::Modified(PathBuf::from("/w/a.rs"))
        );

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/w/a.rs"));
        assert!(translate(&access, Utc::now()).is_empty());
    }

    #[tokio::test]
    async fn notify_hook_reports_a_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let _guard = NotifyHook.register(&root, tx).unwrap();

        let file = root.join("fresh.txt");
        std::fs::write(&file, b"hello").unwrap();

        let seen = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                if matches!(&event.kind, HookKind::Created(path) if path == &file) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        assert!(seen);
    }
}
