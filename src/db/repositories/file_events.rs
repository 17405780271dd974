use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{collapse_timestamp, epoch_now, int_to_bool, timestamp_pair, to_i64, to_u64},
    models::{FileEvent, FileEventKind},
};

pub(super) const FILE_EVENT_COLUMNS: &str = "id, event_time, event_time_iso, event_type, file_path, \
     file_path_relative, file_name, file_extension, file_size, is_symlink, monitored_root, \
     project_name";

pub(super) fn row_to_file_event(row: &Row) -> Result<FileEvent> {
    let event_time: i64 = row.get("event_time")?;
    let event_time_iso: Option<String> = row.get("event_time_iso")?;
    let event_type: String = row.get("event_type")?;
    let file_size: Option<i64> = row.get("file_size")?;
    let is_symlink: i64 = row.get("is_symlink")?;

    Ok(FileEvent {
        id: Some(row.get("id")?),
        occurred_at: collapse_timestamp(event_time, event_time_iso.as_deref(), "event_time")?,
        kind: FileEventKind::parse(&event_type)?,
        file_path: row.get("file_path")?,
        file_path_relative: row.get("file_path_relative")?,
        file_name: row.get("file_name")?,
        file_extension: row.get("file_extension")?,
        file_size: file_size.map(|size| to_u64(size, "file_size")).transpose()?,
        is_symlink: int_to_bool(is_symlink, "is_symlink")?,
        monitored_root: row.get("monitored_root")?,
        project_name: row.get("project_name")?,
    })
}

impl Database {
    pub async fn insert_file_event(&self, event: &FileEvent) -> Result<i64> {
        let ids = self.insert_file_events(vec![event.clone()]).await?;
        Ok(ids[0])
    }

    /// Persist one flushed buffer snapshot in a single local transaction so a
    /// rename's delete/create pair lands together.
    pub async fn insert_file_events(&self, events: Vec<FileEvent>) -> Result<Vec<i64>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut ids = Vec::with_capacity(events.len());
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO file_change_events
                         (event_time, event_time_iso, event_type, file_path, file_path_relative,
                          file_name, file_extension, file_size, is_symlink, monitored_root,
                          project_name, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                )?;
                let now = epoch_now();
                for event in &events {
                    let (epoch, iso) = timestamp_pair(event.occurred_at);
                    stmt.execute(params![
                        epoch,
                        iso,
                        event.kind.as_str(),
                        event.file_path,
                        event.file_path_relative,
                        event.file_name,
                        event.file_extension,
                        event.file_size.map(to_i64).transpose()?,
                        event.is_symlink as i64,
                        event.monitored_root,
                        event.project_name,
                        now,
                    ])
                    .with_context(|| format!("failed to insert file event for {}", event.file_path))?;
                    ids.push(tx.last_insert_rowid());
                }
            }
            tx.commit().context("failed to commit file events")?;
            Ok(ids)
        })
        .await
    }
}
