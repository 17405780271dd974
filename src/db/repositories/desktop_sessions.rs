use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{collapse_optional, collapse_timestamp, epoch_now, timestamp_pair},
    models::DesktopSession,
};

pub(super) const DESKTOP_COLUMNS: &str =
    "id, start_time, start_time_iso, end_time, end_time_iso, application_name, window_title";

pub(super) fn row_to_desktop_session(row: &Row) -> Result<DesktopSession> {
    let start_time: i64 = row.get("start_time")?;
    let start_time_iso: Option<String> = row.get("start_time_iso")?;
    let end_time: Option<i64> = row.get("end_time")?;
    let end_time_iso: Option<String> = row.get("end_time_iso")?;

    Ok(DesktopSession {
        id: Some(row.get("id")?),
        start: collapse_timestamp(start_time, start_time_iso.as_deref(), "start_time")?,
        end: collapse_optional(end_time, end_time_iso.as_deref(), "end_time")?,
        application_name: row.get("application_name")?,
        window_title: row.get("window_title")?,
    })
}

impl Database {
    /// Append a newly opened session and return its local id.
    pub async fn insert_desktop_session(&self, session: &DesktopSession) -> Result<i64> {
        let record = session.clone();
        self.execute(move |conn| {
            let (start, start_iso) = timestamp_pair(record.start);
            let end = record.end.map(timestamp_pair);
            let now = epoch_now();
            conn.execute(
                "INSERT INTO desktop_activity_sessions
                     (start_time, end_time, start_time_iso, end_time_iso, application_name,
                      window_title, duration_seconds, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    start,
                    end.as_ref().map(|(epoch, _)| *epoch),
                    start_iso,
                    end.as_ref().map(|(_, iso)| iso.clone()),
                    record.application_name,
                    record.window_title,
                    record.duration_seconds(),
                    now,
                ],
            )
            .context("failed to insert desktop session")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Set end time and duration. Returns `false` if the session was already
    /// closed or does not exist; a closed session is never reopened.
    pub async fn close_desktop_session(&self, id: i64, end: DateTime<Utc>) -> Result<bool> {
        self.execute(move |conn| {
            let (end_epoch, end_iso) = timestamp_pair(end);
            let changed = conn
                .execute(
                    "UPDATE desktop_activity_sessions
                     SET end_time = ?1,
                         end_time_iso = ?2,
                         duration_seconds = MAX(?1 - start_time, 0),
                         updated_at = ?3
                     WHERE id = ?4 AND end_time IS NULL",
                    params![end_epoch, end_iso, epoch_now(), id],
                )
                .context("failed to close desktop session")?;
            Ok(changed == 1)
        })
        .await
    }

    pub async fn get_desktop_session(&self, id: i64) -> Result<Option<DesktopSession>> {
        self.execute(move |conn| {
            let sql = format!("SELECT {DESKTOP_COLUMNS} FROM desktop_activity_sessions WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let session = stmt
                .query_row(params![id], |row| Ok(row_to_desktop_session(row)))
                .optional()?
                .transpose()?;
            Ok(session)
        })
        .await
    }
}
