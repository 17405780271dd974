use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params_from_iter, Row};

use super::{
    desktop_sessions::{row_to_desktop_session, DESKTOP_COLUMNS},
    file_events::{row_to_file_event, FILE_EVENT_COLUMNS},
    input_sessions::{row_to_input_session, INPUT_COLUMNS},
};
use crate::{
    db::{
        connection::Database,
        helpers::epoch_now,
        models::{LocalRecord, MalformedRow, Stream, UnsyncedRows},
    },
    sync::LocalQueue,
};

// Stays well under SQLite's bound-parameter limit.
const MARK_CHUNK: usize = 500;

fn columns(stream: Stream) -> &'static str {
    match stream {
        Stream::DesktopSessions => DESKTOP_COLUMNS,
        Stream::FileEvents => FILE_EVENT_COLUMNS,
        Stream::InputSessions => INPUT_COLUMNS,
    }
}

fn decode(stream: Stream, row: &Row) -> Result<LocalRecord> {
    Ok(match stream {
        Stream::DesktopSessions => LocalRecord::Desktop(row_to_desktop_session(row)?),
        Stream::FileEvents => LocalRecord::File(row_to_file_event(row)?),
        Stream::InputSessions => LocalRecord::Input(row_to_input_session(row)?),
    })
}

impl Database {
    /// Append any record to its stream. The returned id is the local id the
    /// sync engine later marks.
    pub async fn append(&self, record: &LocalRecord) -> Result<i64> {
        match record {
            LocalRecord::Desktop(session) => self.insert_desktop_session(session).await,
            LocalRecord::File(event) => self.insert_file_event(event).await,
            LocalRecord::Input(session) => self.insert_input_session(session).await,
        }
    }

    /// Every row with no synced marker, ordered by occurrence time (id breaks
    /// ties). Rows that fail to decode are reported, not dropped.
    pub async fn fetch_unsynced(&self, stream: Stream) -> Result<UnsyncedRows> {
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {} FROM {} WHERE synced_at IS NULL ORDER BY {} ASC, id ASC",
                columns(stream),
                stream.table(),
                stream.time_column(),
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;

            let mut out = UnsyncedRows::default();
            while let Some(row) = rows.next()? {
                let local_id: i64 = row.get("id")?;
                match decode(stream, row) {
                    Ok(record) => out.records.push(record),
                    Err(err) => out.malformed.push(MalformedRow {
                        local_id,
                        reason: format!("{err:#}"),
                    }),
                }
            }
            Ok(out)
        })
        .await
        .with_context(|| format!("failed to fetch unsynced {stream}"))
    }

    /// Stamp `ids` as synced. Rows that already carry a marker keep it, so
    /// repeating the call changes nothing. Returns the number newly marked.
    pub async fn mark_synced(&self, stream: Stream, ids: Vec<i64>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let now = epoch_now();
            let mut marked = 0;
            for chunk in ids.chunks(MARK_CHUNK) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                let sql = format!(
                    "UPDATE {} SET synced_at = {now} WHERE synced_at IS NULL AND id IN ({placeholders})",
                    stream.table(),
                );
                marked += tx.execute(&sql, params_from_iter(chunk.iter()))?;
            }
            tx.commit()?;
            Ok(marked)
        })
        .await
        .with_context(|| format!("failed to mark {stream} synced"))
    }

    pub async fn count_unsynced(&self, stream: Stream) -> Result<i64> {
        self.execute(move |conn| {
            let sql = format!(
                "SELECT COUNT(*) FROM {} WHERE synced_at IS NULL",
                stream.table()
            );
            Ok(conn.query_row(&sql, [], |row| row.get(0))?)
        })
        .await
    }
}

#[async_trait]
impl LocalQueue for Database {
    async fn fetch_unsynced(&self, stream: Stream) -> Result<UnsyncedRows> {
        Database::fetch_unsynced(self, stream).await
    }

    async fn mark_synced(&self, stream: Stream, ids: Vec<i64>) -> Result<usize> {
        Database::mark_synced(self, stream, ids).await
    }
}
