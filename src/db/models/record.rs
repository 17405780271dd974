//! One tagged variant per replicated stream.
//!
//! Rows are decoded into these types once, when they leave the local store;
//! everything downstream (batching, central inserts) trusts them as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DesktopSession, FileEvent, InputSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    DesktopSessions,
    FileEvents,
    InputSessions,
}

impl Stream {
    pub const ALL: [Stream; 3] = [
        Stream::DesktopSessions,
        Stream::FileEvents,
        Stream::InputSessions,
    ];

    /// Table name, identical in the local and the central store.
    pub fn table(&self) -> &'static str {
        match self {
            Stream::DesktopSessions => "desktop_activity_sessions",
            Stream::FileEvents => "file_change_events",
            Stream::InputSessions => "input_activity_sessions",
        }
    }

    /// Column that orders replication within the stream.
    pub(crate) fn time_column(&self) -> &'static str {
        match self {
            Stream::DesktopSessions | Stream::InputSessions => "start_time",
            Stream::FileEvents => "event_time",
        }
    }
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocalRecord {
    Desktop(DesktopSession),
    File(FileEvent),
    Input(InputSession),
}

impl LocalRecord {
    pub fn stream(&self) -> Stream {
        match self {
            LocalRecord::Desktop(_) => Stream::DesktopSessions,
            LocalRecord::File(_) => Stream::FileEvents,
            LocalRecord::Input(_) => Stream::InputSessions,
        }
    }

    /// Local row id. Records read back from the store always carry one.
    pub fn local_id(&self) -> Option<i64> {
        match self {
            LocalRecord::Desktop(session) => session.id,
            LocalRecord::File(event) => event.id,
            LocalRecord::Input(session) => session.id,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LocalRecord::Desktop(session) => session.start,
            LocalRecord::File(event) => event.occurred_at,
            LocalRecord::Input(session) => session.start,
        }
    }
}

/// A row that could not be decoded into its stream's record type.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedRow {
    pub local_id: i64,
    pub reason: String,
}

/// Result of a `fetch_unsynced` call: decodable records in occurrence order,
/// plus the rows that were rejected on the way out.
#[derive(Debug, Clone, Default)]
pub struct UnsyncedRows {
    pub records: Vec<LocalRecord>,
    pub malformed: Vec<MalformedRow>,
}

impl UnsyncedRows {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.malformed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len() + self.malformed.len()
    }
}
