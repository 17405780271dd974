mod connection;
pub mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use models::{
    DesktopSession, FileEvent, FileEventKind, InputSession, LocalRecord, MalformedRow, Stream,
    UnsyncedRows,
};
