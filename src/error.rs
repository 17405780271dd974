//! Error kinds shared across the agent.
//!
//! Most functions return `anyhow::Result`; these variants are attached at
//! component boundaries so callers can classify a failure without string
//! matching.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Local file contention or a dropped central connection. Retried by the
    /// next scheduled run.
    #[error("transient storage error: {0}")]
    TransientStorage(String),

    #[error("config source unavailable: {0}")]
    ConfigUnavailable(String),

    #[error("watch target unreachable: {}", path.display())]
    WatchTargetUnreachable { path: PathBuf },
}

/// True when the error carries a `TransientStorage` tag, either as its root
/// cause or attached as context at any layer.
pub fn is_transient(err: &anyhow::Error) -> bool {
    fn tagged(kind: Option<&AgentError>) -> bool {
        matches!(kind, Some(AgentError::TransientStorage(_)))
    }

    // `downcast_ref` on the `anyhow::Error` sees context values; walking
    // `chain()` only sees the source errors underneath them.
    tagged(err.downcast_ref::<AgentError>())
        || err
            .chain()
            .any(|cause| tagged(cause.downcast_ref::<AgentError>()))
}

/// SQLite busy/locked codes are the only local failures worth retrying.
pub(crate) fn is_sqlite_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

pub(crate) fn is_sqlx_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Tls(_)
    )
}

/// Tags a sqlx failure with `TransientStorage` when it is a connectivity
/// problem, otherwise passes it through untouched.
pub(crate) fn classify_sqlx(err: sqlx::Error) -> anyhow::Error {
    if is_sqlx_transient(&err) {
        anyhow::Error::new(AgentError::TransientStorage(err.to_string()))
    } else {
        anyhow::Error::new(err)
    }
}
