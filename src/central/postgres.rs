use std::{
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::{
    postgres::{PgPoolOptions, Postgres},
    PgPool, Transaction,
};

use super::{CentralStore, SyncRun};
use crate::{
    db::{helpers::to_i64, DesktopSession, FileEvent, InputSession, LocalRecord, Stream},
    error::classify_sqlx,
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const SCHEMA: &str = include_str!("schema.sql");

/// Central store over a Postgres pool. Pools are cheap to clone; the config
/// source shares this one.
///
/// The pool connects lazily, so an unreachable server at startup only shows
/// up as transient errors on each sync run until it comes back.
#[derive(Clone)]
pub struct PgCentralStore {
    pool: PgPool,
    schema_ready: Arc<AtomicBool>,
}

impl PgCentralStore {
    /// Build the pool without touching the network. Only a malformed URL
    /// fails here.
    pub fn connect_lazy(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(url)
            .context("invalid central store URL")?;
        log_info!("central store pool ready (max {max_connections} connections)");
        Ok(Self {
            pool,
            schema_ready: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the central tables when missing. Failure is logged and
    /// tolerated: the schema is usually owned by the backend. Retried before
    /// the next write until it succeeds once.
    pub async fn ensure_schema(&self) -> bool {
        if self.schema_ready.load(Ordering::Acquire) {
            return true;
        }
        match sqlx::raw_sql(SCHEMA).execute(&self.pool).await {
            Ok(_) => {
                self.schema_ready.store(true, Ordering::Release);
                true
            }
            Err(err) => {
                log_warn!("could not ensure central schema: {err}");
                false
            }
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CentralStore for PgCentralStore {
    async fn insert_batch(
        &self,
        stream: Stream,
        host: &str,
        records: &[LocalRecord],
    ) -> Result<()> {
        self.ensure_schema().await;
        let mut tx = self.pool.begin().await.map_err(classify_sqlx)?;

        for record in records {
            if record.stream() != stream {
                return Err(anyhow!(
                    "{} record in a {stream} batch",
                    record.stream()
                ));
            }
            let local_id = record
                .local_id()
                .ok_or_else(|| anyhow!("{stream} record without a local id"))?;
            match record {
                LocalRecord::Desktop(session) => {
                    insert_desktop(&mut tx, session, host, local_id).await?
                }
                LocalRecord::File(event) => insert_file(&mut tx, event, host, local_id).await?,
                LocalRecord::Input(session) => {
                    insert_input(&mut tx, session, host, local_id).await?
                }
            }
        }

        tx.commit().await.map_err(classify_sqlx)?;
        Ok(())
    }

    async fn record_sync_run(&self, run: &SyncRun) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_runs (run_id, stream, started_at, completed_at, records_synced, \
             records_failed, status, error_message, host_identifier) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(run.run_id)
        .bind(run.stream.table())
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(to_i64(run.synced)?)
        .bind(to_i64(run.failed)?)
        .bind(run.status.as_str())
        .bind(run.error.as_deref())
        .bind(&run.host)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)
        .with_context(|| format!("failed to record sync run for {}", run.stream))?;
        Ok(())
    }
}

async fn insert_desktop(
    tx: &mut Transaction<'_, Postgres>,
    session: &DesktopSession,
    host: &str,
    local_id: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO desktop_activity_sessions (start_time, end_time, application_name, \
         window_title, duration_seconds, host_identifier, local_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(session.start)
    .bind(session.end)
    .bind(&session.application_name)
    .bind(&session.window_title)
    .bind(session.duration_seconds())
    .bind(host)
    .bind(local_id)
    .execute(&mut **tx)
    .await
    .map_err(classify_sqlx)?;
    Ok(())
}

async fn insert_file(
    tx: &mut Transaction<'_, Postgres>,
    event: &FileEvent,
    host: &str,
    local_id: i64,
) -> Result<()> {
    let file_size = event.file_size.map(to_i64).transpose()?;
    sqlx::query(
        "INSERT INTO file_change_events (event_time, event_type, file_path, file_path_relative, \
         file_name, file_extension, file_size, is_symlink, monitored_root, project_name, \
         host_identifier, local_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(event.occurred_at)
    .bind(event.kind.as_str())
    .bind(&event.file_path)
    .bind(event.file_path_relative.as_deref())
    .bind(&event.file_name)
    .bind(event.file_extension.as_deref())
    .bind(file_size)
    .bind(event.is_symlink)
    .bind(&event.monitored_root)
    .bind(event.project_name.as_deref())
    .bind(host)
    .bind(local_id)
    .execute(&mut **tx)
    .await
    .map_err(classify_sqlx)?;
    Ok(())
}

async fn insert_input(
    tx: &mut Transaction<'_, Postgres>,
    session: &InputSession,
    host: &str,
    local_id: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO input_activity_sessions (start_time, end_time, duration_seconds, \
         host_identifier, local_id) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(session.start)
    .bind(session.end)
    .bind(session.duration_seconds())
    .bind(host)
    .bind(local_id)
    .execute(&mut **tx)
    .await
    .map_err(classify_sqlx)?;
    Ok(())
}
