use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use super::{ConfigSource, NewWatchTarget, WatchTarget, MIGRATION_AUTHOR};
use crate::error::classify_sqlx;

/// `monitored_directories` over the same pool the central store uses.
#[derive(Clone)]
pub struct PgConfigSource {
    pool: PgPool,
}

impl PgConfigSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigSource for PgConfigSource {
    async fn enabled_targets(&self) -> Result<Vec<WatchTarget>> {
        sqlx::query_as::<_, WatchTarget>(
            "SELECT id, directory_path, display_path, resolved_path, enabled, display_name, \
             description, created_at, created_by, updated_at, updated_by \
             FROM monitored_directories WHERE enabled = true ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx)
        .context("failed to fetch enabled watch targets")
    }

    async fn count_targets(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM monitored_directories")
            .fetch_one(&self.pool)
            .await
            .map_err(classify_sqlx)
            .context("failed to count watch targets")
    }

    async fn insert_target(&self, target: &NewWatchTarget) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO monitored_directories \
             (directory_path, display_path, resolved_path, enabled, display_name, created_by, updated_by) \
             VALUES ($1, $2, $3, true, $4, $5, $5) \
             ON CONFLICT (directory_path) DO NOTHING",
        )
        .bind(&target.directory_path)
        .bind(target.display_path.as_deref())
        .bind(target.resolved_path.as_deref())
        .bind(target.display_name.as_deref())
        .bind(MIGRATION_AUTHOR)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)
        .with_context(|| format!("failed to insert watch target {}", target.directory_path))?;
        Ok(result.rows_affected() > 0)
    }
}
