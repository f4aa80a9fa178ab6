//! SQLite-backed persistence for sessions and checkpoints (feature `sqlite`).
//!
//! One [`SqliteStore`] implements both store traits over a shared connection
//! pool. The schema is bootstrapped idempotently at connect time, so no
//! external migration step is required.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use super::{CheckpointStore, SessionStore, StoreError};
use crate::checkpoint::{CheckpointKey, PersistedCheckpoint};
use crate::session::Session;

/// Durable store for sessions and checkpoints.
///
/// Session rows carry an `expires_at` timestamp honored on read, mirroring
/// the TTL semantics of the in-memory fallback. Checkpoint rows are keyed by
/// `(session_id, workflow)` so each workflow type keeps an isolated
/// namespace within a session.
pub struct SqliteStore {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

fn backend_err(context: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::backend(format!("{context}: {err}"))
}

impl SqliteStore {
    /// Connect (or create) a SQLite database at `database_url`, e.g.
    /// `sqlite://careloom.db`, and bootstrap the schema.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        // SqlitePool does not create the backing file; do it up front.
        // Steps: strip the scheme, create parent dirs, touch the file.
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.trim();
            if !path.is_empty() && path != ":memory:" {
                let p = std::path::Path::new(path);
                if let Some(parent) = p.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if !p.exists() {
                    // Ignore the result; if the file appeared meanwhile or we
                    // lack permission, connect will report it.
                    let _ = std::fs::File::create_new(p);
                }
            }
        }

        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| backend_err("connect", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id          TEXT PRIMARY KEY,
                record_json TEXT NOT NULL,
                expires_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| backend_err("create sessions table", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                session_id      TEXT NOT NULL,
                workflow        TEXT NOT NULL,
                checkpoint_json TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                PRIMARY KEY (session_id, workflow)
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| backend_err("create checkpoints table", e))?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    #[instrument(skip(self, session), fields(session_id = %session.id), err)]
    async fn save(&self, session: &Session, ttl: Duration) -> Result<(), StoreError> {
        let json =
            serde_json::to_string(session).map_err(|source| StoreError::Serde { source })?;
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(1));
        let expires_at = now + ttl;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO sessions (id, record_json, expires_at, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&session.id)
        .bind(&json)
        .bind(expires_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&*self.pool)
        .await
        .map_err(|e| backend_err("save session", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let row: Option<SqliteRow> = sqlx::query(
            r#"SELECT record_json, expires_at FROM sessions WHERE id = ?1"#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| backend_err("load session", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: String = row.get("expires_at");
        let expired = DateTime::parse_from_rfc3339(&expires_at)
            .map(|dt| dt.with_timezone(&Utc) <= Utc::now())
            .unwrap_or(true);
        if expired {
            sqlx::query(r#"DELETE FROM sessions WHERE id = ?1"#)
                .bind(id)
                .execute(&*self.pool)
                .await
                .map_err(|e| backend_err("expire session", e))?;
            return Ok(None);
        }

        let json: String = row.get("record_json");
        let session = serde_json::from_str(&json).map_err(|source| StoreError::Serde { source })?;
        Ok(Some(session))
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(r#"DELETE FROM sessions WHERE id = ?1"#)
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| backend_err("delete session", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(SessionStore::load(self, id).await?.is_some())
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    #[instrument(skip(self, checkpoint), fields(key = %key.storage_key()), err)]
    async fn save(
        &self,
        key: &CheckpointKey,
        checkpoint: &PersistedCheckpoint,
    ) -> Result<(), StoreError> {
        let json =
            serde_json::to_string(checkpoint).map_err(|source| StoreError::Serde { source })?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO checkpoints (session_id, workflow, checkpoint_json, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&key.session_id)
        .bind(key.workflow.as_str())
        .bind(&json)
        .bind(Utc::now().to_rfc3339())
        .execute(&*self.pool)
        .await
        .map_err(|e| backend_err("save checkpoint", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key.storage_key()), err)]
    async fn load(&self, key: &CheckpointKey) -> Result<Option<PersistedCheckpoint>, StoreError> {
        let row: Option<SqliteRow> = sqlx::query(
            r#"SELECT checkpoint_json FROM checkpoints WHERE session_id = ?1 AND workflow = ?2"#,
        )
        .bind(&key.session_id)
        .bind(key.workflow.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| backend_err("load checkpoint", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let json: String = row.get("checkpoint_json");
        let checkpoint =
            serde_json::from_str(&json).map_err(|source| StoreError::Serde { source })?;
        Ok(Some(checkpoint))
    }

    #[instrument(skip(self), fields(key = %key.storage_key()), err)]
    async fn clear(&self, key: &CheckpointKey) -> Result<(), StoreError> {
        sqlx::query(r#"DELETE FROM checkpoints WHERE session_id = ?1 AND workflow = ?2"#)
            .bind(&key.session_id)
            .bind(key.workflow.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| backend_err("clear checkpoint", e))?;
        Ok(())
    }
}
