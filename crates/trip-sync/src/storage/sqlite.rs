//! SQLite storage backend
//!
//! Persists snapshots and queued mutations in two tables of a local SQLite
//! database, so offline edits survive an application restart.

use crate::cache::CachedSnapshot;
use crate::db::open_sqlite;
use crate::error::{Result, SyncError};
use crate::mutation::{Mutation, QueuedMutation};
use crate::storage::{QueueStorage, SnapshotStorage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// SQLite storage backend
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Connect to a SQLite URL and create the tables
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = open_sqlite(database_url).await?;
        Self::with_pool(pool).await
    }

    /// Use an existing pool
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        Self::init_tables(&pool).await?;
        tracing::debug!("SQLite local store ready");
        Ok(Self { pool })
    }

    async fn init_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _trip_sync_cache (
                key TEXT PRIMARY KEY,
                snapshot TEXT NOT NULL,
                written_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        // seq gives the replay order; id is the public handle
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _trip_sync_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                mutation TEXT NOT NULL,
                enqueued_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SnapshotStorage for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<CachedSnapshot>> {
        let row = sqlx::query("SELECT snapshot, written_at FROM _trip_sync_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let snapshot: String = row.try_get("snapshot")?;
        let written_at: DateTime<Utc> = row.try_get("written_at")?;

        Ok(Some(CachedSnapshot {
            records: serde_json::from_str(&snapshot)?,
            written_at,
        }))
    }

    async fn set(&self, key: &str, snapshot: CachedSnapshot) -> Result<()> {
        let json = serde_json::to_string(&snapshot.records)?;

        sqlx::query(
            r#"
            INSERT INTO _trip_sync_cache (key, snapshot, written_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                snapshot = excluded.snapshot,
                written_at = excluded.written_at
            "#,
        )
        .bind(key)
        .bind(json)
        .bind(snapshot.written_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM _trip_sync_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>("SELECT key FROM _trip_sync_cache ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[async_trait]
impl QueueStorage for SqliteStorage {
    async fn append(&self, entry: &QueuedMutation) -> Result<()> {
        let mutation = serde_json::to_string(&entry.mutation)?;

        sqlx::query("INSERT INTO _trip_sync_queue (id, mutation, enqueued_at) VALUES (?, ?, ?)")
            .bind(entry.id.to_string())
            .bind(mutation)
            .bind(entry.timestamp)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<QueuedMutation>> {
        let rows = sqlx::query("SELECT id, mutation, enqueued_at FROM _trip_sync_queue ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<QueuedMutation> {
                let id: String = row.try_get("id")?;
                let mutation: String = row.try_get("mutation")?;
                let timestamp: DateTime<Utc> = row.try_get("enqueued_at")?;

                Ok(QueuedMutation {
                    id: Uuid::parse_str(&id).map_err(|e| {
                        SyncError::Persistence(format!("Corrupt queue id {}: {}", id, e))
                    })?,
                    mutation: serde_json::from_str::<Mutation>(&mutation)?,
                    timestamp,
                })
            })
            .collect()
    }

    async fn replace(&self, entry: &QueuedMutation) -> Result<bool> {
        let mutation = serde_json::to_string(&entry.mutation)?;

        let result = sqlx::query("UPDATE _trip_sync_queue SET mutation = ? WHERE id = ?")
            .bind(mutation)
            .bind(entry.id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM _trip_sync_queue WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM _trip_sync_queue")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _trip_sync_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
