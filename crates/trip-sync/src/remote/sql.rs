// File: trip-sync/src/remote/sql.rs
// Purpose: Reference remote store over SQLite document tables (sqlx)
//
// Stands in for the hosted database: one table per collection holding the row
// as JSON, plus the parent link used for scoped listing. Every committed write
// is broadcast on the realtime feed.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;

use super::{merge_fields, sort_by_position, ChangeAction, ChangeEvent, RemoteStore};
use crate::db::open_sqlite;
use crate::error::RemoteError;
use crate::models::{RecordId, Scope, Table};

const TABLES: [Table; 3] = [Table::Trips, Table::Days, Table::Items];

/// SQLite-backed remote store
#[derive(Clone)]
pub struct SqlRemote {
    pool: SqlitePool,
    feed: broadcast::Sender<ChangeEvent>,
}

impl SqlRemote {
    pub async fn connect(database_url: &str) -> Result<Self, RemoteError> {
        let pool = open_sqlite(database_url).await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, RemoteError> {
        Self::init_tables(&pool).await?;
        let (feed, _) = broadcast::channel(1000);

        tracing::info!("SQL remote store ready");
        Ok(Self { pool, feed })
    }

    async fn init_tables(pool: &SqlitePool) -> Result<(), RemoteError> {
        for table in TABLES {
            // Table names come from the closed Table enum
            let ddl = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    parent_id TEXT,
                    data TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
                table = table.as_str()
            );
            sqlx::query(&ddl).execute(pool).await?;

            let index = format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_parent ON {table}(parent_id)",
                table = table.as_str()
            );
            sqlx::query(&index).execute(pool).await?;
        }
        Ok(())
    }

    fn publish(&self, table: Table, action: ChangeAction, id: RecordId, record: Option<Value>) {
        let _ = self.feed.send(ChangeEvent {
            table,
            action,
            id,
            record,
        });
    }
}

/// Parent id of a row, read from the table's parent column (Pure function)
fn parent_of(table: Table, row: &Map<String, Value>) -> Option<String> {
    table
        .parent_column()
        .and_then(|column| row.get(column))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn decode_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Value>, RemoteError> {
    rows.iter()
        .map(|row| -> Result<Value, RemoteError> {
            let data: String = row.try_get("data")?;
            Ok(serde_json::from_str(&data)?)
        })
        .collect()
}

#[async_trait]
impl RemoteStore for SqlRemote {
    async fn fetch(&self, table: Table, scope: &Scope) -> Result<Vec<Value>, RemoteError> {
        let rows = match scope {
            Scope::All => {
                let sql = format!("SELECT data FROM {} ORDER BY rowid", table.as_str());
                sqlx::query(&sql).fetch_all(&self.pool).await?
            }
            Scope::Parent { column, id } => {
                if table.parent_column() != Some(*column) {
                    return Err(RemoteError::Rejected(format!(
                        "{} cannot be listed by {}",
                        table, column
                    )));
                }
                let sql = format!(
                    "SELECT data FROM {} WHERE parent_id = ? ORDER BY rowid",
                    table.as_str()
                );
                sqlx::query(&sql)
                    .bind(id.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut records = decode_rows(&rows)?;
        sort_by_position(&mut records);
        Ok(records)
    }

    async fn insert(&self, table: Table, mut record: Map<String, Value>) -> Result<Value, RemoteError> {
        let id = match record.get("id").and_then(Value::as_str) {
            Some(raw) => raw
                .parse::<RecordId>()
                .map_err(|e| RemoteError::Rejected(format!("invalid id {}: {}", raw, e)))?,
            None => RecordId::new(),
        };
        record.insert("id".to_string(), Value::String(id.to_string()));

        let parent_id = parent_of(table, &record);
        let row = Value::Object(record);
        let sql = format!(
            "INSERT INTO {} (id, parent_id, data, updated_at) VALUES (?, ?, ?, ?)",
            table.as_str()
        );

        sqlx::query(&sql)
            .bind(id.to_string())
            .bind(parent_id)
            .bind(serde_json::to_string(&row)?)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    RemoteError::Rejected(format!("duplicate {} id {}", table, id))
                }
                other => RemoteError::Database(other),
            })?;

        tracing::debug!("Inserted {} {}", table, id);
        self.publish(table, ChangeAction::Insert, id, Some(row.clone()));
        Ok(row)
    }

    async fn update(
        &self,
        table: Table,
        id: RecordId,
        fields: Map<String, Value>,
    ) -> Result<(), RemoteError> {
        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT data FROM {} WHERE id = ?", table.as_str());
        let existing = sqlx::query(&select)
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RemoteError::NotFound { table, id })?;

        let data: String = existing.try_get("data")?;
        let mut row: Value = serde_json::from_str(&data)?;
        merge_fields(&mut row, &fields);

        let parent_id = row.as_object().and_then(|map| parent_of(table, map));
        let update = format!(
            "UPDATE {} SET data = ?, parent_id = ?, updated_at = ? WHERE id = ?",
            table.as_str()
        );
        sqlx::query(&update)
            .bind(serde_json::to_string(&row)?)
            .bind(parent_id)
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!("Updated {} {}", table, id);
        self.publish(table, ChangeAction::Update, id, Some(row));
        Ok(())
    }

    async fn delete(&self, table: Table, id: RecordId) -> Result<(), RemoteError> {
        let sql = format!("DELETE FROM {} WHERE id = ?", table.as_str());
        let result = sqlx::query(&sql)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            tracing::debug!("Deleted {} {}", table, id);
            self.publish(table, ChangeAction::Delete, id, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        Some(self.feed.subscribe())
    }

    fn name(&self) -> &'static str {
        "sql"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_sql_remote_crud() {
        let remote = SqlRemote::connect("sqlite::memory:").await.unwrap();
        let mut feed = remote.subscribe().unwrap();
        let day = RecordId::new();

        let row = remote
            .insert(
                Table::Items,
                fields(json!({"day_id": day.to_string(), "title": "Lunch", "category": "food", "position": 0})),
            )
            .await
            .unwrap();
        let id: RecordId = row["id"].as_str().unwrap().parse().unwrap();
        assert_eq!(feed.try_recv().unwrap().action, ChangeAction::Insert);

        remote
            .update(Table::Items, id, fields(json!({"time": "19:00"})))
            .await
            .unwrap();

        let rows = remote.fetch(Table::Items, &Scope::items_of(day)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["time"], "19:00");
        assert_eq!(rows[0]["title"], "Lunch");

        remote.delete(Table::Items, id).await.unwrap();
        remote.delete(Table::Items, id).await.unwrap();
        assert!(remote.fetch(Table::Items, &Scope::All).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sql_remote_update_missing_is_not_found() {
        let remote = SqlRemote::connect("sqlite::memory:").await.unwrap();
        let err = remote
            .update(Table::Trips, RecordId::new(), fields(json!({"title": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_sql_remote_rejects_wrong_scope_column() {
        let remote = SqlRemote::connect("sqlite::memory:").await.unwrap();
        let err = remote
            .fetch(Table::Trips, &Scope::items_of(RecordId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_sql_remote_persists_rows() {
        let temp_dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", temp_dir.path().join("remote.db").display());

        {
            let remote = SqlRemote::connect(&url).await.unwrap();
            remote
                .insert(Table::Trips, fields(json!({"title": "Oslo"})))
                .await
                .unwrap();
        }

        let remote = SqlRemote::connect(&url).await.unwrap();
        let rows = remote.fetch(Table::Trips, &Scope::All).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], "Oslo");
    }
}
