// File: trip-sync/src/remote/memory.rs
// Purpose: In-process remote store with a realtime feed, for tests and demos

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use super::{merge_fields, row_id, sort_by_position, ChangeAction, ChangeEvent, RemoteStore};
use crate::error::RemoteError;
use crate::models::{RecordId, Scope, Table};

/// Remote store kept in memory. Rows live in insertion order per table.
#[derive(Clone)]
pub struct MemoryRemote {
    tables: Arc<RwLock<HashMap<Table, Vec<Value>>>>,
    feed: broadcast::Sender<ChangeEvent>,
    calls: Arc<AtomicUsize>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(256);
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
            feed,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Total remote operations served, reads included
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every row of a table, in insertion order
    pub async fn rows(&self, table: Table) -> Vec<Value> {
        let tables = self.tables.read().await;
        tables.get(&table).cloned().unwrap_or_default()
    }

    pub async fn get(&self, table: Table, id: RecordId) -> Option<Value> {
        let tables = self.tables.read().await;
        tables
            .get(&table)
            .and_then(|rows| rows.iter().find(|row| row_id(row) == Some(id)).cloned())
    }

    fn publish(&self, table: Table, action: ChangeAction, id: RecordId, record: Option<Value>) {
        // No subscribers is fine
        let _ = self.feed.send(ChangeEvent {
            table,
            action,
            id,
            record,
        });
    }

    fn count_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn fetch(&self, table: Table, scope: &Scope) -> Result<Vec<Value>, RemoteError> {
        self.count_call();
        let tables = self.tables.read().await;
        let mut rows: Vec<Value> = tables
            .get(&table)
            .map(|rows| rows.iter().filter(|row| scope.matches(row)).cloned().collect())
            .unwrap_or_default();
        sort_by_position(&mut rows);
        Ok(rows)
    }

    async fn insert(&self, table: Table, mut record: Map<String, Value>) -> Result<Value, RemoteError> {
        self.count_call();

        let id = match record.get("id").and_then(Value::as_str) {
            Some(raw) => raw
                .parse::<RecordId>()
                .map_err(|e| RemoteError::Rejected(format!("invalid id {}: {}", raw, e)))?,
            None => {
                let id = RecordId::new();
                record.insert("id".to_string(), Value::String(id.to_string()));
                id
            }
        };

        let row = Value::Object(record);
        {
            let mut tables = self.tables.write().await;
            let rows = tables.entry(table).or_default();
            if rows.iter().any(|r| row_id(r) == Some(id)) {
                return Err(RemoteError::Rejected(format!("duplicate {} id {}", table, id)));
            }
            rows.push(row.clone());
        }

        self.publish(table, ChangeAction::Insert, id, Some(row.clone()));
        Ok(row)
    }

    async fn update(
        &self,
        table: Table,
        id: RecordId,
        fields: Map<String, Value>,
    ) -> Result<(), RemoteError> {
        self.count_call();

        let updated = {
            let mut tables = self.tables.write().await;
            let row = tables
                .get_mut(&table)
                .and_then(|rows| rows.iter_mut().find(|row| row_id(row) == Some(id)))
                .ok_or(RemoteError::NotFound { table, id })?;
            merge_fields(row, &fields);
            row.clone()
        };

        self.publish(table, ChangeAction::Update, id, Some(updated));
        Ok(())
    }

    async fn delete(&self, table: Table, id: RecordId) -> Result<(), RemoteError> {
        self.count_call();

        let removed = {
            let mut tables = self.tables.write().await;
            match tables.get_mut(&table) {
                Some(rows) => {
                    let before = rows.len();
                    rows.retain(|row| row_id(row) != Some(id));
                    rows.len() != before
                }
                None => false,
            }
        };

        if removed {
            self.publish(table, ChangeAction::Delete, id, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        Some(self.feed.subscribe())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_publishes() {
        let remote = MemoryRemote::new();
        let mut feed = remote.subscribe().unwrap();

        let row = remote
            .insert(Table::Trips, fields(json!({"title": "Kyoto"})))
            .await
            .unwrap();

        let id: RecordId = row["id"].as_str().unwrap().parse().unwrap();
        let event = feed.try_recv().unwrap();
        assert_eq!(event.action, ChangeAction::Insert);
        assert_eq!(event.id, id);
        assert_eq!(remote.rows(Table::Trips).await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let remote = MemoryRemote::new();
        let err = remote
            .update(Table::Items, RecordId::new(), fields(json!({"time": "19:00"})))
            .await
            .unwrap_err();

        assert!(matches!(err, RemoteError::NotFound { table: Table::Items, .. }));
    }

    #[tokio::test]
    async fn test_fetch_filters_scope_and_orders_by_position() {
        let remote = MemoryRemote::new();
        let day = RecordId::new();
        let other = RecordId::new();

        for (title, day_id, position) in [("b", day, 1), ("x", other, 0), ("a", day, 0)] {
            remote
                .insert(
                    Table::Items,
                    fields(json!({"title": title, "day_id": day_id.to_string(), "position": position})),
                )
                .await
                .unwrap();
        }

        let rows = remote.fetch(Table::Items, &Scope::items_of(day)).await.unwrap();
        let titles: Vec<&str> = rows.iter().map(|r| r["title"].as_str().unwrap()).collect();
        assert_eq!(titles, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_delete_missing_row_succeeds() {
        let remote = MemoryRemote::new();
        remote.delete(Table::Days, RecordId::new()).await.unwrap();
        assert_eq!(remote.call_count(), 1);
    }
}
