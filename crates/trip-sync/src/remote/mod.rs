//! Remote data store seam and realtime change feed

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::error::RemoteError;
use crate::models::{RecordId, Scope, Table};

pub mod memory;
pub mod sql;

pub use memory::MemoryRemote;
pub use sql::SqlRemote;

/// Action carried by a realtime change event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeAction::Insert => write!(f, "insert"),
            ChangeAction::Update => write!(f, "update"),
            ChangeAction::Delete => write!(f, "delete"),
        }
    }
}

/// A committed change pushed by the remote store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    pub table: Table,
    pub action: ChangeAction,
    pub id: RecordId,
    /// Full row after the change; absent for deletes
    pub record: Option<Value>,
}

/// Operations the offline layer needs from the backend
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Rows of `table` in `scope`, ordered for display
    async fn fetch(&self, table: Table, scope: &Scope) -> Result<Vec<Value>, RemoteError>;

    /// Insert a row; the server assigns the id and returns the stored row
    async fn insert(&self, table: Table, record: Map<String, Value>) -> Result<Value, RemoteError>;

    /// Merge `fields` into an existing row
    async fn update(
        &self,
        table: Table,
        id: RecordId,
        fields: Map<String, Value>,
    ) -> Result<(), RemoteError>;

    /// Delete a row. Deleting a missing row succeeds.
    async fn delete(&self, table: Table, id: RecordId) -> Result<(), RemoteError>;

    /// Realtime change feed, when the backend has one
    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        None
    }

    fn name(&self) -> &'static str;
}

/// Run a remote call under a transport timeout; expiry is a generic failure
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, RemoteError>
where
    F: std::future::Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(timeout)),
    }
}

/// Stable sort of rows by their `position` field, rows without one last
pub(crate) fn sort_by_position(rows: &mut [Value]) {
    rows.sort_by_key(|row| {
        row.get("position")
            .and_then(Value::as_i64)
            .unwrap_or(i64::MAX)
    });
}

/// Id of a stored row, if it carries a valid one
pub(crate) fn row_id(row: &Value) -> Option<RecordId> {
    row.get("id")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
}

/// Shallow merge of `fields` into a row object, never touching `id`
pub(crate) fn merge_fields(row: &mut Value, fields: &Map<String, Value>) {
    if let Value::Object(map) = row {
        for (key, value) in fields {
            if key != "id" {
                map.insert(key.clone(), value.clone());
            }
        }
    }
}
