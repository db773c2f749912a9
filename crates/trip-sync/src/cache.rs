//! Snapshot cache: last-known server state per trip or day

use crate::error::Result;
use crate::models::{Scope, Table};
use crate::storage::SnapshotStorage;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Cache key of the form `<kind>_<entityId>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(kind: Table, scope: &Scope) -> Self {
        Self(format!("{}_{}", kind.as_str(), scope.key_suffix()))
    }

    /// Wrap an already formatted key
    pub fn raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A full, ordered copy of a collection as last fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSnapshot {
    pub records: Vec<serde_json::Value>,

    /// When this client last wrote the snapshot
    pub written_at: DateTime<Utc>,
}

impl CachedSnapshot {
    pub fn new(records: Vec<serde_json::Value>) -> Self {
        Self {
            records,
            written_at: Utc::now(),
        }
    }
}

/// Typed access to the snapshot storage
///
/// A write always replaces the previous snapshot: the most recent local
/// write wins, regardless of any timestamps inside the records.
#[derive(Clone)]
pub struct CacheStore {
    storage: Arc<dyn SnapshotStorage>,
}

impl CacheStore {
    pub fn new(storage: Arc<dyn SnapshotStorage>) -> Self {
        Self { storage }
    }

    pub async fn write<T: Serialize>(&self, key: &CacheKey, snapshot: &[T]) -> Result<()> {
        let records = snapshot
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let count = records.len();

        self.storage
            .set(key.as_str(), CachedSnapshot::new(records))
            .await?;

        tracing::debug!("Cached {} records under {}", count, key);
        Ok(())
    }

    pub async fn read<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<Vec<T>>> {
        let Some(snapshot) = self.storage.get(key.as_str()).await? else {
            return Ok(None);
        };

        let records = snapshot
            .records
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<T>, _>>()?;

        Ok(Some(records))
    }

    /// Untyped snapshot with its write time
    pub async fn read_raw(&self, key: &CacheKey) -> Result<Option<CachedSnapshot>> {
        self.storage.get(key.as_str()).await
    }

    pub async fn remove(&self, key: &CacheKey) -> Result<()> {
        self.storage.delete(key.as_str()).await
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.storage.keys().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Item, ItemCategory, RecordId};
    use crate::storage::memory::MemoryStorage;
    use pretty_assertions::assert_eq;

    fn item(day_id: RecordId, title: &str, position: i32) -> Item {
        Item {
            id: RecordId::new(),
            day_id,
            title: title.to_string(),
            category: ItemCategory::Sight,
            time: Some("09:30".to_string()),
            location: None,
            notes: None,
            position,
        }
    }

    #[test]
    fn test_cache_key_format() {
        let day = RecordId::new();
        assert_eq!(CacheKey::new(Table::Items, &Scope::items_of(day)).as_str(), format!("items_{}", day));
        assert_eq!(CacheKey::new(Table::Trips, &Scope::All).as_str(), "trips_all");
    }

    #[tokio::test]
    async fn test_write_then_read_round_trips() {
        let cache = CacheStore::new(Arc::new(MemoryStorage::new()));
        let day = RecordId::new();
        let key = CacheKey::new(Table::Items, &Scope::items_of(day));
        let snapshot = vec![item(day, "Museum", 0), item(day, "Dinner", 1)];

        cache.write(&key, &snapshot).await.unwrap();

        let read: Vec<Item> = cache.read(&key).await.unwrap().unwrap();
        assert_eq!(read, snapshot);
    }

    #[tokio::test]
    async fn test_read_absent_key() {
        let cache = CacheStore::new(Arc::new(MemoryStorage::new()));
        let read: Option<Vec<Item>> = cache.read(&CacheKey::raw("items_nope")).await.unwrap();
        assert!(read.is_none());
    }
}
