//! Durable local storage backends for the snapshot cache and mutation queue

use crate::cache::CachedSnapshot;
use crate::error::{Result, SyncError};
use crate::mutation::QueuedMutation;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

pub mod memory;
pub mod sqlite;

/// Keyed storage for cached collection snapshots
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Get a snapshot by key
    async fn get(&self, key: &str) -> Result<Option<CachedSnapshot>>;

    /// Store a snapshot, replacing any previous value
    async fn set(&self, key: &str, snapshot: CachedSnapshot) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn keys(&self) -> Result<Vec<String>>;

    /// Get storage backend name
    fn name(&self) -> &'static str;
}

/// Ordered storage for pending mutations
#[async_trait]
pub trait QueueStorage: Send + Sync {
    /// Append one entry at the tail. Must be atomic per call.
    async fn append(&self, entry: &QueuedMutation) -> Result<()>;

    /// All entries in append order
    async fn list(&self) -> Result<Vec<QueuedMutation>>;

    /// Rewrite the mutation of an existing entry in place, keeping its
    /// position. Returns whether the entry was present.
    async fn replace(&self, entry: &QueuedMutation) -> Result<bool>;

    /// Remove an entry, returning whether it was present
    async fn remove(&self, id: Uuid) -> Result<bool>;

    /// Remove every entry, returning how many were dropped
    async fn clear(&self) -> Result<u64>;

    async fn len(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }

    fn name(&self) -> &'static str;
}

/// The pair of local stores backing one client
#[derive(Clone)]
pub struct LocalStore {
    pub snapshots: Arc<dyn SnapshotStorage>,
    pub queue: Arc<dyn QueueStorage>,
}

impl LocalStore {
    /// Non-persistent store, lost when the process exits
    pub fn memory() -> Self {
        let storage = Arc::new(memory::MemoryStorage::new());
        Self {
            snapshots: storage.clone(),
            queue: storage,
        }
    }

    /// Open a store from a URL: `memory` or a `sqlite:` URL
    pub async fn from_url(url: &str) -> Result<Self> {
        if url == "memory" {
            Ok(Self::memory())
        } else if url.starts_with("sqlite:") {
            let storage = Arc::new(sqlite::SqliteStorage::connect(url).await?);
            Ok(Self {
                snapshots: storage.clone(),
                queue: storage,
            })
        } else {
            Err(SyncError::Config(format!("Unsupported local store URL: {}", url)))
        }
    }
}
