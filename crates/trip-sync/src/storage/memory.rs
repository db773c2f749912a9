//! In-memory storage backend

use crate::cache::CachedSnapshot;
use crate::error::Result;
use crate::mutation::QueuedMutation;
use crate::storage::{QueueStorage, SnapshotStorage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory storage backend
///
/// Keeps snapshots in a HashMap and the queue in a Vec.
/// Fast but non-persistent - everything is lost on restart.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    snapshots: Arc<RwLock<HashMap<String, CachedSnapshot>>>,
    queue: Arc<RwLock<Vec<QueuedMutation>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<CachedSnapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(key).cloned())
    }

    async fn set(&self, key: &str, snapshot: CachedSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(key.to_string(), snapshot);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let snapshots = self.snapshots.read().await;
        let mut keys: Vec<String> = snapshots.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl QueueStorage for MemoryStorage {
    async fn append(&self, entry: &QueuedMutation) -> Result<()> {
        let mut queue = self.queue.write().await;
        queue.push(entry.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<QueuedMutation>> {
        let queue = self.queue.read().await;
        Ok(queue.clone())
    }

    async fn replace(&self, entry: &QueuedMutation) -> Result<bool> {
        let mut queue = self.queue.write().await;
        match queue.iter_mut().find(|existing| existing.id == entry.id) {
            Some(existing) => {
                existing.mutation = entry.mutation.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let mut queue = self.queue.write().await;
        let before = queue.len();
        queue.retain(|entry| entry.id != id);
        Ok(queue.len() != before)
    }

    async fn clear(&self) -> Result<u64> {
        let mut queue = self.queue.write().await;
        let dropped = queue.len() as u64;
        queue.clear();
        Ok(dropped)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.queue.read().await.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
