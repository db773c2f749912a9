// File: trip-sync/src/queue.rs
// Purpose: Durable FIFO of writes made while offline

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::error::Result;
use crate::models::RecordId;
use crate::mutation::{Mutation, QueuedMutation};
use crate::storage::QueueStorage;

/// Pending mutations, replayed in enqueue order by the sync coordinator.
///
/// Entries are never validated against the remote store; a queued update may
/// target a record that no longer exists.
#[derive(Clone)]
pub struct MutationQueue {
    storage: Arc<dyn QueueStorage>,
    /// Tentative ids whose insert has landed, mapped to the server id
    resolved: Arc<Mutex<HashMap<RecordId, RecordId>>>,
}

impl MutationQueue {
    pub fn new(storage: Arc<dyn QueueStorage>) -> Self {
        Self {
            storage,
            resolved: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Stamp and persist a mutation at the tail of the queue.
    ///
    /// A persistence failure is returned to the caller: the edit is not saved.
    pub async fn enqueue(&self, mut mutation: Mutation) -> Result<()> {
        for (local, server) in self.resolved_ids().iter() {
            mutation.remap(*local, *server);
        }
        let entry = QueuedMutation::new(mutation);

        if let Err(e) = self.storage.append(&entry).await {
            tracing::error!(
                "Failed to queue {} on {}: {}",
                entry.mutation.kind(),
                entry.mutation.table(),
                e
            );
            return Err(e);
        }

        tracing::info!(
            "Queued {} on {} ({})",
            entry.mutation.kind(),
            entry.mutation.table(),
            entry.id
        );
        Ok(())
    }

    /// Full queue in replay order
    pub async fn list_all(&self) -> Result<Vec<QueuedMutation>> {
        self.storage.list().await
    }

    /// Drop one entry. Unknown ids are ignored.
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        if self.storage.remove(id).await? {
            tracing::debug!("Removed queued mutation {}", id);
        }
        Ok(())
    }

    /// Record that tentative record `local` now exists remotely as `server`
    /// and rewrite every queued entry still naming `local`, in place.
    ///
    /// Returns the number of entries rewritten.
    pub async fn resolve(&self, local: RecordId, server: RecordId) -> Result<usize> {
        self.resolved_ids().insert(local, server);

        let mut rewritten = 0;
        for mut entry in self.storage.list().await? {
            if entry.mutation.remap(local, server) {
                self.storage.replace(&entry).await?;
                rewritten += 1;
            }
        }

        if rewritten > 0 {
            tracing::info!(
                "Rewrote {} queued mutations from {} to server id {}",
                rewritten,
                local,
                server
            );
        }
        Ok(rewritten)
    }

    /// Server id of a tentative record whose insert has landed this session
    pub fn resolved_id(&self, local: RecordId) -> Option<RecordId> {
        self.resolved_ids().get(&local).copied()
    }

    fn resolved_ids(&self) -> MutexGuard<'_, HashMap<RecordId, RecordId>> {
        self.resolved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop every entry. Never called by the sync coordinator.
    pub async fn clear(&self) -> Result<()> {
        let dropped = self.storage.clear().await?;
        tracing::warn!("Cleared mutation queue ({} entries dropped)", dropped);
        Ok(())
    }

    pub async fn len(&self) -> Result<usize> {
        self.storage.len().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
