// File: trip-sync/src/coordinator.rs
// Purpose: Replays the mutation queue against the remote store on reconnect

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::connectivity::ConnectivityObserver;
use crate::error::{RemoteError, Result};
use crate::models::RecordId;
use crate::mutation::Mutation;
use crate::queue::MutationQueue;
use crate::remote::{row_id, with_timeout, RemoteStore};

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainSummary {
    pub flushed: usize,
    pub failed: usize,
}

impl std::fmt::Display for DrainSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Synced {} changes, {} failed", self.flushed, self.failed)
    }
}

/// Notifications for the connectivity indicator and sync toasts
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Connectivity(bool),
    Drained(DrainSummary),
    /// The drain itself could not run (local store failure)
    DrainFailed(String),
}

/// Drains queued mutations in enqueue order.
///
/// Drains are serialised: a drain requested while another is running waits
/// for it and then reads the queue afresh, so an entry is never in flight
/// twice from this client.
#[derive(Clone)]
pub struct SyncCoordinator {
    queue: MutationQueue,
    remote: Arc<dyn RemoteStore>,
    timeout: Duration,
    drain_lock: Arc<Mutex<()>>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncCoordinator {
    pub fn new(queue: MutationQueue, remote: Arc<dyn RemoteStore>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            queue,
            remote,
            timeout: Duration::from_secs(10),
            drain_lock: Arc::new(Mutex::new(())),
            events,
        }
    }

    /// Transport timeout for each replayed remote call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        self.events = events;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    /// Replay every queued mutation once.
    ///
    /// Remote failures are counted and logged; the mutation stays queued for
    /// the next drain. Only local store failures are returned as errors.
    ///
    /// When an insert of a tentative record lands, later entries naming its
    /// local id are rewritten to the server id before they are replayed. If
    /// that insert fails, entries naming the local id are held back as failed.
    pub async fn drain(&self) -> Result<DrainSummary> {
        let _guard = self.drain_lock.lock().await;

        let mut pending = self.queue.list_all().await?;
        if pending.is_empty() {
            return Ok(DrainSummary::default());
        }

        tracing::info!("Draining {} queued mutations", pending.len());
        let mut summary = DrainSummary::default();
        let mut unresolved: HashSet<RecordId> = HashSet::new();

        for index in 0..pending.len() {
            let entry = pending[index].clone();

            if let Some(local) = unresolved.iter().find(|id| entry.mutation.references(**id)).copied() {
                tracing::warn!(
                    "Holding back {} on {} ({}): tentative record {} is not on the server yet",
                    entry.mutation.kind(),
                    entry.mutation.table(),
                    entry.id,
                    local
                );
                if let Some(own) = entry.mutation.local_id() {
                    unresolved.insert(own);
                }
                summary.failed += 1;
                continue;
            }

            match self.dispatch(&entry.mutation).await {
                Ok(inserted) => {
                    if let (Some(local), Some(row)) = (entry.mutation.local_id(), inserted) {
                        match row_id(&row) {
                            Some(server) => {
                                self.queue.resolve(local, server).await?;
                                for later in pending[index + 1..].iter_mut() {
                                    later.mutation.remap(local, server);
                                }
                            }
                            None => tracing::warn!("Inserted {} row came back without an id", entry.mutation.table()),
                        }
                    }
                    self.queue.remove(entry.id).await?;
                    summary.flushed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Replay of {} on {} ({}) failed, keeping it queued: {}",
                        entry.mutation.kind(),
                        entry.mutation.table(),
                        entry.id,
                        e
                    );
                    if let Some(local) = entry.mutation.local_id() {
                        unresolved.insert(local);
                    }
                    summary.failed += 1;
                }
            }
        }

        tracing::info!("{}", summary);
        Ok(summary)
    }

    /// Drain and publish the outcome on the event channel
    pub async fn drain_and_notify(&self) -> Option<DrainSummary> {
        match self.drain().await {
            Ok(summary) => {
                if summary.flushed + summary.failed > 0 {
                    self.publish(SyncEvent::Drained(summary));
                }
                Some(summary)
            }
            Err(e) => {
                tracing::error!("Drain aborted: {}", e);
                self.publish(SyncEvent::DrainFailed(e.to_string()));
                None
            }
        }
    }

    /// Send one mutation; an insert yields the stored row
    async fn dispatch(&self, mutation: &Mutation) -> std::result::Result<Option<Value>, RemoteError> {
        match mutation {
            Mutation::Insert { table, record, .. } => {
                with_timeout(self.timeout, self.remote.insert(*table, record.clone()))
                    .await
                    .map(Some)
            }
            Mutation::Update { table, id, fields } => {
                with_timeout(self.timeout, self.remote.update(*table, *id, fields.clone()))
                    .await
                    .map(|_| None)
            }
            Mutation::Delete { table, id } => {
                with_timeout(self.timeout, self.remote.delete(*table, *id))
                    .await
                    .map(|_| None)
            }
            Mutation::Reorder { table, items } => {
                // All placements must land for the reorder to count
                for placement in items {
                    let mut fields = Map::new();
                    fields.insert("position".to_string(), Value::from(placement.position));
                    with_timeout(self.timeout, self.remote.update(*table, placement.id, fields))
                        .await?;
                }
                Ok(None)
            }
        }
    }

    fn publish(&self, event: SyncEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Drain on every offline to online transition until the task is aborted
    /// or the observer goes away.
    pub fn spawn_reconnect_listener(&self, connectivity: &ConnectivityObserver) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = connectivity.subscribe(move |online| {
            let _ = tx.send(online);
        });
        let coordinator = self.clone();

        tokio::spawn(async move {
            // Keeps the callback registered for the life of the task
            let _subscription = subscription;

            while let Some(online) = rx.recv().await {
                coordinator.publish(SyncEvent::Connectivity(online));
                if online {
                    coordinator.drain_and_notify().await;
                }
            }
            tracing::debug!("Reconnect listener stopped");
        })
    }
}
