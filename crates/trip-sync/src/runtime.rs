// File: trip-sync/src/runtime.rs
// Purpose: Assembles local stores, remote, observer and coordinator into one client

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::cache::CacheStore;
use crate::config::SyncConfig;
use crate::connectivity::ConnectivityObserver;
use crate::coordinator::{DrainSummary, SyncCoordinator, SyncEvent};
use crate::error::{Result, SyncError};
use crate::hooks::{DataHook, SyncContext};
use crate::models::{Day, Entity, Item, RecordId, Scope, Trip};
use crate::queue::MutationQueue;
use crate::remote::{MemoryRemote, RemoteStore, SqlRemote};
use crate::storage::LocalStore;

/// One offline-capable itinerary client
pub struct TripSync {
    ctx: SyncContext,
    coordinator: SyncCoordinator,
    drain_on_start: bool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl TripSync {
    /// Open the stores named in the configuration. Starts online; call
    /// `connectivity().report(false)` when the platform says otherwise.
    pub async fn open(config: &SyncConfig) -> Result<Self> {
        let local = LocalStore::from_url(&config.local.url).await?;
        let remote = open_remote(&config.remote.url).await?;

        tracing::info!(
            "Opened trip sync (local: {}, remote: {})",
            local.queue.name(),
            remote.name()
        );

        let sync = Self::with_parts(local, remote, ConnectivityObserver::new(true), config);
        Ok(sync)
    }

    /// Assemble from already-built parts
    pub fn with_parts(
        local: LocalStore,
        remote: Arc<dyn RemoteStore>,
        connectivity: ConnectivityObserver,
        config: &SyncConfig,
    ) -> Self {
        let queue = MutationQueue::new(local.queue);
        let cache = CacheStore::new(local.snapshots);

        let coordinator = SyncCoordinator::new(queue.clone(), remote.clone())
            .with_timeout(config.timeout())
            .with_event_capacity(config.sync.notify_capacity);

        let ctx = SyncContext {
            queue,
            cache,
            connectivity,
            remote,
            timeout: config.timeout(),
        };

        Self {
            ctx,
            coordinator,
            drain_on_start: config.sync.drain_on_start,
            listener: Mutex::new(None),
        }
    }

    pub fn hook<E: Entity>(&self, scope: Scope) -> DataHook<E> {
        DataHook::new(self.ctx.clone(), scope)
    }

    pub fn trips(&self) -> DataHook<Trip> {
        self.hook(Scope::All)
    }

    pub fn days(&self, trip_id: RecordId) -> DataHook<Day> {
        self.hook(Scope::days_of(trip_id))
    }

    pub fn items(&self, day_id: RecordId) -> DataHook<Item> {
        self.hook(Scope::items_of(day_id))
    }

    pub fn connectivity(&self) -> &ConnectivityObserver {
        &self.ctx.connectivity
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.ctx.queue
    }

    pub fn cache(&self) -> &CacheStore {
        &self.ctx.cache
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.coordinator.subscribe()
    }

    /// Register the reconnect listener and, when configured and online,
    /// flush whatever a previous session left queued.
    pub async fn start(&self) -> Option<DrainSummary> {
        {
            let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
            if listener.is_none() {
                *listener = Some(self.coordinator.spawn_reconnect_listener(&self.ctx.connectivity));
            }
        }

        if self.drain_on_start && self.ctx.connectivity.is_online() {
            self.coordinator.drain_and_notify().await
        } else {
            None
        }
    }

    pub fn shutdown(&self) {
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::debug!("Reconnect listener aborted");
        }
    }
}

impl Drop for TripSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Remote store from a URL: `memory` or a `sqlite:` URL
pub async fn open_remote(url: &str) -> Result<Arc<dyn RemoteStore>> {
    if url == "memory" {
        Ok(Arc::new(MemoryRemote::new()))
    } else if url.starts_with("sqlite:") {
        Ok(Arc::new(SqlRemote::connect(url).await?))
    } else {
        Err(SyncError::Config(format!("Unsupported remote store URL: {}", url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTrip;
    use crate::mutation::Mutation;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn memory_config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.local.url = "memory".to_string();
        config.remote.url = "memory".to_string();
        config
    }

    #[tokio::test]
    async fn test_open_rejects_unknown_scheme() {
        let mut config = memory_config();
        config.remote.url = "postgres://localhost/trips".to_string();

        let result = TripSync::open(&config).await;
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[tokio::test]
    async fn test_start_drains_leftover_queue() {
        let remote = MemoryRemote::new();
        let local = LocalStore::memory();
        let sync = TripSync::with_parts(
            local,
            Arc::new(remote.clone()),
            ConnectivityObserver::new(true),
            &memory_config(),
        );

        sync.queue()
            .enqueue(Mutation::Insert {
                table: crate::models::Table::Trips,
                record: serde_json::json!({"title": "Kyoto"}).as_object().cloned().unwrap(),
                local_id: None,
            })
            .await
            .unwrap();

        let summary = sync.start().await;
        assert_eq!(summary, Some(DrainSummary { flushed: 1, failed: 0 }));
        assert!(sync.queue().is_empty().await.unwrap());
        sync.shutdown();
    }

    #[tokio::test]
    async fn test_offline_create_syncs_after_reconnect() {
        let remote = MemoryRemote::new();
        let sync = TripSync::with_parts(
            LocalStore::memory(),
            Arc::new(remote.clone()),
            ConnectivityObserver::new(false),
            &memory_config(),
        );
        let mut events = sync.events();
        assert_eq!(sync.start().await, None);

        let trip = sync
            .trips()
            .create(&NewTrip {
                title: "Porto".to_string(),
                destination: None,
                start_date: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2026, 5, 3).unwrap(),
                notes: None,
            })
            .await
            .unwrap();
        assert_eq!(trip.title, "Porto");
        assert_eq!(sync.queue().len().await.unwrap(), 1);

        sync.connectivity().report(true);

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(SyncEvent::Drained(summary)) = events.recv().await {
                    break summary;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(drained.flushed, 1);
        assert_eq!(remote.rows(crate::models::Table::Trips).await.len(), 1);
    }
}
