// File: trip-sync/src/hooks.rs
// Purpose: Read/write entry points used by the UI, with optimistic local state
//
// Online writes go straight to the remote store and update the view once the
// remote confirms. Offline writes update the view immediately and queue the
// equivalent mutation; if queueing fails the view change is rolled back.

use serde::ser::Error as _;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::cache::{CacheKey, CacheStore};
use crate::connectivity::ConnectivityObserver;
use crate::error::{Result, SyncError};
use crate::models::{Entity, Orderable, RecordId, Scope};
use crate::mutation::{Mutation, Placement};
use crate::queue::MutationQueue;
use crate::remote::{merge_fields, with_timeout, ChangeAction, ChangeEvent, RemoteStore};

/// Shared collaborators injected into every hook
#[derive(Clone)]
pub struct SyncContext {
    pub queue: MutationQueue,
    pub cache: CacheStore,
    pub connectivity: ConnectivityObserver,
    pub remote: Arc<dyn RemoteStore>,
    pub timeout: Duration,
}

/// Records on screen, plus which of them are not yet confirmed remotely
#[derive(Debug, Clone)]
pub struct ViewState<E> {
    records: Vec<E>,
    tentative: HashSet<RecordId>,
}

impl<E> Default for ViewState<E> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            tentative: HashSet::new(),
        }
    }
}

impl<E: Entity> ViewState<E> {
    pub fn records(&self) -> &[E] {
        &self.records
    }

    pub fn is_tentative(&self, id: RecordId) -> bool {
        self.tentative.contains(&id)
    }

    pub fn tentative_count(&self) -> usize {
        self.tentative.len()
    }

    pub fn get(&self, id: RecordId) -> Option<&E> {
        self.records.iter().find(|r| r.id() == id)
    }

    fn index_of(&self, id: RecordId) -> Option<usize> {
        self.records.iter().position(|r| r.id() == id)
    }

    /// Authoritative replacement; drops every tentative marker
    fn replace_all(&mut self, records: Vec<E>) {
        self.records = records;
        self.tentative.clear();
    }

    /// Insert or replace by id, confirming the record
    fn upsert(&mut self, record: E) {
        let id = record.id();
        match self.index_of(id) {
            Some(index) => self.records[index] = record,
            None => self.records.push(record),
        }
        self.tentative.remove(&id);
        self.sort_if_positioned();
    }

    fn push_tentative(&mut self, record: E) {
        self.tentative.insert(record.id());
        self.records.push(record);
    }

    fn remove(&mut self, id: RecordId) -> Option<(usize, E)> {
        let index = self.index_of(id)?;
        self.tentative.remove(&id);
        Some((index, self.records.remove(index)))
    }

    fn restore(&mut self, index: usize, record: E, tentative: bool) {
        if tentative {
            self.tentative.insert(record.id());
        }
        let index = index.min(self.records.len());
        self.records.insert(index, record);
    }

    /// Apply a field patch in place, returning the previous version
    fn patch(&mut self, id: RecordId, fields: &Map<String, Value>) -> Result<Option<E>> {
        let Some(index) = self.index_of(id) else {
            return Ok(None);
        };

        let mut row = serde_json::to_value(&self.records[index])?;
        merge_fields(&mut row, fields);
        let patched: E = serde_json::from_value(row)?;

        Ok(Some(std::mem::replace(&mut self.records[index], patched)))
    }

    /// Swap the previous version of a record back in
    fn unpatch(&mut self, previous: E) {
        if let Some(index) = self.index_of(previous.id()) {
            self.records[index] = previous;
        }
    }

    fn sort_if_positioned(&mut self) {
        if self.records.iter().all(|r| r.position().is_some()) {
            self.records.sort_by_key(|r| r.position());
        }
    }

    /// Take the tentative record an incoming server row confirms, if any.
    ///
    /// Offline inserts carry no id, so the server row is matched on content:
    /// every field of the tentative record except `id` must be equal, where a
    /// null field also matches an absent one.
    fn take_confirmed_tentative(&mut self, incoming: &Value) -> Option<usize> {
        let index = self.records.iter().position(|record| {
            if !self.tentative.contains(&record.id()) {
                return false;
            }
            match serde_json::to_value(record) {
                Ok(Value::Object(fields)) => fields
                    .iter()
                    .filter(|(key, _)| key.as_str() != "id")
                    .all(|(key, value)| match incoming.get(key) {
                        Some(theirs) => theirs == value,
                        None => value.is_null(),
                    }),
                _ => false,
            }
        })?;

        let id = self.records[index].id();
        self.tentative.remove(&id);
        Some(index)
    }
}

impl<E: Orderable> ViewState<E> {
    /// Put records in the given order and renumber positions.
    ///
    /// Ids not in the view are ignored; records not named keep their relative
    /// order after the named ones. Returns the placements that changed.
    fn reorder(&mut self, ordered: &[RecordId]) -> Vec<Placement> {
        let mut next: Vec<E> = Vec::with_capacity(self.records.len());
        let mut rest = std::mem::take(&mut self.records);

        for id in ordered {
            if let Some(index) = rest.iter().position(|r| r.id() == *id) {
                next.push(rest.remove(index));
            }
        }
        next.extend(rest);

        let mut placements = Vec::new();
        for (index, record) in next.iter_mut().enumerate() {
            let position = index as i32;
            if record.position() != Some(position) {
                record.set_position(position);
                placements.push(Placement {
                    id: record.id(),
                    position,
                });
            }
        }

        self.records = next;
        placements
    }
}

/// Data-access hook for one collection slice (all trips, days of a trip,
/// items of a day)
#[derive(Clone)]
pub struct DataHook<E: Entity> {
    ctx: SyncContext,
    scope: Scope,
    key: CacheKey,
    state: Arc<RwLock<ViewState<E>>>,
}

impl<E: Entity> DataHook<E> {
    pub fn new(ctx: SyncContext, scope: Scope) -> Self {
        let key = CacheKey::new(E::TABLE, &scope);
        Self {
            ctx,
            scope,
            key,
            state: Arc::new(RwLock::new(ViewState::default())),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn cache_key(&self) -> &CacheKey {
        &self.key
    }

    /// Records currently on screen
    pub async fn records(&self) -> Vec<E> {
        self.state.read().await.records.clone()
    }

    pub async fn view(&self) -> ViewState<E> {
        self.state.read().await.clone()
    }

    /// Paint from the local snapshot, without touching the network.
    /// An unreadable snapshot is treated as absent.
    pub async fn paint_from_cache(&self) -> Option<Vec<E>> {
        let cached = match self.ctx.cache.read::<E>(&self.key).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!("Ignoring unreadable snapshot {}: {}", self.key, e);
                None
            }
        };

        if let Some(records) = &cached {
            self.state.write().await.replace_all(records.clone());
        }
        cached
    }

    /// Fetch from the remote store; the result overwrites the view and cache
    pub async fn refresh(&self) -> Result<Vec<E>> {
        let rows = with_timeout(self.ctx.timeout, self.ctx.remote.fetch(E::TABLE, &self.scope)).await?;
        let fresh = rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<E>, _>>()?;

        self.state.write().await.replace_all(fresh.clone());
        self.ctx.cache.write(&self.key, &fresh).await?;
        Ok(fresh)
    }

    /// Cache first for an instant paint, then the remote fetch.
    ///
    /// When the fetch fails and a snapshot was painted, the snapshot stands.
    pub async fn load(&self) -> Result<Vec<E>> {
        let cached = self.paint_from_cache().await;

        match self.refresh().await {
            Ok(fresh) => Ok(fresh),
            Err(SyncError::Remote(e)) => match cached {
                Some(records) => {
                    tracing::warn!("Showing cached {} after failed fetch: {}", self.key, e);
                    Ok(records)
                }
                None => Err(SyncError::Remote(e)),
            },
            Err(e) => Err(e),
        }
    }

    pub async fn create(&self, draft: &E::Draft) -> Result<E> {
        let record = to_fields(draft)?;

        if self.ctx.connectivity.is_online() {
            let row = with_timeout(self.ctx.timeout, self.ctx.remote.insert(E::TABLE, record)).await?;
            let created: E = serde_json::from_value(row.clone())?;
            if self.scope.matches(&row) {
                self.state.write().await.upsert(created.clone());
            }
            return Ok(created);
        }

        let mut tentative_row = record.clone();
        tentative_row.insert("id".to_string(), Value::String(RecordId::new().to_string()));
        let tentative: E = serde_json::from_value(Value::Object(tentative_row))?;

        self.state.write().await.push_tentative(tentative.clone());

        let queued = self
            .ctx
            .queue
            .enqueue(Mutation::Insert {
                table: E::TABLE,
                record,
                local_id: Some(tentative.id()),
            })
            .await;

        if let Err(e) = queued {
            self.state.write().await.remove(tentative.id());
            return Err(e);
        }
        Ok(tentative)
    }

    pub async fn update<P: Serialize>(&self, id: RecordId, patch: &P) -> Result<()> {
        let fields = to_fields(patch)?;

        if self.ctx.connectivity.is_online() {
            with_timeout(
                self.ctx.timeout,
                self.ctx.remote.update(E::TABLE, self.remote_id(id), fields.clone()),
            )
            .await?;
            self.state.write().await.patch(id, &fields)?;
            return Ok(());
        }

        let previous = self.state.write().await.patch(id, &fields)?;

        let queued = self
            .ctx
            .queue
            .enqueue(Mutation::Update {
                table: E::TABLE,
                id,
                fields,
            })
            .await;

        if let Err(e) = queued {
            if let Some(previous) = previous {
                self.state.write().await.unpatch(previous);
            }
            return Err(e);
        }
        Ok(())
    }

    pub async fn delete(&self, id: RecordId) -> Result<()> {
        if self.ctx.connectivity.is_online() {
            with_timeout(self.ctx.timeout, self.ctx.remote.delete(E::TABLE, self.remote_id(id))).await?;
            self.state.write().await.remove(id);
            return Ok(());
        }

        let removed = {
            let mut state = self.state.write().await;
            let was_tentative = state.is_tentative(id);
            state.remove(id).map(|(index, record)| (index, record, was_tentative))
        };

        let queued = self
            .ctx
            .queue
            .enqueue(Mutation::Delete {
                table: E::TABLE,
                id,
            })
            .await;

        if let Err(e) = queued {
            if let Some((index, record, was_tentative)) = removed {
                self.state.write().await.restore(index, record, was_tentative);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Server id for a record that may still be shown under its tentative id
    fn remote_id(&self, id: RecordId) -> RecordId {
        self.ctx.queue.resolved_id(id).unwrap_or(id)
    }

    /// Fold one realtime change into the view
    pub async fn apply_change(&self, event: &ChangeEvent) -> Result<()> {
        if event.table != E::TABLE {
            return Ok(());
        }

        let mut state = self.state.write().await;
        match (event.action, &event.record) {
            (ChangeAction::Delete, _) => {
                state.remove(event.id);
            }
            (ChangeAction::Insert | ChangeAction::Update, Some(row)) => {
                if !self.scope.matches(row) {
                    // Moved out of this slice, or never part of it
                    state.remove(event.id);
                    return Ok(());
                }

                let record: E = serde_json::from_value(row.clone())?;

                // A drained insert of a tentative record: swap it for the server row
                let landed = state
                    .tentative
                    .iter()
                    .copied()
                    .find(|local| self.ctx.queue.resolved_id(*local) == Some(event.id));
                if let Some(local) = landed {
                    state.remove(local);
                    state.upsert(record);
                    return Ok(());
                }

                if event.action == ChangeAction::Insert {
                    if let Some(index) = state.take_confirmed_tentative(row) {
                        state.records[index] = record;
                        state.sort_if_positioned();
                        return Ok(());
                    }
                }
                state.upsert(record);
            }
            (_, None) => {
                tracing::debug!("Change event for {} {} without a row", event.table, event.id);
            }
        }
        Ok(())
    }

    /// Follow the remote's realtime feed until the returned task is aborted.
    ///
    /// Returns `None` when the remote has no feed. If the feed lags, the view
    /// is reloaded from the remote.
    pub fn follow_changes(&self) -> Option<JoinHandle<()>> {
        let mut feed = self.ctx.remote.subscribe()?;
        let hook = self.clone();

        Some(tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(event) => {
                        if let Err(e) = hook.apply_change(&event).await {
                            tracing::warn!("Could not apply {} change: {}", event.table, e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Change feed lagged by {} events, reloading {}", skipped, hook.key);
                        if let Err(e) = hook.refresh().await {
                            tracing::warn!("Reload of {} failed: {}", hook.key, e);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }
}

impl<E: Orderable> DataHook<E> {
    /// Move records into `ordered` sequence.
    ///
    /// The new order is applied to the view first in every case. Online, each
    /// changed position is written remotely; records not yet confirmed
    /// remotely are reordered locally only. If a write fails partway the view
    /// is reloaded from the remote, since earlier writes have landed.
    /// Offline, a single reorder mutation is queued.
    pub async fn reorder(&self, ordered: &[RecordId]) -> Result<()> {
        let online = self.ctx.connectivity.is_online();
        let (previous, placements) = {
            let mut state = self.state.write().await;
            let previous = state.records.clone();
            let placements: Vec<Placement> = state
                .reorder(ordered)
                .into_iter()
                .filter(|p| !online || !state.is_tentative(p.id))
                .collect();
            (previous, placements)
        };

        if placements.is_empty() {
            return Ok(());
        }

        if online {
            for placement in &placements {
                let mut fields = Map::new();
                fields.insert("position".to_string(), Value::from(placement.position));

                let written = with_timeout(
                    self.ctx.timeout,
                    self.ctx.remote.update(E::TABLE, self.remote_id(placement.id), fields),
                )
                .await;

                if let Err(e) = written {
                    if let Err(reload) = self.refresh().await {
                        tracing::warn!("Reload of {} after failed reorder failed: {}", self.key, reload);
                        self.state.write().await.records = previous;
                    }
                    return Err(e.into());
                }
            }
            return Ok(());
        }

        let queued = self
            .ctx
            .queue
            .enqueue(Mutation::Reorder {
                table: E::TABLE,
                items: placements,
            })
            .await;

        if let Err(e) = queued {
            self.state.write().await.records = previous;
            return Err(e);
        }
        Ok(())
    }
}

/// Serialise a draft or patch into a field map
fn to_fields<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(SyncError::Serialization(serde_json::Error::custom(format!(
            "expected an object of fields, got {}",
            other
        )))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{DrainSummary, SyncCoordinator};
    use crate::models::{Item, ItemCategory, ItemPatch, NewItem};
    use crate::remote::MemoryRemote;
    use crate::storage::memory::MemoryStorage;
    use pretty_assertions::assert_eq;

    fn context(online: bool, remote: &MemoryRemote) -> SyncContext {
        let storage = Arc::new(MemoryStorage::new());
        SyncContext {
            queue: MutationQueue::new(storage.clone()),
            cache: CacheStore::new(storage),
            connectivity: ConnectivityObserver::new(online),
            remote: Arc::new(remote.clone()),
            timeout: Duration::from_secs(5),
        }
    }

    fn draft(day_id: RecordId, title: &str, position: i32) -> NewItem {
        NewItem {
            day_id,
            title: title.to_string(),
            category: ItemCategory::Activity,
            time: None,
            location: None,
            notes: None,
            position,
        }
    }

    #[tokio::test]
    async fn test_online_create_uses_server_row() {
        let remote = MemoryRemote::new();
        let day = RecordId::new();
        let hook: DataHook<Item> = DataHook::new(context(true, &remote), Scope::items_of(day));

        let created = hook.create(&draft(day, "Tram 28", 0)).await.unwrap();

        assert!(remote.get(crate::models::Table::Items, created.id).await.is_some());
        let view = hook.view().await;
        assert_eq!(view.records().len(), 1);
        assert!(!view.is_tentative(created.id));
    }

    #[tokio::test]
    async fn test_offline_update_patches_view_and_queues() {
        let remote = MemoryRemote::new();
        let day = RecordId::new();
        let ctx = context(false, &remote);
        let hook: DataHook<Item> = DataHook::new(ctx.clone(), Scope::items_of(day));

        let item = hook.create(&draft(day, "Dinner", 0)).await.unwrap();
        hook.update(
            item.id,
            &ItemPatch {
                time: Some("19:00".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(hook.records().await[0].time.as_deref(), Some("19:00"));
        assert_eq!(ctx.queue.len().await.unwrap(), 2);
        assert_eq!(remote.call_count(), 0);

        // The update names the tentative id and must follow the server id
        let coordinator = SyncCoordinator::new(ctx.queue.clone(), ctx.remote.clone());
        ctx.connectivity.report(true);
        let summary = coordinator.drain().await.unwrap();

        assert_eq!(summary, DrainSummary { flushed: 2, failed: 0 });
        assert!(ctx.queue.is_empty().await.unwrap());
        let rows = remote.rows(crate::models::Table::Items).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["time"], "19:00");
        assert_ne!(rows[0]["id"], Value::String(item.id.to_string()));
    }

    #[tokio::test]
    async fn test_offline_create_then_delete_leaves_nothing_remote() {
        let remote = MemoryRemote::new();
        let day = RecordId::new();
        let ctx = context(false, &remote);
        let hook: DataHook<Item> = DataHook::new(ctx.clone(), Scope::items_of(day));

        let item = hook.create(&draft(day, "Lunch", 0)).await.unwrap();
        hook.delete(item.id).await.unwrap();
        assert!(hook.records().await.is_empty());

        let coordinator = SyncCoordinator::new(ctx.queue.clone(), ctx.remote.clone());
        ctx.connectivity.report(true);
        let summary = coordinator.drain().await.unwrap();

        assert_eq!(summary, DrainSummary { flushed: 2, failed: 0 });
        assert!(remote.rows(crate::models::Table::Items).await.is_empty());
    }

    #[tokio::test]
    async fn test_drained_insert_replaces_edited_tentative_record() {
        let remote = MemoryRemote::new();
        let day = RecordId::new();
        let ctx = context(false, &remote);
        let hook: DataHook<Item> = DataHook::new(ctx.clone(), Scope::items_of(day));
        let follower = hook.follow_changes().unwrap();

        let item = hook.create(&draft(day, "Dinner", 0)).await.unwrap();
        hook.update(
            item.id,
            &ItemPatch {
                time: Some("20:00".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let coordinator = SyncCoordinator::new(ctx.queue.clone(), ctx.remote.clone());
        ctx.connectivity.report(true);
        coordinator.drain().await.unwrap();

        let server: RecordId = remote.rows(crate::models::Table::Items).await[0]["id"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        let settled = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let view = hook.view().await;
                let done = view.tentative_count() == 0
                    && view.records().len() == 1
                    && view.records()[0].id == server
                    && view.records()[0].time.as_deref() == Some("20:00");
                if done {
                    break view;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(settled.records()[0].title, "Dinner");
        follower.abort();
    }

    #[tokio::test]
    async fn test_online_create_outside_scope_is_not_shown() {
        let remote = MemoryRemote::new();
        let (day, other_day) = (RecordId::new(), RecordId::new());
        let hook: DataHook<Item> = DataHook::new(context(true, &remote), Scope::items_of(day));

        let created = hook.create(&draft(other_day, "Elsewhere", 0)).await.unwrap();

        assert!(remote.get(crate::models::Table::Items, created.id).await.is_some());
        assert!(hook.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_reorder_renumbers_positions() {
        let remote = MemoryRemote::new();
        let day = RecordId::new();
        let hook: DataHook<Item> = DataHook::new(context(true, &remote), Scope::items_of(day));

        let a = hook.create(&draft(day, "a", 0)).await.unwrap();
        let b = hook.create(&draft(day, "b", 1)).await.unwrap();
        let c = hook.create(&draft(day, "c", 2)).await.unwrap();

        hook.reorder(&[c.id, a.id, b.id]).await.unwrap();

        let titles: Vec<String> = hook.records().await.into_iter().map(|i| i.title).collect();
        assert_eq!(titles, vec!["c", "a", "b"]);
        assert_eq!(remote.get(crate::models::Table::Items, c.id).await.unwrap()["position"], 0);
        assert_eq!(remote.get(crate::models::Table::Items, b.id).await.unwrap()["position"], 2);
    }

    #[tokio::test]
    async fn test_online_update_failure_leaves_view_untouched() {
        let remote = MemoryRemote::new();
        let day = RecordId::new();
        let hook: DataHook<Item> = DataHook::new(context(true, &remote), Scope::items_of(day));

        let item = hook.create(&draft(day, "Walk", 0)).await.unwrap();
        remote.delete(crate::models::Table::Items, item.id).await.unwrap();

        let err = hook
            .update(item.id, &ItemPatch { title: Some("Run".to_string()), ..Default::default() })
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Remote(_)));
        assert_eq!(hook.records().await[0].title, "Walk");
    }

    #[tokio::test]
    async fn test_insert_event_confirms_tentative_record() {
        let remote = MemoryRemote::new();
        let day = RecordId::new();
        let ctx = context(false, &remote);
        let hook: DataHook<Item> = DataHook::new(ctx, Scope::items_of(day));

        let tentative = hook.create(&draft(day, "Lunch", 0)).await.unwrap();
        assert!(hook.view().await.is_tentative(tentative.id));

        // What the drain would send
        let row = remote
            .insert(crate::models::Table::Items, to_fields(&draft(day, "Lunch", 0)).unwrap())
            .await
            .unwrap();
        let id: RecordId = row["id"].as_str().unwrap().parse().unwrap();
        hook.apply_change(&ChangeEvent {
            table: crate::models::Table::Items,
            action: ChangeAction::Insert,
            id,
            record: Some(row),
        })
        .await
        .unwrap();

        let view = hook.view().await;
        assert_eq!(view.records().len(), 1);
        assert_eq!(view.records()[0].id, id);
        assert_eq!(view.tentative_count(), 0);
    }
}
