//! # Trip Sync - Offline mutation queue and reconnect sync
//!
//! Keeps a travel itinerary usable without a network connection.
//!
//! ## Features
//!
//! - **Local Cache**: Last known list of trips, days or items per scope, painted instantly
//! - **Mutation Queue**: Offline writes are applied optimistically and queued durably
//! - **Reconnect Sync**: The queue is replayed in order when connectivity returns
//! - **Storage Backends**: Memory or SQLite for both the local stores and the reference remote
//!
//! ## Example
//!
//! ```rust,no_run
//! use trip_sync::{SyncConfig, TripSync};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SyncConfig::load_default()?;
//!     let sync = TripSync::open(&config).await?;
//!     sync.start().await;
//!
//!     let trips = sync.trips().load().await?;
//!     println!("{} trips", trips.len());
//!
//!     // Platform network callbacks feed the observer
//!     sync.connectivity().report(false);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod hooks;
pub mod models;
pub mod mutation;
pub mod queue;
pub mod remote;
pub mod runtime;
pub mod storage;

pub use cache::{CacheKey, CacheStore, CachedSnapshot};
pub use config::SyncConfig;
pub use connectivity::{ConnectivityObserver, Subscription};
pub use coordinator::{DrainSummary, SyncCoordinator, SyncEvent};
pub use error::{RemoteError, Result, SyncError};
pub use hooks::{DataHook, SyncContext, ViewState};
pub use models::{
    Day, DayPatch, Entity, Item, ItemCategory, ItemPatch, NewDay, NewItem, NewTrip, Orderable,
    RecordId, Scope, Table, Trip, TripPatch,
};
pub use mutation::{Mutation, MutationKind, Placement, QueuedMutation};
pub use queue::MutationQueue;
pub use remote::{ChangeAction, ChangeEvent, MemoryRemote, RemoteStore, SqlRemote};
pub use runtime::TripSync;
pub use storage::LocalStore;
