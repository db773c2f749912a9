// File: trip-sync/src/error.rs
// Purpose: Error types for local persistence and remote store failures

use std::time::Duration;

use crate::models::{RecordId, Table};

/// Failure reported by the remote data store
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("{table} record {id} not found")]
    NotFound { table: Table, id: RecordId },

    #[error("Remote rejected the operation: {0}")]
    Rejected(String),

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Remote database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Malformed remote record: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors surfaced to callers of the sync layer
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Local durable store could not be read or written
    #[error("Local persistence failed: {0}")]
    Persistence(String),

    #[error("Local database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Direct online write failed; nothing was applied locally
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("{table} record {id} is not in the current view")]
    UnknownRecord { table: Table, id: RecordId },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// True for failures of the local durable stores
    pub fn is_persistence(&self) -> bool {
        matches!(self, SyncError::Persistence(_) | SyncError::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
