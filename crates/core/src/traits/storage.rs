//! Persistence trait for the peer reputation table.
//!
//! Reputation must survive restarts so a peer that misbehaved yesterday does
//! not come back with a clean slate. The engine only needs to load the whole
//! table at startup and write it back on shutdown or on demand.

use crate::traits::PeerId;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Reputation score per peer identity.
pub type ReputationTable = HashMap<PeerId, f64>;

/// Errors that can occur while loading or saving persisted state.
#[derive(Error, Debug)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption was detected.
    #[error("data corruption: {0}")]
    Corruption(String),

    /// A serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Backend for the persisted reputation table.
///
/// An absent table is not an error: `load` returns an empty map and every
/// peer starts at the neutral score.
///
/// # Example
///
/// ```ignore
/// use lightwire_core::{ReputationStore, StorageResult};
///
/// async fn forget_everyone(store: &dyn ReputationStore) -> StorageResult<()> {
///     store.save(&Default::default()).await
/// }
/// ```
#[async_trait]
pub trait ReputationStore: Send + Sync + 'static {
    /// Load the full table.
    async fn load(&self) -> StorageResult<ReputationTable>;

    /// Replace the persisted table with `table`.
    async fn save(&self, table: &ReputationTable) -> StorageResult<()>;
}
