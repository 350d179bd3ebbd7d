//! Reputation table backends.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lightwire_core::{ReputationStore, ReputationTable, StorageError, StorageResult};
use parking_lot::Mutex;
use tracing::debug;

/// JSON file backend.
///
/// A missing file reads as an empty table. Saves go to a sibling temp file
/// that is then renamed over the target.
#[derive(Debug, Clone)]
pub struct FileReputationStore {
    path: PathBuf,
}

impl FileReputationStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl ReputationStore for FileReputationStore {
    async fn load(&self) -> StorageResult<ReputationTable> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = ?self.path, "No reputation table on disk");
                return Ok(ReputationTable::new());
            }
            Err(e) => return Err(e.into()),
        };

        let table: ReputationTable = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Corruption(format!("{}: {e}", self.path.display())))?;
        debug!(path = ?self.path, entries = table.len(), "Reputation table loaded");
        Ok(table)
    }

    async fn save(&self, table: &ReputationTable) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(table)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, json).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        debug!(path = ?self.path, entries = table.len(), "Reputation table saved");
        Ok(())
    }
}

/// In-memory backend, used when no path is configured.
#[derive(Debug, Default)]
pub struct MemoryReputationStore {
    table: Mutex<ReputationTable>,
}

impl MemoryReputationStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReputationStore for MemoryReputationStore {
    async fn load(&self) -> StorageResult<ReputationTable> {
        Ok(self.table.lock().clone())
    }

    async fn save(&self, table: &ReputationTable) -> StorageResult<()> {
        *self.table.lock() = table.clone();
        Ok(())
    }
}
