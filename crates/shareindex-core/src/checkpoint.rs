//! Checkpoint manager: persists the indexer's position for crash recovery.
//!
//! Checkpoints are named key/value rows. Two keys are written:
//! `last_indexed_block` (decimal, never decreases) and `indexer_version`.
//! On restart the catch-up scanner resumes at `last_indexed_block + 1`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IndexerError;

pub const LAST_INDEXED_BLOCK: &str = "last_indexed_block";
pub const INDEXER_VERSION: &str = "indexer_version";

/// A persisted checkpoint row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub key: String,
    pub value: String,
    /// Unix timestamp of when this row was saved.
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Trait for storing and loading checkpoints.
///
/// Implemented by `InMemoryStorage` and `SqliteStorage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Checkpoint>, IndexerError>;

    /// Save (upsert) a checkpoint row.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError>;

    /// Delete a checkpoint row (e.g. when resetting an indexer).
    async fn delete(&self, key: &str) -> Result<(), IndexerError>;
}

/// Reads and advances the indexer's position.
///
/// Only ever moves `last_indexed_block` forward; callers may request any
/// block and stale requests are ignored.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    version: String,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, version: impl Into<String>) -> Self {
        Self {
            store,
            version: version.into(),
        }
    }

    /// The last fully indexed block, or `None` on a fresh database.
    pub async fn last_indexed_block(&self) -> Result<Option<u64>, IndexerError> {
        match self.store.load(LAST_INDEXED_BLOCK).await? {
            Some(cp) => cp.value.parse::<u64>().map(Some).map_err(|e| {
                IndexerError::Storage(format!("corrupt {LAST_INDEXED_BLOCK} '{}': {e}", cp.value))
            }),
            None => Ok(None),
        }
    }

    /// Persist `block` if it is ahead of the stored position.
    ///
    /// The two rows are separate writes. The version row goes first and the
    /// block row is the commit point, so an interrupted advance can leave a
    /// newer version next to the old block but never a block no writer
    /// vouched for.
    ///
    /// Returns `true` if the checkpoint moved.
    pub async fn advance(&self, block: u64) -> Result<bool, IndexerError> {
        if let Some(current) = self.last_indexed_block().await? {
            if block <= current {
                return Ok(false);
            }
        }
        self.store
            .save(Checkpoint::new(INDEXER_VERSION, self.version.clone()))
            .await?;
        self.store
            .save(Checkpoint::new(LAST_INDEXED_BLOCK, block.to_string()))
            .await?;
        debug!(block, "checkpoint advanced");
        Ok(true)
    }

    /// Version string recorded by the last writer, if any.
    pub async fn stored_version(&self) -> Result<Option<String>, IndexerError> {
        Ok(self.store.load(INDEXER_VERSION).await?.map(|cp| cp.value))
    }

    /// Forget the indexed position; the next run starts at the configured block.
    pub async fn reset(&self) -> Result<(), IndexerError> {
        self.store.delete(LAST_INDEXED_BLOCK).await?;
        self.store.delete(INDEXER_VERSION).await
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory checkpoint store for tests and ephemeral indexers.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Checkpoint>>, IndexerError> {
        self.data
            .lock()
            .map_err(|_| IndexerError::Storage("checkpoint store lock poisoned".into()))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, key: &str) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(self.data()?.get(key).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        self.data()?.insert(checkpoint.key.clone(), checkpoint);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), IndexerError> {
        self.data()?.remove(key);
        Ok(())
    }
}
