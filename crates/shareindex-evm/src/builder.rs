//! Fluent builder API for creating share indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use shareindex_evm::IndexerBuilder;
//!
//! let config = IndexerBuilder::new()
//!     .start_block(19_000_000)
//!     .confirmation_depth(12)
//!     .batch_size(500)
//!     .build_config()
//!     .unwrap();
//! ```

use std::sync::Arc;
use std::time::Duration;

use shareindex_core::error::IndexerError;
use shareindex_core::indexer::IndexerConfig;
use shareindex_core::retry::RetryConfig;
use shareindex_core::store::IndexStore;

use crate::client::ChainClient;
use crate::dispatcher::ContractSet;
use crate::indexer::ShareIndexer;

/// Fluent builder for `IndexerConfig` and `ShareIndexer`.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    /// Start from an existing configuration, e.g. one loaded from the environment.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self { config }
    }

    /// Set the first block indexed when no checkpoint exists.
    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    /// Set confirmation depth (blocks behind head that catch-up stops at).
    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    /// Set the number of logs committed per catch-up batch.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the widest block range requested per `eth_getLogs` call.
    pub fn max_block_range(mut self, blocks: u64) -> Self {
        self.config.max_block_range = blocks;
        self
    }

    /// Set how often live mode persists the checkpoint.
    pub fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.config.checkpoint_interval = interval;
        self
    }

    pub fn indexer_version(mut self, version: impl Into<String>) -> Self {
        self.config.indexer_version = version.into();
        self
    }

    /// Set the retry policy for chain calls.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Build and validate the `IndexerConfig`.
    pub fn build_config(self) -> Result<IndexerConfig, IndexerError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build a `ShareIndexer` over `client` and `store`.
    pub fn build<C, S>(
        self,
        client: C,
        store: Arc<S>,
        contracts: ContractSet,
    ) -> Result<ShareIndexer<C, S>, IndexerError>
    where
        C: ChainClient + 'static,
        S: IndexStore + 'static,
    {
        ShareIndexer::new(self.build_config()?, client, store, contracts)
    }
}
