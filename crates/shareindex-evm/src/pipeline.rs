//! Shared components used by the catch-up scanner, the live watcher and the
//! controller.

use std::sync::Arc;

use alloy_primitives::Address;
use tokio::sync::Mutex;

use shareindex_core::checkpoint::CheckpointManager;
use shareindex_core::error::IndexerError;
use shareindex_core::indexer::IndexerConfig;
use shareindex_core::retry::RetryPolicy;
use shareindex_core::store::IndexStore;
use shareindex_core::types::EventKind;

use crate::adapter::ChainAdapter;
use crate::client::ChainClient;
use crate::committer::BatchCommitter;
use crate::dispatcher::{ContractSet, Dispatcher};

pub struct Pipeline<C, S> {
    pub config: IndexerConfig,
    pub contracts: ContractSet,
    pub chain: Arc<ChainAdapter<C>>,
    pub store: Arc<S>,
    pub committer: BatchCommitter<C, S>,
    pub checkpoint: CheckpointManager,
    /// Serializes every write to the derived store.
    pub writer: Mutex<()>,
}

impl<C, S> Pipeline<C, S>
where
    C: ChainClient + 'static,
    S: IndexStore + 'static,
{
    pub fn new(config: IndexerConfig, client: C, store: Arc<S>, contracts: ContractSet) -> Self {
        let chain = Arc::new(ChainAdapter::new(client, RetryPolicy::new(config.retry.clone())));
        let committer =
            BatchCommitter::new(store.clone(), Dispatcher::new(&contracts), chain.clone());
        let checkpoint = CheckpointManager::new(store.clone(), config.indexer_version.clone());
        Self {
            config,
            contracts,
            chain,
            store,
            committer,
            checkpoint,
            writer: Mutex::new(()),
        }
    }

    /// Pairs of interest, in a stable order.
    pub fn pairs(&self) -> Vec<(Address, EventKind)> {
        self.contracts.pairs()
    }

    /// Latest block minus the confirmation depth; `None` while the chain is
    /// shorter than the depth.
    pub async fn safe_head(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self.config.safe_head(self.chain.current_head().await?))
    }
}
