//! In-memory storage backend.
//!
//! Keeps raw events, derived state and checkpoints in RAM. A transaction
//! works on a private copy of the tables and swaps it in on commit, so a
//! rolled-back batch leaves no trace. Intended for a single writer.
//!
//! `begin` clones every table, so each batch costs time proportional to the
//! total number of stored rows. Fine for tests and small ranges; use
//! `SqliteStorage` for real histories.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use shareindex_core::checkpoint::{Checkpoint, CheckpointStore};
use shareindex_core::error::IndexerError;
use shareindex_core::store::{IndexStore, StoreTx};
use shareindex_core::types::{CorporateAction, RawEvent, ShareholderBalance, TransactionRecord};

#[derive(Debug, Clone, Default)]
struct Tables {
    raw_events: BTreeMap<(u64, u64), RawEvent>,
    transactions: BTreeMap<(u64, u64), TransactionRecord>,
    corporate_actions: BTreeMap<(u64, u64), CorporateAction>,
    balances: BTreeMap<String, ShareholderBalance>,
}

/// In-memory indexer storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    tables: Mutex<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, IndexerError> {
        self.tables
            .lock()
            .map_err(|_| IndexerError::Storage("memory tables lock poisoned".into()))
    }

    fn checkpoints(&self) -> Result<MutexGuard<'_, HashMap<String, Checkpoint>>, IndexerError> {
        self.checkpoints
            .lock()
            .map_err(|_| IndexerError::Storage("memory checkpoint lock poisoned".into()))
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load(&self, key: &str) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(self.checkpoints()?.get(key).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        self.checkpoints()?.insert(checkpoint.key.clone(), checkpoint);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), IndexerError> {
        self.checkpoints()?.remove(key);
        Ok(())
    }
}

#[async_trait]
impl IndexStore for InMemoryStorage {
    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, IndexerError> {
        let working = self.tables()?.clone();
        Ok(Box::new(MemoryTx {
            storage: self,
            working,
        }))
    }

    async fn raw_events(&self) -> Result<Vec<RawEvent>, IndexerError> {
        Ok(self.tables()?.raw_events.values().cloned().collect())
    }

    async fn transactions(&self) -> Result<Vec<TransactionRecord>, IndexerError> {
        Ok(self.tables()?.transactions.values().cloned().collect())
    }

    async fn corporate_actions(&self) -> Result<Vec<CorporateAction>, IndexerError> {
        Ok(self.tables()?.corporate_actions.values().cloned().collect())
    }

    async fn balances(&self) -> Result<Vec<ShareholderBalance>, IndexerError> {
        Ok(self.tables()?.balances.values().cloned().collect())
    }

    async fn balance(&self, address: &str) -> Result<Option<ShareholderBalance>, IndexerError> {
        Ok(self.tables()?.balances.get(address).cloned())
    }
}

/// Transaction over a private copy of the tables.
struct MemoryTx<'a> {
    storage: &'a InMemoryStorage,
    working: Tables,
}

#[async_trait]
impl StoreTx for MemoryTx<'_> {
    async fn insert_raw_event(&mut self, event: &RawEvent) -> Result<bool, IndexerError> {
        Ok(insert_new(&mut self.working.raw_events, event.key(), event))
    }

    async fn insert_transaction(&mut self, tx: &TransactionRecord) -> Result<bool, IndexerError> {
        Ok(insert_new(&mut self.working.transactions, tx.key(), tx))
    }

    async fn insert_corporate_action(
        &mut self,
        action: &CorporateAction,
    ) -> Result<bool, IndexerError> {
        Ok(insert_new(&mut self.working.corporate_actions, action.key(), action))
    }

    async fn upsert_balance(&mut self, balance: &ShareholderBalance) -> Result<(), IndexerError> {
        self.working
            .balances
            .insert(balance.address.clone(), balance.clone());
        Ok(())
    }

    async fn balances(&mut self) -> Result<Vec<ShareholderBalance>, IndexerError> {
        Ok(self.working.balances.values().cloned().collect())
    }

    async fn commit(self: Box<Self>) -> Result<(), IndexerError> {
        let MemoryTx { storage, working } = *self;
        *storage.tables()? = working;
        debug!("memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), IndexerError> {
        debug!("memory transaction rolled back");
        Ok(())
    }
}

fn insert_new<T: Clone>(map: &mut BTreeMap<(u64, u64), T>, key: (u64, u64), value: &T) -> bool {
    if map.contains_key(&key) {
        return false;
    }
    map.insert(key, value.clone());
    true
}
