//! Storage traits for raw events and derived state.
//!
//! Writes go through a [`StoreTx`]: everything written between
//! [`IndexStore::begin`] and [`StoreTx::commit`] becomes visible atomically,
//! and [`StoreTx::rollback`] discards it. Raw events, transactions and
//! corporate actions are insert-or-ignore on `(block_number, log_index)`;
//! balances are upserted by address.

use async_trait::async_trait;

use crate::checkpoint::CheckpointStore;
use crate::error::IndexerError;
use crate::types::{CorporateAction, RawEvent, ShareholderBalance, TransactionRecord};

/// A storage backend for the indexer.
#[async_trait]
pub trait IndexStore: CheckpointStore {
    /// Open a write transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, IndexerError>;

    /// All raw events ordered by `(block_number, log_index)`.
    async fn raw_events(&self) -> Result<Vec<RawEvent>, IndexerError>;

    /// All transactions ordered by `(block_number, log_index)`.
    async fn transactions(&self) -> Result<Vec<TransactionRecord>, IndexerError>;

    /// All corporate actions ordered by `(block_number, log_index)`.
    async fn corporate_actions(&self) -> Result<Vec<CorporateAction>, IndexerError>;

    /// All balance rows ordered by address.
    async fn balances(&self) -> Result<Vec<ShareholderBalance>, IndexerError>;

    async fn balance(&self, address: &str) -> Result<Option<ShareholderBalance>, IndexerError>;
}

/// An open write transaction.
#[async_trait]
pub trait StoreTx: Send {
    /// Returns `true` if the row was new.
    async fn insert_raw_event(&mut self, event: &RawEvent) -> Result<bool, IndexerError>;

    /// Returns `true` if the row was new.
    async fn insert_transaction(&mut self, tx: &TransactionRecord) -> Result<bool, IndexerError>;

    /// Returns `true` if the row was new.
    async fn insert_corporate_action(
        &mut self,
        action: &CorporateAction,
    ) -> Result<bool, IndexerError>;

    async fn upsert_balance(&mut self, balance: &ShareholderBalance) -> Result<(), IndexerError>;

    /// Balance rows as seen inside this transaction.
    async fn balances(&mut self) -> Result<Vec<ShareholderBalance>, IndexerError>;

    async fn commit(self: Box<Self>) -> Result<(), IndexerError>;

    async fn rollback(self: Box<Self>) -> Result<(), IndexerError>;
}
