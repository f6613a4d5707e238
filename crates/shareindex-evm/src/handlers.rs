//! Per-event derived-state handlers.
//!
//! Balances are never computed from local deltas: every touching event reads
//! the holder's authoritative balance and the current split multiplier from
//! the token, then upserts the row.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use tracing::{debug, warn};

use shareindex_core::balance::effective_balance;
use shareindex_core::error::IndexerError;
use shareindex_core::store::StoreTx;
use shareindex_core::types::{CorporateAction, ShareholderBalance, TransactionRecord, TxKind};

use crate::abi::{
    balanceOfCall, corporateActionCall, splitMultiplierCall, CorporateActionRecorded, Issued,
    ShareEvent, SplitExecuted, Transfer,
};
use crate::adapter::ChainAdapter;
use crate::client::{hex0x, ChainClient};
use crate::dispatcher::DecodedLog;

pub struct Handlers<C> {
    chain: Arc<ChainAdapter<C>>,
}

impl<C: ChainClient> Handlers<C> {
    pub fn new(chain: Arc<ChainAdapter<C>>) -> Self {
        Self { chain }
    }

    /// Apply the derived-state update for one event inside `tx`.
    pub async fn apply<T>(&self, log: &DecodedLog, tx: &mut T) -> Result<(), IndexerError>
    where
        T: StoreTx + ?Sized,
    {
        match &log.event {
            ShareEvent::TokenLinked(ev) => {
                debug!(registry = %log.contract, token = %ev.token, "token linked");
                Ok(())
            }
            ShareEvent::Issued(ev) => self.on_issued(log, ev, tx).await,
            ShareEvent::Transfer(ev) => self.on_transfer(log, ev, tx).await,
            ShareEvent::SplitExecuted(ev) => self.on_split(log, ev, tx).await,
            ShareEvent::CorporateActionRecorded(ev) => self.on_corporate_action(log, ev, tx).await,
        }
    }

    async fn on_issued<T>(
        &self,
        log: &DecodedLog,
        ev: &Issued,
        tx: &mut T,
    ) -> Result<(), IndexerError>
    where
        T: StoreTx + ?Sized,
    {
        let rows = self.read_balances(log, &[ev.to]).await?;

        tx.insert_transaction(&TransactionRecord {
            tx_hash: log.raw.tx_hash.clone(),
            from: None,
            to: address_key(&ev.to),
            amount: ev.amount,
            block_number: log.raw.block_number,
            block_timestamp: log.raw.block_timestamp,
            log_index: log.raw.log_index,
            kind: TxKind::Issued,
        })
        .await?;
        upsert_all(tx, &rows).await
    }

    async fn on_transfer<T>(
        &self,
        log: &DecodedLog,
        ev: &Transfer,
        tx: &mut T,
    ) -> Result<(), IndexerError>
    where
        T: StoreTx + ?Sized,
    {
        // Mints are booked by the matching Issued event.
        if ev.from == Address::ZERO {
            debug!(block = log.raw.block_number, to = %ev.to, "skipping mint transfer");
            return Ok(());
        }

        let rows = self.read_balances(log, &[ev.from, ev.to]).await?;

        tx.insert_transaction(&TransactionRecord {
            tx_hash: log.raw.tx_hash.clone(),
            from: Some(address_key(&ev.from)),
            to: address_key(&ev.to),
            amount: ev.value,
            block_number: log.raw.block_number,
            block_timestamp: log.raw.block_timestamp,
            log_index: log.raw.log_index,
            kind: TxKind::Transfer,
        })
        .await?;
        upsert_all(tx, &rows).await
    }

    /// Recompute every holder's effective balance. All rows are computed
    /// before the first write so a failing holder leaves the table on one
    /// multiplier.
    async fn on_split<T>(
        &self,
        log: &DecodedLog,
        ev: &SplitExecuted,
        tx: &mut T,
    ) -> Result<(), IndexerError>
    where
        T: StoreTx + ?Sized,
    {
        let multiplier = self.multiplier(log.contract).await?;
        if multiplier != ev.newMultiplier {
            warn!(
                block = log.raw.block_number,
                event = %ev.newMultiplier,
                chain = %multiplier,
                "split multiplier differs from event payload; using chain value"
            );
        }

        let rows = tx
            .balances()
            .await?
            .into_iter()
            .map(|holder| {
                let effective = effective_or_err("SplitExecuted", holder.balance, multiplier)?;
                Ok(ShareholderBalance {
                    effective_balance: effective,
                    last_updated_block: log.raw.block_number,
                    ..holder
                })
            })
            .collect::<Result<Vec<_>, IndexerError>>()?;

        upsert_all(tx, &rows).await?;
        debug!(block = log.raw.block_number, %multiplier, holders = rows.len(), "split applied");
        Ok(())
    }

    async fn on_corporate_action<T>(
        &self,
        log: &DecodedLog,
        ev: &CorporateActionRecorded,
        tx: &mut T,
    ) -> Result<(), IndexerError>
    where
        T: StoreTx + ?Sized,
    {
        let record = self
            .chain
            .read(log.contract, &corporateActionCall { actionId: ev.actionId }, None)
            .await
            .map_err(|e| match e {
                IndexerError::Rpc { code, message } => IndexerError::handler(
                    "CorporateActionRecorded",
                    format!("lookup of action {} failed ({code}): {message}", ev.actionId),
                ),
                other => other,
            })?;

        tx.insert_corporate_action(&CorporateAction {
            action_id: ev.actionId.to_string(),
            action_kind: record.actionType,
            payload: hex0x(&record.data),
            block_number: log.raw.block_number,
            block_timestamp: log.raw.block_timestamp,
            log_index: log.raw.log_index,
        })
        .await?;
        Ok(())
    }

    /// Read `holders`' balances and the multiplier from the emitting token
    /// and build their rows. The zero address never gets a row.
    async fn read_balances(
        &self,
        log: &DecodedLog,
        holders: &[Address],
    ) -> Result<Vec<ShareholderBalance>, IndexerError> {
        let token = log.contract;
        let multiplier = self.multiplier(token).await?;

        let mut rows = Vec::with_capacity(holders.len());
        for holder in holders.iter().filter(|h| **h != Address::ZERO) {
            let balance = self
                .chain
                .read(token, &balanceOfCall { account: *holder }, None)
                .await?
                ._0;
            rows.push(ShareholderBalance {
                address: address_key(holder),
                balance,
                effective_balance: effective_or_err(&log.raw.event_kind, balance, multiplier)?,
                last_updated_block: log.raw.block_number,
            });
        }
        Ok(rows)
    }

    async fn multiplier(&self, token: Address) -> Result<U256, IndexerError> {
        Ok(self.chain.read(token, &splitMultiplierCall {}, None).await?._0)
    }
}

/// Lowercase hex used as the balance/transaction address key.
pub fn address_key(address: &Address) -> String {
    hex0x(address.as_slice())
}

async fn upsert_all<T>(tx: &mut T, rows: &[ShareholderBalance]) -> Result<(), IndexerError>
where
    T: StoreTx + ?Sized,
{
    for row in rows {
        tx.upsert_balance(row).await?;
    }
    Ok(())
}

fn effective_or_err(handler: &str, balance: U256, multiplier: U256) -> Result<U256, IndexerError> {
    effective_balance(balance, multiplier).ok_or_else(|| {
        IndexerError::handler(
            handler,
            format!("effective balance of {balance} at multiplier {multiplier} overflows"),
        )
    })
}
