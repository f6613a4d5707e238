//! Atomic batch application.
//!
//! A batch is decoded, sorted by `(block_number, log_index)` and applied in a
//! single store transaction: raw events first, then each event's handler. A
//! storage or exhausted-retry error rolls the whole batch back; a semantic
//! handler error skips that one event's derived update.

use std::sync::Arc;

use tracing::{debug, error, warn};

use shareindex_core::error::IndexerError;
use shareindex_core::store::{IndexStore, StoreTx};

use crate::adapter::ChainAdapter;
use crate::client::{ChainClient, RawLog};
use crate::dispatcher::{DecodedLog, Dispatcher};
use crate::handlers::Handlers;

/// Whether the committer writes raw events itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawStore {
    Persist,
    /// The caller already stored the raw rows; only run handlers.
    AlreadyStored,
}

/// Summary of one committed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Logs that decoded into known events.
    pub decoded: usize,
    /// Logs dropped as unknown or undecodable.
    pub dropped: usize,
    /// Raw rows that were new (0 for a fully replayed batch).
    pub inserted_raw: usize,
    /// Events whose handler failed semantically and was skipped.
    pub skipped: usize,
    /// Event keys in the order their handlers ran.
    pub applied: Vec<(u64, u64)>,
    pub highest_block: Option<u64>,
}

pub struct BatchCommitter<C, S> {
    store: Arc<S>,
    dispatcher: Dispatcher,
    handlers: Handlers<C>,
}

impl<C: ChainClient, S: IndexStore> BatchCommitter<C, S> {
    pub fn new(store: Arc<S>, dispatcher: Dispatcher, chain: Arc<ChainAdapter<C>>) -> Self {
        Self {
            store,
            dispatcher,
            handlers: Handlers::new(chain),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Apply `logs` atomically.
    pub async fn commit(
        &self,
        logs: &[RawLog],
        raw: RawStore,
    ) -> Result<BatchOutcome, IndexerError> {
        let mut decoded: Vec<DecodedLog> = logs
            .iter()
            .filter_map(|l| self.dispatcher.decode(l))
            .collect();
        decoded.sort_by_key(DecodedLog::key);

        let mut outcome = BatchOutcome {
            decoded: decoded.len(),
            dropped: logs.len() - decoded.len(),
            highest_block: decoded.last().map(|d| d.raw.block_number),
            ..Default::default()
        };
        if decoded.is_empty() {
            return Ok(outcome);
        }

        let mut tx = self.store.begin().await?;
        match self.apply(&decoded, raw, tx.as_mut(), &mut outcome).await {
            Ok(()) => {
                tx.commit().await?;
                debug!(
                    events = outcome.decoded,
                    new_raw = outcome.inserted_raw,
                    skipped = outcome.skipped,
                    highest_block = ?outcome.highest_block,
                    "batch committed"
                );
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    error!(error = %rollback, "batch rollback failed");
                }
                warn!(error = %e, events = decoded.len(), "batch rolled back");
                Err(e)
            }
        }
    }

    async fn apply<T>(
        &self,
        decoded: &[DecodedLog],
        raw: RawStore,
        tx: &mut T,
        outcome: &mut BatchOutcome,
    ) -> Result<(), IndexerError>
    where
        T: StoreTx + ?Sized,
    {
        if raw == RawStore::Persist {
            for log in decoded {
                if tx.insert_raw_event(&log.raw).await? {
                    outcome.inserted_raw += 1;
                }
            }
        }

        for log in decoded {
            match self.handlers.apply(log, tx).await {
                Ok(()) => {}
                Err(e) if e.is_semantic() => {
                    warn!(
                        kind = %log.raw.event_kind,
                        block = log.raw.block_number,
                        log_index = log.raw.log_index,
                        error = %e,
                        "handler failed; skipping event"
                    );
                    outcome.skipped += 1;
                }
                Err(e) => return Err(e),
            }
            outcome.applied.push(log.key());
        }
        Ok(())
    }
}
