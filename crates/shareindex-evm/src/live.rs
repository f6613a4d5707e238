//! Live watcher: follows the chain through log subscriptions.
//!
//! All subscriptions feed one channel drained by a single task, so live
//! batches are applied one at a time through the same committer as catch-up.
//! A periodic tick re-runs the catch-up scan from the checkpoint to the
//! confirmation-safe head. That fetches whatever the subscriptions never
//! delivered (blocks mined before they opened, reconnect gaps, ranges held by
//! a failed pair) and is the only way the checkpoint moves in live mode.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use shareindex_core::error::IndexerError;
use shareindex_core::store::IndexStore;

use crate::client::{ChainClient, RawLog, Subscription};
use crate::committer::RawStore;
use crate::pipeline::Pipeline;
use crate::scanner::CatchUpScanner;

/// Capacity of the shared live channel, in batches.
const LIVE_CHANNEL_CAPACITY: usize = 1024;

pub struct LiveWatcher<C, S> {
    pipeline: Arc<Pipeline<C, S>>,
    scanner: CatchUpScanner<C, S>,
    subscriptions: Vec<Subscription>,
    batches: mpsc::Receiver<Vec<RawLog>>,
}

impl<C, S> LiveWatcher<C, S>
where
    C: ChainClient + 'static,
    S: IndexStore + 'static,
{
    /// Open one subscription per pair of interest.
    pub async fn connect(pipeline: Arc<Pipeline<C, S>>) -> Result<Self, IndexerError> {
        let (sink, batches) = mpsc::channel(LIVE_CHANNEL_CAPACITY);
        let mut subscriptions = Vec::new();

        for (contract, kind) in pipeline.pairs() {
            match pipeline.chain.subscribe(contract, kind, sink.clone()).await {
                Ok(subscription) => {
                    debug!(%contract, %kind, "live: subscribed");
                    subscriptions.push(subscription);
                }
                Err(e) => {
                    error!(%contract, %kind, error = %e, "live: subscribe failed");
                    for subscription in subscriptions {
                        subscription.unsubscribe().await;
                    }
                    return Err(e);
                }
            }
        }

        info!(subscriptions = subscriptions.len(), "live: subscriptions open");
        Ok(Self {
            scanner: CatchUpScanner::new(pipeline.clone()),
            pipeline,
            subscriptions,
            batches,
        })
    }

    /// Process batches until `shutdown` flips to `true` or its sender is
    /// dropped, then unsubscribe everything.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.pipeline.config.checkpoint_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                batch = self.batches.recv() => match batch {
                    Some(logs) => self.process(logs).await,
                    None => {
                        warn!("live: every subscription closed");
                        break;
                    }
                },
                _ = ticker.tick() => self.sync_checkpoint(&shutdown).await,
            }
        }

        self.close().await;
    }

    /// Cancel and await every subscription.
    pub async fn close(self) {
        let count = self.subscriptions.len();
        for subscription in self.subscriptions {
            subscription.unsubscribe().await;
        }
        info!(subscriptions = count, "live: unsubscribed");
    }

    async fn process(&self, logs: Vec<RawLog>) {
        let _writer = self.pipeline.writer.lock().await;
        match self.pipeline.committer.commit(&logs, RawStore::Persist).await {
            Ok(outcome) => debug!(
                events = outcome.decoded,
                dropped = outcome.dropped,
                new_raw = outcome.inserted_raw,
                "live: batch applied"
            ),
            Err(e) => error!(logs = logs.len(), error = %e, "live: batch failed; continuing"),
        }
    }

    async fn sync_checkpoint(&self, shutdown: &watch::Receiver<bool>) {
        let _writer = self.pipeline.writer.lock().await;
        match self.scanner.run(shutdown).await {
            Ok(report) if report.logs > 0 || report.failed_pairs > 0 => info!(
                from = report.from,
                to = report.to,
                logs = report.logs,
                failed_pairs = report.failed_pairs,
                checkpoint = ?report.checkpoint,
                "live: backfilled below safe head"
            ),
            Ok(report) => debug!(checkpoint = ?report.checkpoint, "live: checkpoint synced"),
            Err(e) if e.is_aborted() => debug!("live: checkpoint sync interrupted by stop"),
            Err(e) => warn!(error = %e, "live: checkpoint sync failed; retrying next tick"),
        }
    }
}
