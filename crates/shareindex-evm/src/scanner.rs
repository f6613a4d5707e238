//! Catch-up scanner: replays history from the checkpoint to the
//! confirmation-safe head.
//!
//! Each pair of interest is fetched independently over the whole range; a
//! pair that fails is logged and the others still commit. The merged logs are
//! sorted and committed in fixed-size batches, and the checkpoint advances
//! only after a batch commits.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use shareindex_core::error::IndexerError;
use shareindex_core::store::IndexStore;

use crate::client::{ChainClient, RawLog};
use crate::committer::RawStore;
use crate::pipeline::Pipeline;

/// Where the scanner currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    ComputingRange,
    Fetching,
    Committing,
    Done,
}

/// Summary of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub from: u64,
    pub to: u64,
    pub logs: usize,
    pub batches: usize,
    /// Pairs whose fetch failed after retries.
    pub failed_pairs: usize,
    /// Checkpoint after the scan, if one exists.
    pub checkpoint: Option<u64>,
}

pub struct CatchUpScanner<C, S> {
    pipeline: Arc<Pipeline<C, S>>,
}

impl<C, S> CatchUpScanner<C, S>
where
    C: ChainClient + 'static,
    S: IndexStore + 'static,
{
    pub fn new(pipeline: Arc<Pipeline<C, S>>) -> Self {
        Self { pipeline }
    }

    /// Scan from the checkpoint (or `start_block`) to the safe head.
    ///
    /// Also used by the live tick: anything the subscriptions missed below the
    /// safe head, and any range held back by a failed pair, is fetched here
    /// before the checkpoint moves.
    pub async fn run(&self, shutdown: &watch::Receiver<bool>) -> Result<ScanReport, IndexerError> {
        self.enter(ScanPhase::ComputingRange);
        let last = self.pipeline.checkpoint.last_indexed_block().await?;
        let from = match last {
            Some(block) => block + 1,
            None => self.pipeline.config.start_block,
        };
        let head = self.pipeline.chain.current_head().await?;
        let nothing_to_do = ScanReport {
            from,
            to: from.saturating_sub(1),
            checkpoint: last,
            ..Default::default()
        };

        let Some(safe_head) = self.pipeline.config.safe_head(head) else {
            debug!(
                head,
                depth = self.pipeline.config.confirmation_depth,
                "catch-up: no confirmed blocks yet"
            );
            self.enter(ScanPhase::Done);
            return Ok(nothing_to_do);
        };
        if safe_head < from {
            debug!(from, safe_head, head, "catch-up: already at safe head");
            self.enter(ScanPhase::Done);
            return Ok(nothing_to_do);
        }

        info!(from, to = safe_head, head, "catch-up: scanning");
        self.scan(from, safe_head, shutdown).await
    }

    /// Re-scan `[from, to]`. `to` defaults to, and is clamped at, the safe
    /// head. Replayed events are idempotent; the checkpoint never moves back.
    pub async fn rescan(
        &self,
        from: u64,
        to: Option<u64>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<ScanReport, IndexerError> {
        self.enter(ScanPhase::ComputingRange);
        let Some(safe_head) = self.pipeline.safe_head().await? else {
            self.enter(ScanPhase::Done);
            return Err(IndexerError::Config(format!(
                "rescan from {from}: no block has {} confirmations yet",
                self.pipeline.config.confirmation_depth
            )));
        };
        let to = match to {
            Some(to) if to > safe_head => {
                warn!(requested = to, safe_head, "rescan: clamping end block to safe head");
                safe_head
            }
            Some(to) => to,
            None => safe_head,
        };
        if from > to {
            self.enter(ScanPhase::Done);
            return Err(IndexerError::Config(format!(
                "rescan range {from}..={to} is empty (safe head {safe_head})"
            )));
        }

        info!(from, to, "rescan: scanning");
        self.scan(from, to, shutdown).await
    }

    async fn scan(
        &self,
        from: u64,
        to: u64,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<ScanReport, IndexerError> {
        self.enter(ScanPhase::Fetching);
        let (logs, failed_pairs) = self.fetch(from, to).await;

        self.enter(ScanPhase::Committing);
        let batch_size = self.pipeline.config.batch_size.max(1);
        let batches: Vec<&[RawLog]> = logs.chunks(batch_size).collect();
        let mut report = ScanReport {
            from,
            to,
            logs: logs.len(),
            failed_pairs,
            ..Default::default()
        };

        for (i, batch) in batches.iter().enumerate() {
            if *shutdown.borrow() {
                info!(batch = i, batches = batches.len(), "catch-up: stop requested");
                return Err(IndexerError::Aborted {
                    reason: "stop requested during catch-up".into(),
                });
            }

            let outcome = self.pipeline.committer.commit(batch, RawStore::Persist).await?;
            report.batches += 1;

            // A block may straddle two batches; only claim it once the next
            // batch has moved past it.
            let target = match batches.get(i + 1) {
                Some(next) => {
                    let last_block = block_of(batch.last());
                    let next_first = block_of(next.first());
                    match (last_block, next_first) {
                        (Some(last), Some(next)) => next.checked_sub(1).map(|n| n.min(last)),
                        _ => None,
                    }
                }
                None => Some(to),
            };
            self.advance(target, failed_pairs).await?;

            info!(
                batch = i + 1,
                batches = batches.len(),
                events = outcome.decoded,
                dropped = outcome.dropped,
                skipped = outcome.skipped,
                checkpoint = ?target,
                "catch-up: batch committed"
            );
        }

        if batches.is_empty() {
            self.advance(Some(to), failed_pairs).await?;
        }

        report.checkpoint = self.pipeline.checkpoint.last_indexed_block().await?;
        self.enter(ScanPhase::Done);
        info!(
            from,
            to,
            logs = report.logs,
            batches = report.batches,
            failed_pairs,
            checkpoint = ?report.checkpoint,
            "catch-up: range complete"
        );
        Ok(report)
    }

    /// Fetch every pair concurrently; returns sorted logs and the number of
    /// pairs that failed.
    async fn fetch(&self, from: u64, to: u64) -> (Vec<RawLog>, usize) {
        let max_range = self.pipeline.config.max_block_range;
        let pairs = self.pipeline.pairs();
        let fetches = pairs.iter().map(|(contract, kind)| {
            self.pipeline
                .chain
                .get_logs(*contract, *kind, from, to, max_range)
        });
        let results = join_all(fetches).await;

        let mut positioned = Vec::new();
        let mut failed = 0;
        for ((contract, kind), result) in pairs.iter().zip(results) {
            match result {
                Ok(logs) => {
                    debug!(%contract, %kind, logs = logs.len(), "catch-up: pair fetched");
                    for log in logs {
                        match log.position() {
                            Ok(position) => positioned.push((position, log)),
                            Err(e) => warn!(
                                %contract,
                                %kind,
                                error = %e,
                                "catch-up: dropping log without position"
                            ),
                        }
                    }
                }
                Err(e) => {
                    failed += 1;
                    error!(
                        %contract,
                        %kind,
                        from,
                        to,
                        error = %e,
                        "catch-up: fetch failed; continuing with other pairs"
                    );
                }
            }
        }

        positioned.sort_by_key(|(position, _)| *position);
        (positioned.into_iter().map(|(_, log)| log).collect(), failed)
    }

    async fn advance(&self, target: Option<u64>, failed_pairs: usize) -> Result<(), IndexerError> {
        let Some(block) = target else {
            return Ok(());
        };
        if failed_pairs > 0 {
            debug!(
                block,
                failed_pairs,
                "catch-up: holding checkpoint until every pair is fetched"
            );
            return Ok(());
        }
        self.pipeline.checkpoint.advance(block).await?;
        Ok(())
    }

    fn enter(&self, phase: ScanPhase) {
        debug!(?phase, "catch-up phase");
    }
}

fn block_of(log: Option<&RawLog>) -> Option<u64> {
    log.and_then(|l| l.position().ok()).map(|(block, _)| block)
}
