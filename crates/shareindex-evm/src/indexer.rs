//! The indexer controller: catch-up, then live, with graceful shutdown.
//!
//! `start` runs catch-up to the confirmation-safe head under the writer
//! lock, then opens subscriptions and hands them to a background live task.
//! `stop` signals that task, waits for it and for any in-flight write, and
//! leaves the checkpoint where the last committed work put it.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use shareindex_core::error::IndexerError;
use shareindex_core::indexer::{IndexerConfig, IndexerStatus};
use shareindex_core::store::IndexStore;

use crate::client::ChainClient;
use crate::dispatcher::ContractSet;
use crate::live::LiveWatcher;
use crate::pipeline::Pipeline;
use crate::scanner::{CatchUpScanner, ScanReport};

struct IndexerState {
    status: IndexerStatus,
    shutdown: Option<watch::Sender<bool>>,
    live_task: Option<JoinHandle<()>>,
}

pub struct ShareIndexer<C, S> {
    pipeline: Arc<Pipeline<C, S>>,
    scanner: CatchUpScanner<C, S>,
    state: Mutex<IndexerState>,
}

impl<C, S> ShareIndexer<C, S>
where
    C: ChainClient + 'static,
    S: IndexStore + 'static,
{
    pub fn new(
        config: IndexerConfig,
        client: C,
        store: Arc<S>,
        contracts: ContractSet,
    ) -> Result<Self, IndexerError> {
        config.validate()?;
        let pipeline = Arc::new(Pipeline::new(config, client, store, contracts));
        Ok(Self {
            scanner: CatchUpScanner::new(pipeline.clone()),
            pipeline,
            state: Mutex::new(IndexerState {
                status: IndexerStatus::Idle,
                shutdown: None,
                live_task: None,
            }),
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.pipeline.config
    }

    pub fn contracts(&self) -> &ContractSet {
        &self.pipeline.contracts
    }

    pub fn store(&self) -> &Arc<S> {
        &self.pipeline.store
    }

    /// Catch up to the safe head, then switch to live mode.
    ///
    /// Returns once live mode is running. Calling it while the indexer is
    /// already active is a no-op. A catch-up failure leaves the indexer
    /// `Failed` and is returned to the caller; a stop during catch-up is not
    /// an error.
    pub async fn start(&self) -> Result<(), IndexerError> {
        let shutdown_rx = {
            let mut state = self.lock_state()?;
            if state.status.is_active() {
                warn!(status = %state.status, "start ignored: indexer already running");
                return Ok(());
            }
            let (tx, rx) = watch::channel(false);
            state.shutdown = Some(tx);
            state.status = IndexerStatus::CatchingUp;
            rx
        };

        info!(
            registry = %self.pipeline.contracts.registry,
            token = %self.pipeline.contracts.token,
            start_block = self.pipeline.config.start_block,
            confirmation_depth = self.pipeline.config.confirmation_depth,
            "indexer starting"
        );

        let caught_up = {
            let _writer = self.pipeline.writer.lock().await;
            self.scanner.run(&shutdown_rx).await
        };
        match caught_up {
            Ok(report) => info!(
                to = report.to,
                logs = report.logs,
                checkpoint = ?report.checkpoint,
                "catch-up complete"
            ),
            Err(e) if e.is_aborted() => {
                info!("catch-up interrupted by stop");
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "catch-up failed");
                let mut state = self.lock_state()?;
                state.shutdown = None;
                state.status = IndexerStatus::Failed;
                return Err(e);
            }
        }

        let watcher = match LiveWatcher::connect(self.pipeline.clone()).await {
            Ok(watcher) => watcher,
            Err(e) => {
                error!(error = %e, "live subscriptions failed");
                let mut state = self.lock_state()?;
                state.shutdown = None;
                state.status = IndexerStatus::Failed;
                return Err(e);
            }
        };

        let raced = {
            let mut state = self.lock_state()?;
            if state.shutdown.is_none() || *shutdown_rx.borrow() {
                Some(watcher)
            } else {
                state.live_task = Some(tokio::spawn(watcher.run(shutdown_rx)));
                state.status = IndexerStatus::Live;
                None
            }
        };
        match raced {
            Some(watcher) => {
                info!("stop requested before live mode; closing subscriptions");
                watcher.close().await;
            }
            None => info!("indexer live"),
        }
        Ok(())
    }

    /// Stop live mode and wait for in-flight work to settle. Idempotent.
    pub async fn stop(&self) -> Result<(), IndexerError> {
        let (shutdown, live_task) = {
            let mut state = self.lock_state()?;
            if !state.status.is_active() {
                info!(status = %state.status, "stop: indexer not running");
                return Ok(());
            }
            state.status = IndexerStatus::Stopping;
            (state.shutdown.take(), state.live_task.take())
        };
        info!("indexer stopping");

        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }
        if let Some(task) = live_task {
            if let Err(e) = task.await {
                error!(error = %e, "live task ended abnormally");
            }
        }
        // Wait for a catch-up or rescan batch that is still writing.
        let _writer = self.pipeline.writer.lock().await;

        self.lock_state()?.status = IndexerStatus::Stopped;
        let checkpoint = self.pipeline.checkpoint.last_indexed_block().await?;
        info!(checkpoint = ?checkpoint, "indexer stopped");
        Ok(())
    }

    /// Re-process `[from, to]` (or up to the safe head). Safe to run while
    /// live: writes are serialized with the live watcher.
    pub async fn rescan(&self, from: u64, to: Option<u64>) -> Result<ScanReport, IndexerError> {
        let shutdown = {
            let state = self.lock_state()?;
            match &state.shutdown {
                Some(tx) => tx.subscribe(),
                None => watch::channel(false).1,
            }
        };
        let _writer = self.pipeline.writer.lock().await;
        self.scanner.rescan(from, to, &shutdown).await
    }

    pub fn status(&self) -> IndexerStatus {
        self.state
            .lock()
            .map(|s| s.status)
            .unwrap_or(IndexerStatus::Failed)
    }

    /// `true` while catching up or live.
    pub fn is_healthy(&self) -> bool {
        matches!(self.status(), IndexerStatus::CatchingUp | IndexerStatus::Live)
    }

    pub async fn last_indexed_block(&self) -> Result<Option<u64>, IndexerError> {
        self.pipeline.checkpoint.last_indexed_block().await
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, IndexerState>, IndexerError> {
        self.state
            .lock()
            .map_err(|_| IndexerError::Storage("indexer state lock poisoned".into()))
    }
}
