//! Retrying facade over a [`ChainClient`].
//!
//! Every call except `subscribe` goes through the configured
//! [`RetryPolicy`]. ABI decode failures are raised after the retries, so a
//! malformed return value is never re-requested.

use alloy_primitives::{Address, Bytes};
use alloy_sol_types::SolCall;
use tokio::sync::mpsc;
use tracing::debug;

use shareindex_core::error::IndexerError;
use shareindex_core::retry::RetryPolicy;
use shareindex_core::types::EventKind;

use crate::abi::topic0;
use crate::client::{ChainClient, LogFilter, RawLog, Subscription};

pub struct ChainAdapter<C> {
    client: C,
    retry: RetryPolicy,
}

impl<C: ChainClient> ChainAdapter<C> {
    pub fn new(client: C, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Latest block number reported by the node.
    pub async fn current_head(&self) -> Result<u64, IndexerError> {
        let client = &self.client;
        self.retry
            .run("eth_blockNumber", move || client.block_number())
            .await
    }

    /// All `kind` logs emitted by `contract` in `[from, to]`, fetched in
    /// chunks of at most `max_range` blocks.
    pub async fn get_logs(
        &self,
        contract: Address,
        kind: EventKind,
        from: u64,
        to: u64,
        max_range: u64,
    ) -> Result<Vec<RawLog>, IndexerError> {
        let client = &self.client;
        let span = max_range.max(1);
        let mut logs = Vec::new();
        let mut start = from;

        while start <= to {
            let end = to.min(start.saturating_add(span - 1));
            let range = LogFilter::new(contract, topic0(kind)).range(start, end);
            let filter = &range;
            let chunk = self
                .retry
                .run("eth_getLogs", move || client.get_logs(filter))
                .await?;
            debug!(%contract, %kind, from = start, to = end, logs = chunk.len(), "fetched logs");
            logs.extend(chunk);

            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }
        Ok(logs)
    }

    /// Call a view function on `contract` and decode its return value.
    pub async fn read<T>(
        &self,
        contract: Address,
        call: &T,
        block: Option<u64>,
    ) -> Result<T::Return, IndexerError>
    where
        T: SolCall + Sync,
        T::Return: Send,
    {
        let client = &self.client;
        let input = Bytes::from(call.abi_encode());
        let output = self
            .retry
            .run(T::SIGNATURE, move || client.call(contract, input.clone(), block))
            .await?;
        T::abi_decode_returns(&output, true)
            .map_err(|e| IndexerError::Decode(format!("{}: {e}", T::SIGNATURE)))
    }

    /// Subscribe to `kind` logs from `contract`. Not retried.
    pub async fn subscribe(
        &self,
        contract: Address,
        kind: EventKind,
        sink: mpsc::Sender<Vec<RawLog>>,
    ) -> Result<Subscription, IndexerError> {
        let filter = LogFilter::new(contract, topic0(kind));
        self.client.subscribe_logs(&filter, sink).await
    }
}
