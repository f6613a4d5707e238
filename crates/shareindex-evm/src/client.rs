//! Chain client abstraction: the minimal JSON-RPC surface the indexer needs.

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use shareindex_core::error::IndexerError;
use shareindex_core::types::{EventKind, RawEvent};

/// A raw log as returned by `eth_getLogs` / `eth_subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: Option<String>,
    pub log_index: Option<String>,
    pub transaction_hash: Option<String>,
    /// Present on nodes that attach block timestamps to logs.
    #[serde(default)]
    pub block_timestamp: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    /// `(block_number, log_index)`; fails for pending logs.
    pub fn position(&self) -> Result<(u64, u64), IndexerError> {
        let block = self
            .block_number
            .as_deref()
            .ok_or_else(|| IndexerError::Decode("log without blockNumber".into()))?;
        let index = self
            .log_index
            .as_deref()
            .ok_or_else(|| IndexerError::Decode("log without logIndex".into()))?;
        Ok((parse_hex_u64(block)?, parse_hex_u64(index)?))
    }

    /// Convert to the stored representation.
    pub fn to_raw_event(&self, kind: EventKind) -> Result<RawEvent, IndexerError> {
        let (block_number, log_index) = self.position()?;
        let block_timestamp = match self.block_timestamp.as_deref() {
            Some(ts) => Some(i64::try_from(parse_hex_u64(ts)?).map_err(|_| {
                IndexerError::Decode(format!("blockTimestamp '{ts}' out of range"))
            })?),
            None => None,
        };
        Ok(RawEvent {
            event_kind: kind.name().to_string(),
            contract: self.address.to_lowercase(),
            topics: self.topics.iter().map(|t| t.to_lowercase()).collect(),
            data: self.data.to_lowercase(),
            block_number,
            log_index,
            block_timestamp,
            tx_hash: self.transaction_hash.as_ref().map(|h| h.to_lowercase()),
        })
    }
}

/// Logs from one contract with one topic0, optionally bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topic0: B256,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

impl LogFilter {
    pub fn new(address: Address, topic0: B256) -> Self {
        Self {
            address,
            topic0,
            from_block: None,
            to_block: None,
        }
    }

    pub fn range(mut self, from: u64, to: u64) -> Self {
        self.from_block = Some(from);
        self.to_block = Some(to);
        self
    }

    /// JSON-RPC filter object.
    pub fn to_params(&self) -> serde_json::Value {
        let mut params = serde_json::json!({
            "address": hex0x(self.address.as_slice()),
            "topics": [hex0x(self.topic0.as_slice())],
        });
        if let Some(from) = self.from_block {
            params["fromBlock"] = format!("{from:#x}").into();
        }
        if let Some(to) = self.to_block {
            params["toBlock"] = format!("{to:#x}").into();
        }
        params
    }

    /// `true` if `log` was emitted by this filter's contract with this topic0
    /// inside the block range.
    pub fn matches(&self, log: &RawLog) -> bool {
        if !log.address.eq_ignore_ascii_case(&hex0x(self.address.as_slice())) {
            return false;
        }
        match log.topics.first() {
            Some(t) if t.eq_ignore_ascii_case(&hex0x(self.topic0.as_slice())) => {}
            _ => return false,
        }
        let Ok((block, _)) = log.position() else {
            return false;
        };
        self.from_block.map_or(true, |from| block >= from)
            && self.to_block.map_or(true, |to| block <= to)
    }
}

/// A live log subscription. Logs are delivered into the sink handed to
/// [`ChainClient::subscribe_logs`] until [`Subscription::unsubscribe`] is
/// awaited or the handle is dropped.
#[derive(Debug)]
pub struct Subscription {
    label: String,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(
        label: impl Into<String>,
        cancel: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            label: label.into(),
            cancel: Some(cancel),
            task: Some(task),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Cancel delivery and wait for the background task to finish.
    pub async fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(subscription = %self.label, error = %e, "subscription task ended abnormally");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

/// Minimal chain interface required by the indexer.
///
/// Implementations report transient failures as `Transport`/`Timeout` so the
/// caller's retry policy can act on them.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// `eth_blockNumber`.
    async fn block_number(&self) -> Result<u64, IndexerError>;

    /// `eth_getLogs` over the filter's block range.
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError>;

    /// `eth_call` against `block`, or `latest` when `None`.
    async fn call(
        &self,
        to: Address,
        input: Bytes,
        block: Option<u64>,
    ) -> Result<Bytes, IndexerError>;

    /// Start streaming logs matching `filter` into `sink`.
    async fn subscribe_logs(
        &self,
        filter: &LogFilter,
        sink: mpsc::Sender<Vec<RawLog>>,
    ) -> Result<Subscription, IndexerError>;
}

// ─── Hex helpers ──────────────────────────────────────────────────────────────

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(s: &str) -> Result<u64, IndexerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| IndexerError::Decode(format!("bad quantity '{s}': {e}")))
}

/// Decode `0x`-prefixed hex data.
pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, IndexerError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| IndexerError::Decode(format!("bad hex data: {e}")))
}

/// Lowercase `0x` hex of any byte string.
pub fn hex0x(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
