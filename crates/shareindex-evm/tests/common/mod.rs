//! Scripted in-process chain used by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use shareindex_core::error::IndexerError;
use shareindex_core::retry::RetryConfig;
use shareindex_core::SCALE;
use shareindex_evm::abi::{balanceOfCall, corporateActionCall, splitMultiplierCall};
use shareindex_evm::client::{hex0x, parse_hex_u64};
use shareindex_evm::{ChainClient, ContractSet, IndexerBuilder, LogFilter, RawLog, Subscription};

pub const REGISTRY: Address = Address::new([0xee; 20]);
pub const TOKEN: Address = Address::new([0x70; 20]);
pub const ALICE: Address = Address::new([0xa1; 20]);
pub const BOB: Address = Address::new([0xb0; 20]);

pub fn contracts() -> ContractSet {
    ContractSet::new(REGISTRY, TOKEN)
}

/// `n * 1e18`, the fixed-point form of multiplier `n`.
pub fn mult(n: u64) -> U256 {
    U256::from(n) * SCALE
}

pub fn key(address: Address) -> String {
    hex0x(address.as_slice())
}

/// A builder with no confirmation lag and fast retries.
pub fn builder() -> IndexerBuilder {
    IndexerBuilder::new()
        .confirmation_depth(0)
        .checkpoint_interval(Duration::from_secs(3600))
        .retry(RetryConfig {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        })
}

/// An RPC log for `event` emitted by `contract`.
pub fn log_of<E: SolEvent>(contract: Address, event: &E, block: u64, index: u64) -> RawLog {
    let data = event.encode_log_data();
    RawLog {
        address: hex0x(contract.as_slice()),
        topics: data.topics().iter().map(|t| hex0x(t.as_slice())).collect(),
        data: hex0x(&data.data),
        block_number: Some(format!("{block:#x}")),
        log_index: Some(format!("{index:#x}")),
        transaction_hash: Some(format!("0x{:064x}", block * 1_000 + index)),
        block_timestamp: None,
        removed: false,
    }
}

#[derive(Default)]
pub struct ChainState {
    pub head: u64,
    pub logs: Vec<RawLog>,
    pub balances: HashMap<Address, U256>,
    pub multiplier: U256,
    /// `corporateAction(id)` results; missing ids revert.
    pub actions: HashMap<U256, (String, Vec<u8>, U256)>,
    /// `balanceOf` calls that still fail with a transport error.
    pub failing_balance_reads: u32,
    /// `eth_getLogs` always fails for these topic0 values.
    pub failing_topics: HashSet<B256>,
    /// Added latency on every `eth_call`.
    pub read_delay: Option<Duration>,
    pub subscribe_calls: usize,
    pub unsubscribes: usize,
    next_subscriber: u64,
    subscribers: HashMap<u64, (LogFilter, mpsc::Sender<Vec<RawLog>>)>,
}

/// Shared handle; clones observe and script the same chain.
#[derive(Clone)]
pub struct MockChain {
    state: Arc<Mutex<ChainState>>,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        let state = ChainState {
            head,
            multiplier: SCALE,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap()
    }

    pub fn push(&self, log: RawLog) {
        self.state().logs.push(log);
    }

    pub fn set_balance(&self, holder: Address, amount: u64) {
        self.state().balances.insert(holder, U256::from(amount));
    }

    pub fn set_multiplier(&self, multiplier: U256) {
        self.state().multiplier = multiplier;
    }

    pub fn set_head(&self, head: u64) {
        self.state().head = head;
    }

    /// Add `log` to history and deliver it to matching subscribers.
    pub fn emit(&self, log: RawLog) {
        let sinks: Vec<_> = {
            let mut state = self.state();
            state.logs.push(log.clone());
            state
                .subscribers
                .values()
                .filter(|(filter, _)| filter.matches(&log))
                .map(|(_, sink)| sink.clone())
                .collect()
        };
        for sink in sinks {
            sink.try_send(vec![log.clone()]).unwrap();
        }
    }

    /// Re-deliver `log` to subscribers without touching history.
    pub fn redeliver(&self, log: &RawLog) {
        let sinks: Vec<_> = self
            .state()
            .subscribers
            .values()
            .filter(|(filter, _)| filter.matches(log))
            .map(|(_, sink)| sink.clone())
            .collect();
        for sink in sinks {
            sink.try_send(vec![log.clone()]).unwrap();
        }
    }

    fn reply(&self, input: &[u8]) -> Result<Vec<u8>, IndexerError> {
        let selector: [u8; 4] = input
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| IndexerError::Rpc { code: -32602, message: "short calldata".into() })?;
        let mut state = self.state();

        if selector == balanceOfCall::SELECTOR {
            if state.failing_balance_reads > 0 {
                state.failing_balance_reads -= 1;
                return Err(IndexerError::Transport("connection reset".into()));
            }
            let call = balanceOfCall::abi_decode(input, true).unwrap();
            let balance = state.balances.get(&call.account).copied().unwrap_or_default();
            Ok(balanceOfCall::abi_encode_returns(&(balance,)))
        } else if selector == splitMultiplierCall::SELECTOR {
            Ok(splitMultiplierCall::abi_encode_returns(&(state.multiplier,)))
        } else if selector == corporateActionCall::SELECTOR {
            let call = corporateActionCall::abi_decode(input, true).unwrap();
            match state.actions.get(&call.actionId) {
                Some((kind, data, block)) => Ok(corporateActionCall::abi_encode_returns(&(
                    kind.clone(),
                    Bytes::from(data.clone()),
                    *block,
                ))),
                None => Err(IndexerError::Rpc {
                    code: 3,
                    message: "execution reverted: unknown action".into(),
                }),
            }
        } else {
            Err(IndexerError::Rpc { code: -32601, message: "unknown selector".into() })
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        Ok(self.state().head)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError> {
        let state = self.state();
        if state.failing_topics.contains(&filter.topic0) {
            return Err(IndexerError::Transport("upstream unavailable".into()));
        }
        Ok(state.logs.iter().filter(|l| filter.matches(l)).cloned().collect())
    }

    async fn call(
        &self,
        _to: Address,
        input: Bytes,
        _block: Option<u64>,
    ) -> Result<Bytes, IndexerError> {
        let delay = self.state().read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.reply(&input).map(Bytes::from)
    }

    async fn subscribe_logs(
        &self,
        filter: &LogFilter,
        sink: mpsc::Sender<Vec<RawLog>>,
    ) -> Result<Subscription, IndexerError> {
        let id = {
            let mut state = self.state();
            state.subscribe_calls += 1;
            state.next_subscriber += 1;
            let id = state.next_subscriber;
            state.subscribers.insert(id, (*filter, sink));
            id
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let state = self.state.clone();
        let task = tokio::spawn(async move {
            let _ = cancel_rx.await;
            let mut state = state.lock().unwrap();
            state.subscribers.remove(&id);
            state.unsubscribes += 1;
        });
        Ok(Subscription::new(format!("mock-{id}"), cancel_tx, task))
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Block number of a stored log, for assertions.
pub fn block_of(log: &RawLog) -> u64 {
    parse_hex_u64(log.block_number.as_deref().unwrap()).unwrap()
}
