//! shareindex-evm: chain access, event handlers, catch-up scanner and live
//! watcher for the share-registry indexer.
//!
//! The crate is generic over a [`ChainClient`] (JSON-RPC in production, a
//! mock in tests) and an [`IndexStore`](shareindex_core::IndexStore) backend.

pub mod abi;
pub mod adapter;
pub mod builder;
pub mod client;
pub mod committer;
pub mod dispatcher;
pub mod handlers;
pub mod indexer;
pub mod live;
pub mod pipeline;
pub mod rpc;
pub mod scanner;

pub use abi::{ContractRole, ShareEvent};
pub use builder::IndexerBuilder;
pub use client::{ChainClient, LogFilter, RawLog, Subscription};
pub use committer::{BatchCommitter, BatchOutcome, RawStore};
pub use dispatcher::{ContractSet, Dispatcher};
pub use indexer::ShareIndexer;
pub use rpc::{derive_ws_url, JsonRpcClient, RpcClientConfig};
pub use scanner::{CatchUpScanner, ScanReport};
