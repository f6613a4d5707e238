//! shareindex-core: foundation for the share-registry event indexer.
//!
//! # Architecture
//!
//! ```text
//! ShareIndexer (controller)
//!     ├── CatchUpScanner   (checkpoint → safe head, batched commits)
//!     ├── LiveWatcher      (subscriptions, periodic checkpoint)
//!     ├── BatchCommitter   (one store transaction per batch)
//!     ├── CheckpointManager (monotonic last_indexed_block)
//!     └── IndexStore backend (memory / SQLite)
//! ```
//!
//! This crate holds the chain-agnostic pieces: records, errors, the
//! checkpoint and store traits, configuration, the retry policy and
//! effective-balance arithmetic.

pub mod balance;
pub mod checkpoint;
pub mod error;
pub mod indexer;
pub mod retry;
pub mod store;
pub mod types;

pub use balance::{effective_balance, SCALE};
pub use checkpoint::{CheckpointManager, CheckpointStore};
pub use error::IndexerError;
pub use indexer::{IndexerConfig, IndexerStatus};
pub use retry::{RetryConfig, RetryPolicy};
pub use store::{IndexStore, StoreTx};
pub use types::{
    CorporateAction, EventKind, RawEvent, ShareholderBalance, TransactionRecord, TxKind,
};
