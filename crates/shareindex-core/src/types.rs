//! Records persisted by the indexer.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

// ─── EventKind ────────────────────────────────────────────────────────────────

/// The event kinds emitted by the share-registry contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    TokenLinked,
    Issued,
    Transfer,
    SplitExecuted,
    CorporateActionRecorded,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::TokenLinked,
        EventKind::Issued,
        EventKind::Transfer,
        EventKind::SplitExecuted,
        EventKind::CorporateActionRecorded,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::TokenLinked => "TokenLinked",
            Self::Issued => "Issued",
            Self::Transfer => "Transfer",
            Self::SplitExecuted => "SplitExecuted",
            Self::CorporateActionRecorded => "CorporateActionRecorded",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ─── RawEvent ─────────────────────────────────────────────────────────────────

/// One on-chain log, stored verbatim. Keyed by `(block_number, log_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_kind: String,
    /// Emitting contract, lowercase `0x` hex.
    pub contract: String,
    pub topics: Vec<String>,
    /// ABI-encoded data, `0x` hex.
    pub data: String,
    pub block_number: u64,
    pub log_index: u64,
    pub block_timestamp: Option<i64>,
    pub tx_hash: Option<String>,
}

impl RawEvent {
    pub fn key(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

// ─── Transactions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxKind {
    Issued,
    Transfer,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issued => "ISSUED",
            Self::Transfer => "TRANSFER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ISSUED" => Some(Self::Issued),
            "TRANSFER" => Some(Self::Transfer),
            _ => None,
        }
    }
}

/// A share movement: issuance or transfer between holders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub tx_hash: Option<String>,
    /// `None` for issuance.
    pub from: Option<String>,
    pub to: String,
    pub amount: U256,
    pub block_number: u64,
    pub block_timestamp: Option<i64>,
    pub log_index: u64,
    pub kind: TxKind,
}

impl TransactionRecord {
    pub fn key(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

// ─── Corporate actions ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorporateAction {
    /// On-chain action id, decimal.
    pub action_id: String,
    pub action_kind: String,
    /// Opaque payload as returned by the registry, `0x` hex.
    pub payload: String,
    pub block_number: u64,
    pub block_timestamp: Option<i64>,
    pub log_index: u64,
}

impl CorporateAction {
    pub fn key(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

// ─── Balances ─────────────────────────────────────────────────────────────────

/// Current holdings of one address.
///
/// `effective_balance` is always `floor(balance * multiplier / SCALE)` for the
/// multiplier in force when the row was last written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareholderBalance {
    /// Lowercase `0x` hex.
    pub address: String,
    pub balance: U256,
    pub effective_balance: U256,
    pub last_updated_block: u64,
}
