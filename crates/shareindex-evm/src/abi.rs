//! Contract bindings for the share registry and its token.
//!
//! The registry emits `TokenLinked` and `CorporateActionRecorded`; the token
//! emits `Issued`, `Transfer` and `SplitExecuted`. Balances, the split
//! multiplier and corporate-action records are read back through view calls.

use alloy_primitives::B256;
use alloy_sol_types::{sol, SolEvent};

use shareindex_core::error::IndexerError;
use shareindex_core::types::EventKind;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    event TokenLinked(address indexed token);

    #[derive(Debug, PartialEq, Eq)]
    event CorporateActionRecorded(uint256 indexed actionId, string actionType, uint256 blockNumber);

    #[derive(Debug, PartialEq, Eq)]
    event Issued(address indexed to, uint256 amount);

    #[derive(Debug, PartialEq, Eq)]
    event Transfer(address indexed from, address indexed to, uint256 value);

    #[derive(Debug, PartialEq, Eq)]
    event SplitExecuted(uint256 oldMultiplier, uint256 newMultiplier, uint256 blockNumber);

    #[derive(Debug)]
    function balanceOf(address account) external view returns (uint256);

    #[derive(Debug)]
    function splitMultiplier() external view returns (uint256);

    #[derive(Debug)]
    function corporateAction(uint256 actionId)
        external
        view
        returns (string actionType, bytes data, uint256 blockNumber);
}

/// Which side of the system a tracked contract plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractRole {
    Registry,
    Token,
}

impl ContractRole {
    /// Event kinds this role emits.
    pub fn kinds(&self) -> &'static [EventKind] {
        match self {
            Self::Registry => &[EventKind::TokenLinked, EventKind::CorporateActionRecorded],
            Self::Token => &[EventKind::Issued, EventKind::Transfer, EventKind::SplitExecuted],
        }
    }
}

/// keccak256 of the event signature.
pub fn topic0(kind: EventKind) -> B256 {
    match kind {
        EventKind::TokenLinked => TokenLinked::SIGNATURE_HASH,
        EventKind::Issued => Issued::SIGNATURE_HASH,
        EventKind::Transfer => Transfer::SIGNATURE_HASH,
        EventKind::SplitExecuted => SplitExecuted::SIGNATURE_HASH,
        EventKind::CorporateActionRecorded => CorporateActionRecorded::SIGNATURE_HASH,
    }
}

/// A decoded, known event.
#[derive(Debug, PartialEq, Eq)]
pub enum ShareEvent {
    TokenLinked(TokenLinked),
    Issued(Issued),
    Transfer(Transfer),
    SplitExecuted(SplitExecuted),
    CorporateActionRecorded(CorporateActionRecorded),
}

impl ShareEvent {
    /// Decode log topics and data as `kind`.
    pub fn decode(kind: EventKind, topics: &[B256], data: &[u8]) -> Result<Self, IndexerError> {
        Ok(match kind {
            EventKind::TokenLinked => Self::TokenLinked(decode_as(topics, data)?),
            EventKind::Issued => Self::Issued(decode_as(topics, data)?),
            EventKind::Transfer => Self::Transfer(decode_as(topics, data)?),
            EventKind::SplitExecuted => Self::SplitExecuted(decode_as(topics, data)?),
            EventKind::CorporateActionRecorded => {
                Self::CorporateActionRecorded(decode_as(topics, data)?)
            }
        })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::TokenLinked(_) => EventKind::TokenLinked,
            Self::Issued(_) => EventKind::Issued,
            Self::Transfer(_) => EventKind::Transfer,
            Self::SplitExecuted(_) => EventKind::SplitExecuted,
            Self::CorporateActionRecorded(_) => EventKind::CorporateActionRecorded,
        }
    }
}

fn decode_as<E: SolEvent>(topics: &[B256], data: &[u8]) -> Result<E, IndexerError> {
    E::decode_raw_log(topics.iter().copied(), data, true)
        .map_err(|e| IndexerError::Decode(format!("{}: {e}", E::SIGNATURE)))
}
