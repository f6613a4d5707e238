//! Routes raw logs to known event kinds.
//!
//! A log is recognised only when its emitting contract is tracked and its
//! topic0 is one of the events that contract's role emits. Everything else is
//! dropped with a warning and never stored.

use std::collections::HashMap;
use std::str::FromStr;

use alloy_primitives::{Address, B256};
use tracing::warn;

use shareindex_core::error::IndexerError;
use shareindex_core::types::{EventKind, RawEvent};

use crate::abi::{topic0, ContractRole, ShareEvent};
use crate::client::{parse_hex_bytes, RawLog};

/// Addresses of the contracts being indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractSet {
    pub registry: Address,
    pub token: Address,
}

impl ContractSet {
    pub fn new(registry: Address, token: Address) -> Self {
        Self { registry, token }
    }

    /// Every (contract, event kind) pair that is fetched and subscribed
    /// independently.
    pub fn pairs(&self) -> Vec<(Address, EventKind)> {
        [(self.registry, ContractRole::Registry), (self.token, ContractRole::Token)]
            .iter()
            .flat_map(|(address, role)| role.kinds().iter().map(move |kind| (*address, *kind)))
            .collect()
    }
}

/// A log that decoded into a known event.
#[derive(Debug)]
pub struct DecodedLog {
    pub contract: Address,
    pub raw: RawEvent,
    pub event: ShareEvent,
}

impl DecodedLog {
    pub fn key(&self) -> (u64, u64) {
        self.raw.key()
    }
}

pub struct Dispatcher {
    kinds: HashMap<Address, Vec<EventKind>>,
}

impl Dispatcher {
    pub fn new(contracts: &ContractSet) -> Self {
        let mut kinds: HashMap<Address, Vec<EventKind>> = HashMap::new();
        for (address, kind) in contracts.pairs() {
            kinds.entry(address).or_default().push(kind);
        }
        Self { kinds }
    }

    /// Classify and decode `log`, or `None` if it must be dropped.
    pub fn decode(&self, log: &RawLog) -> Option<DecodedLog> {
        if log.removed {
            warn!(address = %log.address, block = ?log.block_number, "dropping removed log");
            return None;
        }
        match self.try_decode(log) {
            Ok(Some(decoded)) => Some(decoded),
            Ok(None) => {
                warn!(
                    address = %log.address,
                    topic0 = ?log.topics.first(),
                    block = ?log.block_number,
                    "dropping unknown event"
                );
                None
            }
            Err(e) => {
                warn!(
                    address = %log.address,
                    block = ?log.block_number,
                    error = %e,
                    "dropping undecodable log"
                );
                None
            }
        }
    }

    fn try_decode(&self, log: &RawLog) -> Result<Option<DecodedLog>, IndexerError> {
        let contract = Address::from_str(&log.address)
            .map_err(|e| IndexerError::Decode(format!("bad address '{}': {e}", log.address)))?;
        let Some(candidates) = self.kinds.get(&contract) else {
            return Ok(None);
        };

        let topics = log
            .topics
            .iter()
            .map(|t| {
                B256::from_str(t)
                    .map_err(|e| IndexerError::Decode(format!("bad topic '{t}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let Some(first) = topics.first() else {
            return Ok(None);
        };
        let Some(kind) = candidates.iter().copied().find(|k| topic0(*k) == *first) else {
            return Ok(None);
        };

        let data = parse_hex_bytes(&log.data)?;
        let event = ShareEvent::decode(kind, &topics, &data)?;
        let raw = log.to_raw_event(kind)?;
        Ok(Some(DecodedLog { contract, raw, event }))
    }
}
