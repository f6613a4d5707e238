//! Host settings read from the environment.

use std::str::FromStr;

use alloy_primitives::Address;
use anyhow::{bail, Context, Result};

use shareindex_evm::{derive_ws_url, ContractSet};

pub const DEFAULT_DATABASE_URL: &str = "./shareindex.db";

/// Where the indexer reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub rpc_http_url: String,
    pub rpc_ws_url: Option<String>,
    pub contracts: ContractSet,
    pub database_url: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rpc_http_url = required(&lookup, "RPC_HTTP_URL")?;
        let rpc_ws_url = optional(&lookup, "RPC_WS_URL").or_else(|| derive_ws_url(&rpc_http_url));
        let registry = address(&lookup, "REGISTRY_ADDRESS")?;
        let token = address(&lookup, "TOKEN_ADDRESS")?;
        if registry == token {
            bail!("REGISTRY_ADDRESS and TOKEN_ADDRESS must differ");
        }
        Ok(Self {
            rpc_http_url,
            rpc_ws_url,
            contracts: ContractSet::new(registry, token),
            database_url: database_url_from(&lookup),
        })
    }
}

/// `DATABASE_URL`, or the default file next to the working directory.
pub fn database_url() -> String {
    database_url_from(&|key: &str| std::env::var(key).ok())
}

fn database_url_from<F>(lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, "DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
}

fn optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, key).with_context(|| format!("{key} is not set"))
}

fn address<F>(lookup: &F, key: &str) -> Result<Address>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = required(lookup, key)?;
    Address::from_str(&raw).with_context(|| format!("{key}='{raw}' is not an address"))
}
