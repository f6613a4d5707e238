//! Indexer configuration and status types.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::retry::RetryConfig;

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// First block to index when no checkpoint exists.
    pub start_block: u64,
    /// Number of blocks behind head that catch-up never crosses.
    pub confirmation_depth: u64,
    /// Logs per catch-up commit.
    pub batch_size: usize,
    /// Widest block range requested in a single `eth_getLogs` call.
    pub max_block_range: u64,
    /// How often live mode scans up to the confirmation-safe head.
    pub checkpoint_interval: Duration,
    /// Written next to the checkpoint for operators.
    pub indexer_version: String,
    pub retry: RetryConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            confirmation_depth: 3,
            batch_size: 100,
            max_block_range: 2_000,
            checkpoint_interval: Duration::from_secs(10),
            indexer_version: env!("CARGO_PKG_VERSION").to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Load from process environment variables, falling back to defaults.
    ///
    /// Recognised: `START_BLOCK`, `CONFIRMATION_DEPTH`, `BATCH_SIZE`,
    /// `MAX_BLOCK_RANGE`, `CHECKPOINT_INTERVAL_SECS`, `RETRY_MAX_ATTEMPTS`,
    /// `RETRY_INITIAL_BACKOFF_MS`, `RETRY_MAX_BACKOFF_MS`.
    pub fn from_env() -> Result<Self, IndexerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IndexerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            start_block: parse_or(&lookup, "START_BLOCK", defaults.start_block)?,
            confirmation_depth: parse_or(
                &lookup,
                "CONFIRMATION_DEPTH",
                defaults.confirmation_depth,
            )?,
            batch_size: parse_or(&lookup, "BATCH_SIZE", defaults.batch_size)?,
            max_block_range: parse_or(&lookup, "MAX_BLOCK_RANGE", defaults.max_block_range)?,
            checkpoint_interval: Duration::from_secs(parse_or(
                &lookup,
                "CHECKPOINT_INTERVAL_SECS",
                defaults.checkpoint_interval.as_secs(),
            )?),
            indexer_version: defaults.indexer_version,
            retry: RetryConfig {
                max_attempts: parse_or(&lookup, "RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
                initial_backoff: Duration::from_millis(parse_or(
                    &lookup,
                    "RETRY_INITIAL_BACKOFF_MS",
                    defaults.retry.initial_backoff.as_millis() as u64,
                )?),
                max_backoff: Duration::from_millis(parse_or(
                    &lookup,
                    "RETRY_MAX_BACKOFF_MS",
                    defaults.retry.max_backoff.as_millis() as u64,
                )?),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.batch_size == 0 {
            return Err(IndexerError::Config("BATCH_SIZE must be at least 1".into()));
        }
        if self.max_block_range == 0 {
            return Err(IndexerError::Config("MAX_BLOCK_RANGE must be at least 1".into()));
        }
        if self.checkpoint_interval.is_zero() {
            return Err(IndexerError::Config(
                "CHECKPOINT_INTERVAL_SECS must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(IndexerError::Config("RETRY_MAX_ATTEMPTS must be at least 1".into()));
        }
        Ok(())
    }

    /// `head - confirmation_depth`, or `None` while no block is confirmed.
    pub fn safe_head(&self, head: u64) -> Option<u64> {
        head.checked_sub(self.confirmation_depth)
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, IndexerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| IndexerError::Config(format!("{key}='{raw}': {e}"))),
        _ => Ok(default),
    }
}

/// Runtime status of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerStatus {
    /// Not yet started.
    Idle,
    /// Scanning historical blocks up to the confirmation-safe head.
    CatchingUp,
    /// Following the chain through subscriptions.
    Live,
    /// Shutting down gracefully.
    Stopping,
    /// Terminated.
    Stopped,
    /// Catch-up failed; the indexer is unhealthy.
    Failed,
}

impl IndexerStatus {
    /// `true` while `start()` has work in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::CatchingUp | Self::Live | Self::Stopping)
    }
}

impl std::fmt::Display for IndexerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::CatchingUp => write!(f, "catching-up"),
            Self::Live => write!(f, "live"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
