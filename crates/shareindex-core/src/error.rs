//! Error types for the shareindex pipeline.

use thiserror::Error;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Network-level failure talking to the node (connection, HTTP 5xx, 429).
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The node answered with a JSON-RPC error object (e.g. a revert).
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },
}

impl IndexerError {
    /// Returns `true` for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }

    /// Returns `true` for per-event failures: the event is skipped and the
    /// surrounding batch keeps going.
    pub fn is_semantic(&self) -> bool {
        matches!(self, Self::Rpc { .. } | Self::Decode(_) | Self::Handler { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    pub fn handler(handler: &str, reason: impl Into<String>) -> Self {
        Self::Handler {
            handler: handler.to_string(),
            reason: reason.into(),
        }
    }
}
