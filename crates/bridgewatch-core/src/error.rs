//! Error types for the watcher pipeline.

use thiserror::Error;

/// Errors that can occur while watching a chain.
#[derive(Debug, Error)]
pub enum WatcherError {
    /// Missing RPC endpoint, contract address or start block. Fatal for the worker.
    #[error("Configuration error for '{chain}': {reason}")]
    Config { chain: String, reason: String },

    #[error("RPC error: {0}")]
    Rpc(String),

    /// Chain data did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("{0}")]
    Other(String),
}

impl WatcherError {
    pub fn config(chain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            chain: chain.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if the worker must not be (re)started.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Returns `true` if the failed cycle should simply be retried next interval.
    pub fn is_transient(&self) -> bool {
        !self.is_fatal()
    }
}

impl From<serde_json::Error> for WatcherError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
