//! Transport-level error types.

use bridgewatch_core::WatcherError;
use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur during an HTTP or JSON-RPC call.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection refused, reset, DNS failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Endpoint answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if the same request may succeed when sent again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout { .. } => true,
            Self::HttpStatus { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// HTTP status code, if the endpoint answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<TransportError> for WatcherError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Deserialization(e) => WatcherError::Decode(e.to_string()),
            other => WatcherError::Rpc(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_are_retryable() {
        for status in [429, 502, 503, 504] {
            let e = TransportError::HttpStatus { status, body: String::new() };
            assert!(e.is_retryable(), "{status} should retry");
        }
        let e = TransportError::HttpStatus { status: 500, body: "boom".into() };
        assert!(!e.is_retryable());
        assert!(TransportError::Timeout { ms: 10 }.is_retryable());
    }

    #[test]
    fn rpc_errors_are_not_retryable() {
        let e = TransportError::Rpc(JsonRpcError {
            code: -32000,
            message: "query returned more than 10000 results".into(),
            data: None,
        });
        assert!(!e.is_retryable());
        assert!(matches!(WatcherError::from(e), WatcherError::Rpc(_)));
    }
}
