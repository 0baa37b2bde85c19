//! bridgewatch-rpc: the HTTP transport shared by every chain extractor.
//!
//! ```text
//! Request → [RateLimiter] → [RetryPolicy] → reqwest (with timeout)
//! ```

pub mod client;
pub mod error;
pub mod policy;
pub mod request;

pub use client::{HttpClient, HttpClientConfig};
pub use error::TransportError;
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
