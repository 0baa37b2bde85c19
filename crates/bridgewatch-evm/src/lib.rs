//! bridgewatch-evm: account/log-model extractor.
//!
//! Messages come from the core contract's `LogMessagePublished` logs,
//! redemptions from the token bridge's `TransferRedeemed` logs.

pub mod abi;
pub mod extractor;
pub mod fetcher;

pub use extractor::{EvmExtractor, EvmExtractorConfig};
pub use fetcher::{BlockTag, EvmFetcher, EvmRpcClient, HttpEvmClient, RawLog, RawTransaction};
