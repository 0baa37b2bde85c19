//! The per-family extraction contract.

use async_trait::async_trait;

use crate::cursor::BlockRange;
use crate::error::WatcherError;
use crate::types::{MessageRecord, MessagesByBlock, RedemptionRecord};

/// Reads finalized bridge activity from one chain.
///
/// Implementations are chain-family specific (EVM logs, Tendermint blocks,
/// transaction indexer pages) but must all satisfy the same contract:
/// a range scan returns every message emitted by the configured core contract
/// within `[from, to]`, and re-scanning the same range returns the same ids.
#[async_trait]
pub trait ChainExtractor: Send + Sync {
    /// Registry name of the chain (e.g. `"ethereum"`).
    fn chain(&self) -> &str;

    /// Numeric bridge chain id.
    fn chain_id(&self) -> u16;

    /// Upper bound on blocks scanned per cycle.
    fn maximum_batch_size(&self) -> u64;

    /// Highest block considered final.
    async fn finalized_block_number(&self) -> Result<u64, WatcherError>;

    /// Block key → message keys for every block in `range` that emitted a
    /// bridge message. The extractor may add an empty entry for
    /// `range.to` so callers can see the scan reached the end.
    async fn messages_for_blocks(&self, range: BlockRange) -> Result<MessagesByBlock, WatcherError>;

    /// Normalized message records for `range`.
    async fn message_records(&self, range: BlockRange) -> Result<Vec<MessageRecord>, WatcherError>;

    /// Destination-side redemptions observed in `range`. Families that do not
    /// track redemptions return an empty list.
    async fn redemption_records(
        &self,
        _range: BlockRange,
    ) -> Result<Vec<RedemptionRecord>, WatcherError> {
        Ok(Vec::new())
    }
}
