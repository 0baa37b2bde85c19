//! Tendermint RPC extractor: fetch every block in the range, hash each raw
//! transaction, fetch its result and read the core contract's `wasm` events.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use bridgewatch_core::{
    BlockKey, BlockRange, ChainExtractor, MessageRecord, MessagesByBlock, WatcherError,
};
use bridgewatch_rpc::{HttpClient, TransportError};

use crate::events::{parse_block_time, read_wasm_messages, CosmosExtractorConfig, Event, WasmMessage};

/// Header time and raw transactions of one block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockTxs {
    pub time: DateTime<Utc>,
    /// Base64 encoded transaction bytes.
    pub txs: Vec<String>,
}

/// Tendermint RPC surface used by [`DirectExtractor`]. Mocked in tests.
#[async_trait]
pub trait TendermintClient: Send + Sync {
    async fn latest_height(&self) -> Result<u64, TransportError>;
    async fn block(&self, height: u64) -> Result<BlockTxs, TransportError>;
    /// Events of transaction `hash` (uppercase hex, no prefix).
    async fn tx_events(&self, hash: &str) -> Result<Vec<Event>, TransportError>;
}

// ─── HTTP client ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RpcEnvelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct AbciInfo {
    response: AbciResponse,
}

#[derive(Deserialize)]
struct AbciResponse {
    last_block_height: String,
}

#[derive(Deserialize)]
struct BlockResult {
    block: Block,
}

#[derive(Deserialize)]
struct Block {
    header: Header,
    data: BlockData,
}

#[derive(Deserialize)]
struct Header {
    time: String,
}

#[derive(Deserialize)]
struct BlockData {
    #[serde(default)]
    txs: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct TxResult {
    tx_result: TxExecution,
}

#[derive(Deserialize)]
struct TxExecution {
    #[serde(default)]
    events: Vec<Event>,
}

/// [`TendermintClient`] over the Tendermint JSON-over-HTTP endpoints.
pub struct HttpTendermintClient {
    http: HttpClient,
}

impl HttpTendermintClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TendermintClient for HttpTendermintClient {
    async fn latest_height(&self) -> Result<u64, TransportError> {
        let info: RpcEnvelope<AbciInfo> = self.http.get_json("abci_info").await?;
        info.result
            .response
            .last_block_height
            .parse()
            .map_err(|_| TransportError::Other("abci_info: invalid last_block_height".into()))
    }

    async fn block(&self, height: u64) -> Result<BlockTxs, TransportError> {
        let res: RpcEnvelope<BlockResult> = self.http.get_json(&format!("block?height={height}")).await?;
        let block = res.result.block;
        Ok(BlockTxs {
            time: parse_block_time(&block.header.time)
                .map_err(|e| TransportError::Other(e.to_string()))?,
            txs: block.data.txs.unwrap_or_default(),
        })
    }

    async fn tx_events(&self, hash: &str) -> Result<Vec<Event>, TransportError> {
        let res: RpcEnvelope<TxResult> = self.http.get_json(&format!("tx?hash=0x{hash}")).await?;
        Ok(res.result.tx_result.events)
    }
}

// ─── Error classification ─────────────────────────────────────────────────────

/// The node fails to serialize some historical transactions and answers
/// `500 {"code": 2, "message": "json: error calling MarshalJSON ..."}`.
/// Such a transaction is skipped; every other error aborts the scan.
pub fn is_ignorable_marshal_error(err: &TransportError) -> bool {
    let TransportError::HttpStatus { status: 500, body } = err else {
        return false;
    };
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return false;
    };
    json["code"].as_i64() == Some(2)
        && json["message"]
            .as_str()
            .is_some_and(|m| m.starts_with("json: error calling MarshalJSON"))
}

/// Uppercase hex SHA-256 of a base64 encoded transaction.
pub fn tx_hash(raw_tx: &str) -> Result<String, WatcherError> {
    let bytes = STANDARD
        .decode(raw_tx)
        .map_err(|e| WatcherError::Decode(format!("block transaction is not base64: {e}")))?;
    Ok(hex::encode_upper(Sha256::digest(&bytes)))
}

// ─── Extractor ────────────────────────────────────────────────────────────────

struct ScannedTx {
    hash: String,
    messages: Vec<WasmMessage>,
}

struct ScannedBlock {
    height: u64,
    time: DateTime<Utc>,
    txs: Vec<ScannedTx>,
}

pub struct DirectExtractor<C> {
    config: CosmosExtractorConfig,
    client: C,
}

impl<C: TendermintClient> DirectExtractor<C> {
    pub fn new(config: CosmosExtractorConfig, client: C) -> Self {
        Self { config, client }
    }

    /// Blocks of `range` in height order; transactions within a block keep
    /// their block order.
    async fn scan(&self, range: BlockRange) -> Result<Vec<ScannedBlock>, WatcherError> {
        tracing::debug!(from = range.from, to = range.to, "Scanning blocks");
        stream::iter(range.from..=range.to)
            .map(|height| self.scan_block(height))
            .buffered(self.config.concurrency)
            .try_collect()
            .await
    }

    async fn scan_block(&self, height: u64) -> Result<ScannedBlock, WatcherError> {
        let block = self.client.block(height).await?;
        let hashes = block
            .txs
            .iter()
            .map(|raw| tx_hash(raw))
            .collect::<Result<Vec<_>, _>>()?;

        let txs: Vec<Option<ScannedTx>> = stream::iter(hashes)
            .map(|hash| self.scan_tx(height, hash))
            .buffered(self.config.concurrency)
            .try_collect()
            .await?;

        Ok(ScannedBlock {
            height,
            time: block.time,
            txs: txs.into_iter().flatten().collect(),
        })
    }

    async fn scan_tx(&self, height: u64, hash: String) -> Result<Option<ScannedTx>, WatcherError> {
        let events = match self.client.tx_events(&hash).await {
            Ok(events) => events,
            Err(e) if is_ignorable_marshal_error(&e) => {
                tracing::debug!(block = height, tx = %hash, "Skipping transaction the node cannot marshal");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let messages = read_wasm_messages(&events, self.config.encoding, &self.config.core_contract)?;
        Ok(Some(ScannedTx { hash, messages }))
    }
}

#[async_trait]
impl<C: TendermintClient> ChainExtractor for DirectExtractor<C> {
    fn chain(&self) -> &str {
        &self.config.chain
    }

    fn chain_id(&self) -> u16 {
        self.config.chain_id
    }

    fn maximum_batch_size(&self) -> u64 {
        self.config.max_batch_size
    }

    async fn finalized_block_number(&self) -> Result<u64, WatcherError> {
        let height = self.client.latest_height().await?;
        tracing::debug!(height, "Fetched latest height");
        Ok(height)
    }

    async fn messages_for_blocks(&self, range: BlockRange) -> Result<MessagesByBlock, WatcherError> {
        let mut out = MessagesByBlock::new();
        for block in self.scan(range).await? {
            let keys = out.entry(BlockKey::new(block.height, block.time)).or_default();
            for tx in &block.txs {
                keys.extend(tx.messages.iter().map(|m| m.key(&tx.hash, self.config.chain_id)));
            }
        }
        Ok(out)
    }

    async fn message_records(&self, range: BlockRange) -> Result<Vec<MessageRecord>, WatcherError> {
        let mut records = Vec::new();
        for block in self.scan(range).await? {
            for tx in &block.txs {
                for m in &tx.messages {
                    let fields = m.to_fields(self.config.chain_id, block.time)?;
                    // The sender is not part of the event.
                    records.push(fields.into_record(tx.hash.clone(), block.height, ""));
                }
            }
        }
        Ok(records)
    }
}
