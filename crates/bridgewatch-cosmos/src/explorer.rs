//! Indexer-paginated extractor.
//!
//! The indexer lists the core contract's transactions newest first, `limit`
//! per page, with a `next` cursor. Paging stops at the first transaction
//! below the range or at a short page. The scan can pass over `to` without
//! seeing a transaction there, so a marker for `to` is fetched separately
//! to keep the block map ending at the range end.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use bridgewatch_core::{
    BlockKey, BlockRange, ChainExtractor, MessageRecord, MessagesByBlock, WatcherError,
};
use bridgewatch_rpc::{HttpClient, TransportError};

use crate::events::{
    parse_block_time, parse_height, read_wasm_messages, CosmosExtractorConfig, Event, WasmMessage,
};

pub const PAGE_LIMIT: u32 = 100;

/// One page of the indexer's transaction list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxPage {
    /// Cursor of the next page; absent on the last one.
    #[serde(default)]
    pub next: Option<u64>,
    #[serde(default)]
    pub txs: Vec<IndexedTx>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexedTx {
    pub height: String,
    pub txhash: String,
    /// JSON array of `{msg_index, events}`; plain text for failed txs.
    #[serde(default)]
    pub raw_log: String,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
struct RawLogEntry {
    #[serde(default)]
    events: Vec<Event>,
}

/// Indexer surface used by [`ExplorerExtractor`]. Mocked in tests.
#[async_trait]
pub trait ExplorerClient: Send + Sync {
    async fn latest_height(&self) -> Result<u64, TransportError>;
    async fn txs_page(&self, offset: u64, limit: u32, account: &str) -> Result<TxPage, TransportError>;
    async fn block_time(&self, height: u64) -> Result<DateTime<Utc>, TransportError>;
}

// ─── HTTP client ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct BlockResponse {
    block: BlockBody,
}

#[derive(Deserialize)]
struct BlockBody {
    header: BlockHeader,
}

#[derive(Deserialize)]
struct BlockHeader {
    height: String,
    time: String,
}

/// [`ExplorerClient`] over an FCD-style REST indexer.
pub struct HttpExplorerClient {
    http: HttpClient,
}

impl HttpExplorerClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    async fn header(&self, path: &str) -> Result<BlockHeader, TransportError> {
        let res: BlockResponse = self.http.get_json(path).await?;
        Ok(res.block.header)
    }
}

#[async_trait]
impl ExplorerClient for HttpExplorerClient {
    async fn latest_height(&self) -> Result<u64, TransportError> {
        let header = self.header("blocks/latest").await?;
        parse_height(&header.height).map_err(|e| TransportError::Other(e.to_string()))
    }

    async fn txs_page(&self, offset: u64, limit: u32, account: &str) -> Result<TxPage, TransportError> {
        self.http
            .get_json(&format!("v1/txs?offset={offset}&limit={limit}&account={account}"))
            .await
    }

    async fn block_time(&self, height: u64) -> Result<DateTime<Utc>, TransportError> {
        let header = self.header(&format!("blocks/{height}")).await?;
        parse_block_time(&header.time).map_err(|e| TransportError::Other(e.to_string()))
    }
}

// ─── Extractor ────────────────────────────────────────────────────────────────

struct ScannedTx {
    height: u64,
    hash: String,
    time: DateTime<Utc>,
    messages: Vec<WasmMessage>,
}

struct Scan {
    /// In-range transactions, ascending by height.
    txs: Vec<ScannedTx>,
    reached_end: bool,
}

pub struct ExplorerExtractor<C> {
    config: CosmosExtractorConfig,
    client: C,
    page_limit: u32,
}

impl<C: ExplorerClient> ExplorerExtractor<C> {
    pub fn new(config: CosmosExtractorConfig, client: C) -> Self {
        Self {
            config,
            client,
            page_limit: PAGE_LIMIT,
        }
    }

    pub fn with_page_limit(mut self, limit: u32) -> Self {
        self.page_limit = limit.max(1);
        self
    }

    async fn scan(&self, range: BlockRange) -> Result<Scan, WatcherError> {
        let mut offset = 0u64;
        let mut txs = Vec::new();
        let mut reached_end = false;
        let mut pages = 0u32;

        'pages: loop {
            let page = self
                .client
                .txs_page(offset, self.page_limit, &self.config.core_contract)
                .await?;
            pages += 1;
            let count = page.txs.len();

            for tx in page.txs {
                let height = parse_height(&tx.height)?;
                if height < range.from {
                    break 'pages;
                }
                if height > range.to {
                    continue;
                }
                reached_end |= height == range.to;
                txs.push(self.read_tx(height, tx)?);
            }

            if count < self.page_limit as usize {
                break;
            }
            match page.next {
                Some(next) if next != offset => offset = next,
                _ => break,
            }
        }

        tracing::debug!(
            from = range.from,
            to = range.to,
            pages,
            txs = txs.len(),
            "Indexer scan complete"
        );
        txs.reverse();
        txs.sort_by_key(|t| t.height);
        Ok(Scan { txs, reached_end })
    }

    fn read_tx(&self, height: u64, tx: IndexedTx) -> Result<ScannedTx, WatcherError> {
        let time = parse_block_time(&tx.timestamp)?;
        let messages = match serde_json::from_str::<Vec<RawLogEntry>>(&tx.raw_log) {
            Ok(entries) => {
                let events: Vec<Event> = entries.into_iter().flat_map(|e| e.events).collect();
                read_wasm_messages(&events, self.config.encoding, &self.config.core_contract)?
            }
            Err(e) => {
                tracing::warn!(block = height, tx = %tx.txhash, error = %e, "Unparsable raw log, skipping transaction");
                Vec::new()
            }
        };
        Ok(ScannedTx {
            height,
            hash: tx.txhash,
            time,
            messages,
        })
    }
}

#[async_trait]
impl<C: ExplorerClient> ChainExtractor for ExplorerExtractor<C> {
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
        Ok(self.client.latest_height().await?)
    }

    async fn messages_for_blocks(&self, range: BlockRange) -> Result<MessagesByBlock, WatcherError> {
        let scan = self.scan(range).await?;
        let mut out = MessagesByBlock::new();
        for tx in &scan.txs {
            out.entry(BlockKey::new(tx.height, tx.time))
                .or_default()
                .extend(tx.messages.iter().map(|m| m.key(&tx.hash, self.config.chain_id)));
        }
        if !scan.reached_end {
            tracing::debug!(block = range.to, "Adding marker for range end");
            let time = self.client.block_time(range.to).await?;
            out.entry(BlockKey::new(range.to, time)).or_default();
        }
        Ok(out)
    }

    async fn message_records(&self, range: BlockRange) -> Result<Vec<MessageRecord>, WatcherError> {
        let scan = self.scan(range).await?;
        let mut records = Vec::new();
        for tx in &scan.txs {
            for m in &tx.messages {
                let fields = m.to_fields(self.config.chain_id, tx.time)?;
                records.push(fields.into_record(tx.hash.clone(), tx.height, ""));
            }
        }
        Ok(records)
    }
}
