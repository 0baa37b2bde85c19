//! EVM JSON-RPC access: head/finalized height, logs, block timestamps and
//! transactions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use bridgewatch_core::WatcherError;
use bridgewatch_rpc::HttpClient;

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn block_number_u64(&self) -> Result<u64, WatcherError> {
        parse_hex_u64(&self.block_number)
    }

    pub fn log_index_u64(&self) -> Result<u64, WatcherError> {
        parse_hex_u64(&self.log_index)
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// The fields of `eth_getTransactionByHash` the extractor needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransaction {
    pub from: String,
    /// `None` for contract creation.
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub input: String,
}

/// Block selector for height queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Finalized,
}

impl BlockTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::Finalized => "finalized",
        }
    }
}

/// Minimal EVM RPC surface. Mocked in tests.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    async fn block_number(&self, tag: BlockTag) -> Result<u64, WatcherError>;
    /// Unix seconds of block `number`.
    async fn block_timestamp(&self, number: u64) -> Result<i64, WatcherError>;
    async fn logs(
        &self,
        from: u64,
        to: u64,
        address: &str,
        topic0: &str,
    ) -> Result<Vec<RawLog>, WatcherError>;
    async fn transaction(&self, hash: &str) -> Result<Option<RawTransaction>, WatcherError>;
}

/// [`EvmRpcClient`] over JSON-RPC HTTP.
pub struct HttpEvmClient {
    http: HttpClient,
}

impl HttpEvmClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    async fn block(&self, selector: Value) -> Result<Value, WatcherError> {
        let block: Value = self
            .http
            .call("eth_getBlockByNumber", vec![selector.clone(), json!(false)])
            .await?;
        if block.is_null() {
            return Err(WatcherError::Rpc(format!("block {selector} not found")));
        }
        Ok(block)
    }
}

#[async_trait]
impl EvmRpcClient for HttpEvmClient {
    async fn block_number(&self, tag: BlockTag) -> Result<u64, WatcherError> {
        match tag {
            BlockTag::Latest => {
                let hex: String = self.http.call("eth_blockNumber", vec![]).await?;
                parse_hex_u64(&hex)
            }
            BlockTag::Finalized => {
                let block = self.block(json!(tag.as_str())).await?;
                parse_hex_u64(hex_field(&block, "number")?)
            }
        }
    }

    async fn block_timestamp(&self, number: u64) -> Result<i64, WatcherError> {
        let block = self.block(json!(format!("{number:#x}"))).await?;
        Ok(parse_hex_u64(hex_field(&block, "timestamp")?)? as i64)
    }

    async fn logs(
        &self,
        from: u64,
        to: u64,
        address: &str,
        topic0: &str,
    ) -> Result<Vec<RawLog>, WatcherError> {
        let filter = json!({
            "fromBlock": format!("{from:#x}"),
            "toBlock": format!("{to:#x}"),
            "address": address,
            "topics": [topic0],
        });
        Ok(self.http.call("eth_getLogs", vec![filter]).await?)
    }

    async fn transaction(&self, hash: &str) -> Result<Option<RawTransaction>, WatcherError> {
        Ok(self
            .http
            .call("eth_getTransactionByHash", vec![json!(hash)])
            .await?)
    }
}

/// Wraps an [`EvmRpcClient`] and splits log queries at the provider's range limit.
pub struct EvmFetcher<C> {
    client: C,
    max_log_range: u64,
}

impl<C: EvmRpcClient> EvmFetcher<C> {
    pub fn new(client: C, max_log_range: u64) -> Self {
        Self {
            client,
            max_log_range: max_log_range.max(1),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// All logs in `[from, to]` emitted by `address` with first topic `topic0`,
    /// in chain order.
    pub async fn logs(
        &self,
        from: u64,
        to: u64,
        address: &str,
        topic0: &str,
    ) -> Result<Vec<RawLog>, WatcherError> {
        let mut all = Vec::new();
        let mut start = from;
        while start <= to {
            let end = start.saturating_add(self.max_log_range - 1).min(to);
            let chunk = self.client.logs(start, end, address, topic0).await?;
            tracing::debug!(from = start, to = end, logs = chunk.len(), "eth_getLogs");
            all.extend(chunk.into_iter().filter(|l| !l.is_removed()));
            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }
        Ok(all)
    }
}

/// Parse a `0x`-prefixed (or bare) hex quantity.
pub fn parse_hex_u64(s: &str) -> Result<u64, WatcherError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|_| WatcherError::Decode(format!("invalid hex quantity '{s}'")))
}

fn hex_field<'a>(v: &'a Value, key: &str) -> Result<&'a str, WatcherError> {
    v[key]
        .as_str()
        .ok_or_else(|| WatcherError::Decode(format!("block is missing '{key}'")))
}
