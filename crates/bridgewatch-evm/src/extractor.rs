//! [`ChainExtractor`] for EVM chains.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};

use bridgewatch_core::codec::{message_id, message_key};
use bridgewatch_core::types::{timestamp_from_secs, DestinationTx};
use bridgewatch_core::{
    BlockKey, BlockRange, ChainConfig, ChainExtractor, Finality, MessageFields, MessageRecord,
    MessagesByBlock, RedemptionRecord, SettlementStatus, WatcherError,
};

use crate::abi::{self, PublishedMessage, RedeemedTransfer};
use crate::fetcher::{BlockTag, EvmFetcher, EvmRpcClient, RawLog};

#[derive(Debug, Clone)]
pub struct EvmExtractorConfig {
    pub chain: String,
    pub chain_id: u16,
    /// Core contract address, lowercase.
    pub core_contract: String,
    /// Token bridge address; redemptions are not scanned without it.
    pub token_bridge: Option<String>,
    pub finality: Finality,
    pub max_batch_size: u64,
    pub max_log_range: u64,
    /// Parallel block/transaction lookups per scan.
    pub concurrency: usize,
}

impl EvmExtractorConfig {
    pub fn from_chain(chain: &ChainConfig) -> Result<Self, WatcherError> {
        chain.validate()?;
        Ok(Self {
            chain: chain.name.clone(),
            chain_id: chain.chain_id,
            core_contract: chain.core()?.to_lowercase(),
            token_bridge: chain.token_bridge.as_deref().map(str::to_lowercase),
            finality: chain.finality,
            max_batch_size: chain.max_batch_size,
            max_log_range: chain.max_log_range,
            concurrency: chain.concurrency.max(1),
        })
    }
}

/// A `LogMessagePublished` log with its decoded body.
struct CoreLog {
    block: u64,
    tx_hash: String,
    message: PublishedMessage,
}

pub struct EvmExtractor<C> {
    config: EvmExtractorConfig,
    fetcher: EvmFetcher<C>,
    message_topic: String,
    redeem_topic: String,
}

impl<C: EvmRpcClient> EvmExtractor<C> {
    pub fn new(config: EvmExtractorConfig, client: C) -> Self {
        Self {
            fetcher: EvmFetcher::new(client, config.max_log_range),
            message_topic: abi::event_topic(abi::LOG_MESSAGE_PUBLISHED),
            redeem_topic: abi::event_topic(abi::TRANSFER_REDEEMED),
            config,
        }
    }

    async fn core_logs(&self, range: BlockRange) -> Result<Vec<CoreLog>, WatcherError> {
        let logs = self
            .fetcher
            .logs(range.from, range.to, &self.config.core_contract, &self.message_topic)
            .await?;
        logs.iter()
            .map(|log| {
                Ok(CoreLog {
                    block: log.block_number_u64()?,
                    tx_hash: log.tx_hash.clone(),
                    message: PublishedMessage::decode(&log.topics, &log.data)?,
                })
            })
            .collect()
    }

    /// Timestamps of `blocks`, fetched with bounded concurrency.
    async fn timestamps(
        &self,
        blocks: impl IntoIterator<Item = u64>,
    ) -> Result<HashMap<u64, chrono::DateTime<chrono::Utc>>, WatcherError> {
        let client = self.fetcher.client();
        stream::iter(blocks.into_iter().collect::<BTreeSet<_>>())
            .map(|n| async move {
                let secs = client.block_timestamp(n).await?;
                let ts = timestamp_from_secs(secs)
                    .ok_or_else(|| WatcherError::Decode(format!("block {n} has invalid timestamp {secs}")))?;
                Ok::<_, WatcherError>((n, ts))
            })
            .buffered(self.config.concurrency)
            .try_collect()
            .await
    }

    async fn transactions(
        &self,
        hashes: impl IntoIterator<Item = String>,
    ) -> Result<HashMap<String, crate::fetcher::RawTransaction>, WatcherError> {
        let client = self.fetcher.client();
        let unique: BTreeSet<String> = hashes.into_iter().collect();
        stream::iter(unique)
            .map(|hash| async move {
                let tx = client.transaction(&hash).await?.unwrap_or_default();
                Ok::<_, WatcherError>((hash, tx))
            })
            .buffered(self.config.concurrency)
            .try_collect()
            .await
    }

    fn fields(&self, log: &CoreLog, timestamp: chrono::DateTime<chrono::Utc>) -> MessageFields {
        MessageFields {
            timestamp,
            nonce: log.message.nonce,
            emitter_chain: self.config.chain_id,
            emitter_address: log.message.sender,
            sequence: log.message.sequence,
            consistency_level: log.message.consistency_level,
            payload: log.message.payload.clone(),
        }
    }
}

#[async_trait]
impl<C: EvmRpcClient> ChainExtractor for EvmExtractor<C> {
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
        let client = self.fetcher.client();
        let n = match self.config.finality {
            Finality::Tag => client.block_number(BlockTag::Finalized).await?,
            other => other.finalized_from_head(client.block_number(BlockTag::Latest).await?),
        };
        tracing::debug!(finalized = n, "Fetched finalized block");
        Ok(n)
    }

    async fn messages_for_blocks(&self, range: BlockRange) -> Result<MessagesByBlock, WatcherError> {
        let logs = self.core_logs(range).await?;
        let timestamps = self
            .timestamps(logs.iter().map(|l| l.block).chain(std::iter::once(range.to)))
            .await?;

        let mut out = MessagesByBlock::new();
        for log in &logs {
            let key = BlockKey::new(log.block, timestamps[&log.block]);
            let emitter = hex::encode(log.message.sender);
            out.entry(key).or_default().push(message_key(
                &log.tx_hash,
                self.config.chain_id,
                &emitter,
                log.message.sequence,
            ));
        }
        out.entry(BlockKey::new(range.to, timestamps[&range.to])).or_default();
        Ok(out)
    }

    async fn message_records(&self, range: BlockRange) -> Result<Vec<MessageRecord>, WatcherError> {
        let logs = self.core_logs(range).await?;
        if logs.is_empty() {
            return Ok(Vec::new());
        }
        let timestamps = self.timestamps(logs.iter().map(|l| l.block)).await?;
        let txs = self.transactions(logs.iter().map(|l| l.tx_hash.clone())).await?;

        let records = logs
            .iter()
            .map(|log| {
                let sender = txs.get(&log.tx_hash).map(|t| t.from.to_lowercase()).unwrap_or_default();
                self.fields(log, timestamps[&log.block])
                    .into_record(log.tx_hash.clone(), log.block, sender)
            })
            .collect::<Vec<_>>();
        tracing::debug!(from = range.from, to = range.to, count = records.len(), "Extracted messages");
        Ok(records)
    }

    async fn redemption_records(
        &self,
        range: BlockRange,
    ) -> Result<Vec<RedemptionRecord>, WatcherError> {
        let Some(token_bridge) = self.config.token_bridge.as_deref() else {
            return Ok(Vec::new());
        };
        let logs: Vec<RawLog> = self
            .fetcher
            .logs(range.from, range.to, token_bridge, &self.redeem_topic)
            .await?;
        if logs.is_empty() {
            return Ok(Vec::new());
        }

        let mut blocks = Vec::with_capacity(logs.len());
        for log in &logs {
            blocks.push(log.block_number_u64()?);
        }
        let timestamps = self.timestamps(blocks.iter().copied()).await?;
        let txs = self.transactions(logs.iter().map(|l| l.tx_hash.clone())).await?;

        let mut records = Vec::with_capacity(logs.len());
        for (log, block) in logs.iter().zip(blocks) {
            let redeemed = RedeemedTransfer::decode(&log.topics)?;
            let tx = txs.get(&log.tx_hash).cloned().unwrap_or_default();
            let timestamp = timestamps[&block];
            records.push(RedemptionRecord {
                id: message_id(redeemed.emitter_chain, &redeemed.emitter_address, redeemed.sequence),
                destination_tx: DestinationTx {
                    chain_id: self.config.chain_id,
                    tx_hash: log.tx_hash.clone(),
                    // The event is only emitted by a successful redeem.
                    status: SettlementStatus::Completed,
                    method: abi::redeem_method(&tx.input),
                    from: tx.from.to_lowercase(),
                    to: tx.to.unwrap_or_default().to_lowercase(),
                    block_number: block,
                    timestamp,
                    updated_at: None,
                },
                indexed_at: timestamp,
                revision: 0,
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::tests::{pad_word, published_data};
    use crate::fetcher::RawTransaction;
    use bridgewatch_core::ChainFamily;
    use std::sync::Mutex;

    const CORE: &str = "0x98f3c9e6e3face36baad05fe09d375ef1464288b";
    const BRIDGE: &str = "0x3ee18b2214aff97000d974cf647e7c347e8fa585";
    const EMITTER: &str = "3ee18b2214aff97000d974cf647e7c347e8fa585";

    struct MockEvm {
        latest: u64,
        finalized: u64,
        logs: Vec<RawLog>,
        txs: HashMap<String, RawTransaction>,
        timestamp_calls: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl EvmRpcClient for MockEvm {
        async fn block_number(&self, tag: BlockTag) -> Result<u64, WatcherError> {
            Ok(match tag {
                BlockTag::Latest => self.latest,
                BlockTag::Finalized => self.finalized,
            })
        }

        async fn block_timestamp(&self, number: u64) -> Result<i64, WatcherError> {
            self.timestamp_calls.lock().unwrap().push(number);
            Ok(1_700_000_000 + number as i64)
        }

        async fn logs(
            &self,
            from: u64,
            to: u64,
            address: &str,
            topic0: &str,
        ) -> Result<Vec<RawLog>, WatcherError> {
            Ok(self
                .logs
                .iter()
                .filter(|l| l.address == address && l.topics[0] == topic0)
                .filter(|l| {
                    let b = l.block_number_u64().unwrap();
                    b >= from && b <= to
                })
                .cloned()
                .collect())
        }

        async fn transaction(&self, hash: &str) -> Result<Option<RawTransaction>, WatcherError> {
            Ok(self.txs.get(hash).cloned())
        }
    }

    fn core_log(block: u64, tx: &str, sequence: u64) -> RawLog {
        RawLog {
            address: CORE.into(),
            topics: vec![
                abi::event_topic(abi::LOG_MESSAGE_PUBLISHED),
                format!("0x{}{}", "00".repeat(12), EMITTER),
            ],
            data: published_data(sequence, 1, b"payload", 1),
            block_number: format!("{block:#x}"),
            tx_hash: tx.into(),
            log_index: "0x0".into(),
            removed: None,
        }
    }

    fn redeem_log(block: u64, tx: &str) -> RawLog {
        RawLog {
            address: BRIDGE.into(),
            topics: vec![
                abi::event_topic(abi::TRANSFER_REDEEMED),
                format!("0x{}", pad_word(4)),
                format!("0x{}", "cd".repeat(32)),
                format!("0x{}", pad_word(11)),
            ],
            data: "0x".into(),
            block_number: format!("{block:#x}"),
            tx_hash: tx.into(),
            log_index: "0x1".into(),
            removed: None,
        }
    }

    fn extractor(mock: MockEvm, finality: Finality) -> EvmExtractor<MockEvm> {
        let mut chain = ChainConfig::new("ethereum", 2, ChainFamily::Evm);
        chain.rpc_url = Some("http://localhost:8545".into());
        chain.core_contract = Some(CORE.to_uppercase().replace("0X", "0x"));
        chain.token_bridge = Some(BRIDGE.into());
        chain.finality = finality;
        EvmExtractor::new(EvmExtractorConfig::from_chain(&chain).unwrap(), mock)
    }

    fn mock(logs: Vec<RawLog>) -> MockEvm {
        let mut txs = HashMap::new();
        txs.insert(
            "0xredeem".to_string(),
            RawTransaction {
                from: "0xRelayer".into(),
                to: Some(BRIDGE.into()),
                input: format!("0x{}", hex::encode(abi::selector("completeTransfer(bytes)"))),
            },
        );
        txs.insert(
            "0xpublish".to_string(),
            RawTransaction {
                from: "0xUser".into(),
                to: Some(BRIDGE.into()),
                input: "0x".into(),
            },
        );
        MockEvm {
            latest: 1_000,
            finalized: 960,
            logs,
            txs,
            timestamp_calls: Mutex::new(vec![]),
        }
    }

    #[tokio::test]
    async fn finality_rules() {
        assert_eq!(extractor(mock(vec![]), Finality::Tag).finalized_block_number().await.unwrap(), 960);
        assert_eq!(extractor(mock(vec![]), Finality::Depth(15)).finalized_block_number().await.unwrap(), 985);
        assert_eq!(extractor(mock(vec![]), Finality::Instant).finalized_block_number().await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn message_records_from_core_logs() {
        let ex = extractor(
            mock(vec![core_log(105, "0xpublish", 7), core_log(105, "0xpublish", 8), core_log(300, "0xother", 9)]),
            Finality::Tag,
        );
        let records = ex.message_records(BlockRange { from: 100, to: 200 }).await.unwrap();

        assert_eq!(records.len(), 2);
        let r = &records[0];
        assert_eq!(r.emitter_chain, 2);
        assert_eq!(r.emitter_address, format!("{}{}", "00".repeat(12), EMITTER));
        assert_eq!(r.sequence, 7);
        assert_eq!(r.block_number, 105);
        assert_eq!(r.sender, "0xuser");
        assert_eq!(r.indexed_at.timestamp(), 1_700_000_105);
        assert_eq!(r.id, format!("2/{}{}/7", "00".repeat(12), EMITTER));
        // One timestamp lookup per distinct block.
        assert_eq!(*ex.fetcher.client().timestamp_calls.lock().unwrap(), vec![105]);
    }

    #[tokio::test]
    async fn messages_for_blocks_includes_end_marker() {
        let ex = extractor(mock(vec![core_log(105, "0xpublish", 7)]), Finality::Tag);
        let map = ex.messages_for_blocks(BlockRange { from: 100, to: 200 }).await.unwrap();

        let keys: Vec<u64> = map.keys().map(|k| k.number).collect();
        assert_eq!(keys, vec![105, 200]);
        let first = map.values().next().unwrap();
        assert_eq!(first, &vec![format!("0xpublish:2/{}{}/7", "00".repeat(12), EMITTER)]);
        assert!(map.values().last().unwrap().is_empty());
    }

    #[tokio::test]
    async fn redemption_records_from_token_bridge() {
        let ex = extractor(mock(vec![redeem_log(150, "0xredeem")]), Finality::Tag);
        let records = ex.redemption_records(BlockRange { from: 100, to: 200 }).await.unwrap();

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.id, format!("4/{}/11", "cd".repeat(32)));
        assert_eq!(r.destination_tx.chain_id, 2);
        assert_eq!(r.destination_tx.method, "completeTransfer");
        assert_eq!(r.destination_tx.from, "0xrelayer");
        assert_eq!(r.destination_tx.to, BRIDGE);
        assert_eq!(r.destination_tx.status, SettlementStatus::Completed);
    }

    #[tokio::test]
    async fn no_token_bridge_means_no_redemptions() {
        let mut ex = extractor(mock(vec![redeem_log(150, "0xredeem")]), Finality::Tag);
        ex.config.token_bridge = None;
        let records = ex.redemption_records(BlockRange { from: 100, to: 200 }).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn malformed_log_aborts_scan() {
        let mut bad = core_log(105, "0xpublish", 7);
        bad.data = "0x1234".into();
        let ex = extractor(mock(vec![bad]), Finality::Tag);
        let err = ex.message_records(BlockRange { from: 100, to: 200 }).await.unwrap_err();
        assert!(matches!(err, WatcherError::Decode(_)));
    }
}
