//! Watcher loop driven by a scripted extractor.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use bridgewatch_core::codec::{message_id, message_key, parse_emitter_address};
use bridgewatch_core::notifier::NoopNotifier;
use bridgewatch_core::types::timestamp_from_secs;
use bridgewatch_core::{
    BlockKey, BlockRange, ChainExtractor, CycleOutcome, MemoryStore, MessageFields,
    MessageRecord, MessageStore, MessagesByBlock, NotificationInput, Notifier, PublishOutcome,
    RedemptionRecord, Watcher, WatcherConfig, WatcherError,
};

const CHAIN_ID: u16 = 9;

struct Scripted {
    finalized: Mutex<u64>,
    /// Added to `finalized` after every read.
    step: u64,
    fail: AtomicBool,
    events: Vec<(u64, MessageFields)>,
    batch: u64,
    scanned: Mutex<Vec<BlockRange>>,
}

impl Scripted {
    fn new(finalized: u64, events: Vec<(u64, MessageFields)>) -> Self {
        Self {
            finalized: Mutex::new(finalized),
            step: 0,
            fail: AtomicBool::new(false),
            events,
            batch: 100,
            scanned: Mutex::new(Vec::new()),
        }
    }

    fn set_finalized(&self, n: u64) {
        *self.finalized.lock().unwrap() = n;
    }
}

#[async_trait]
impl ChainExtractor for Scripted {
    fn chain(&self) -> &str {
        "alpha"
    }

    fn chain_id(&self) -> u16 {
        CHAIN_ID
    }

    fn maximum_batch_size(&self) -> u64 {
        self.batch
    }

    async fn finalized_block_number(&self) -> Result<u64, WatcherError> {
        let mut f = self.finalized.lock().unwrap();
        let current = *f;
        *f += self.step;
        Ok(current)
    }

    async fn messages_for_blocks(&self, range: BlockRange) -> Result<MessagesByBlock, WatcherError> {
        let mut out = BTreeMap::new();
        for (block, fields) in self.events.iter().filter(|(b, _)| range.contains(*b)) {
            out.entry(BlockKey::new(*block, fields.timestamp))
                .or_insert_with(Vec::new)
                .push(message_key("0xtx", fields.emitter_chain, &fields.emitter_hex(), fields.sequence));
        }
        Ok(out)
    }

    async fn message_records(&self, range: BlockRange) -> Result<Vec<MessageRecord>, WatcherError> {
        self.scanned.lock().unwrap().push(range);
        if self.fail.load(Ordering::SeqCst) {
            return Err(WatcherError::Rpc("connection reset".into()));
        }
        Ok(self
            .events
            .iter()
            .filter(|(b, _)| range.contains(*b))
            .map(|(b, f)| f.clone().into_record(format!("0xtx{b}"), *b, "alpha1sender"))
            .collect())
    }
}

#[derive(Default)]
struct Counting {
    published: AtomicUsize,
}

#[async_trait]
impl Notifier for Counting {
    async fn publish_one(&self, _input: NotificationInput) -> PublishOutcome {
        self.published.fetch_add(1, Ordering::SeqCst);
        PublishOutcome::success()
    }

    async fn publish_batch(&self, batch: Vec<NotificationInput>) -> PublishOutcome {
        self.published.fetch_add(batch.len(), Ordering::SeqCst);
        PublishOutcome::success()
    }
}

fn event(sequence: u64) -> MessageFields {
    MessageFields {
        timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        nonce: 0,
        emitter_chain: CHAIN_ID,
        emitter_address: parse_emitter_address("0xabc").unwrap(),
        sequence,
        consistency_level: 1,
        payload: b"hello".to_vec(),
    }
}

fn config(initial_block: Option<u64>) -> WatcherConfig {
    WatcherConfig {
        chain: "alpha".into(),
        chain_id: CHAIN_ID,
        initial_block,
        poll_interval: Duration::from_millis(5),
    }
}

fn watcher(
    extractor: Arc<Scripted>,
    store: Arc<MemoryStore>,
    initial_block: Option<u64>,
) -> Watcher {
    Watcher::new(extractor, store, Arc::new(NoopNotifier), config(initial_block))
}

#[tokio::test]
async fn first_cycle_scans_from_initial_block() {
    let extractor = Arc::new(Scripted::new(1050, vec![(1020, event(7))]));
    let store = Arc::new(MemoryStore::new());
    let w = watcher(extractor.clone(), store.clone(), Some(1000));

    let outcome = w.run_cycle().await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Advanced {
            range: BlockRange { from: 1000, to: 1050 },
            messages: 1,
            redemptions: 0,
        }
    );

    let id = message_id(CHAIN_ID, &parse_emitter_address("0xabc").unwrap(), 7);
    let record = store.get_message(&id).await.unwrap().unwrap();
    assert_eq!(record.revision, 1);
    assert_eq!(record.block_number, 1020);

    let cp = store.load_checkpoint("alpha").await.unwrap().unwrap();
    assert_eq!(cp.last_block, 1050);
    assert_eq!(cp.last_sequence, Some(7));
}

#[tokio::test]
async fn finalized_regression_does_no_work() {
    let extractor = Arc::new(Scripted::new(1050, vec![(1020, event(7))]));
    let store = Arc::new(MemoryStore::new());
    let w = watcher(extractor.clone(), store.clone(), Some(1000));
    w.run_cycle().await.unwrap();
    let before = store.load_checkpoint("alpha").await.unwrap().unwrap();

    extractor.set_finalized(1049);
    let outcome = w.run_cycle().await.unwrap();

    assert_eq!(outcome, CycleOutcome::Idle { resume: 1051, finalized: 1049 });
    assert_eq!(extractor.scanned.lock().unwrap().len(), 1);
    let after = store.load_checkpoint("alpha").await.unwrap().unwrap();
    assert_eq!(after.updated_at, before.updated_at);
}

#[tokio::test]
async fn failed_extraction_leaves_checkpoint_unchanged() {
    let extractor = Arc::new(Scripted::new(1050, vec![(1020, event(7))]));
    let store = Arc::new(MemoryStore::new());
    store.store_checkpoint("alpha", CHAIN_ID, 1010, None).await.unwrap();
    let w = watcher(extractor.clone(), store.clone(), Some(1000));

    extractor.fail.store(true, Ordering::SeqCst);
    let err = w.run_cycle().await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(store.load_checkpoint("alpha").await.unwrap().unwrap().last_block, 1010);
    assert_eq!(store.message_count(), 0);

    // Next cycle retries the same range.
    extractor.fail.store(false, Ordering::SeqCst);
    w.run_cycle().await.unwrap();
    let scanned = extractor.scanned.lock().unwrap().clone();
    assert_eq!(scanned[0], scanned[1]);
    assert_eq!(store.load_checkpoint("alpha").await.unwrap().unwrap().last_block, 1050);
}

#[tokio::test]
async fn rescanning_a_range_is_idempotent() {
    let extractor = Arc::new(Scripted::new(1050, vec![(1020, event(7)), (1030, event(8))]));
    let store = Arc::new(MemoryStore::new());
    let w = watcher(extractor.clone(), store.clone(), Some(1000));

    w.run_cycle().await.unwrap();
    // Simulate a crash between record write and checkpoint write: the
    // checkpoint is lost, the range is scanned again.
    let second = Arc::new(MemoryStore::new());
    let records = extractor
        .message_records(BlockRange { from: 1000, to: 1050 })
        .await
        .unwrap();
    second.store_messages("alpha", &records).await.unwrap();
    let w2 = watcher(extractor.clone(), second.clone(), Some(1000));
    w2.run_cycle().await.unwrap();

    assert_eq!(second.message_count(), 2);
    let id = message_id(CHAIN_ID, &parse_emitter_address("0xabc").unwrap(), 8);
    assert_eq!(second.get_message(&id).await.unwrap().unwrap().revision, 2);
    assert_eq!(store.message_count(), 2);
}

#[tokio::test]
async fn batches_are_bounded_and_checkpoints_monotonic() {
    let mut scripted = Scripted::new(1000, Vec::new());
    scripted.batch = 10;
    scripted.step = 7;
    let extractor = Arc::new(scripted);
    let store = Arc::new(MemoryStore::new());
    let w = watcher(extractor.clone(), store.clone(), Some(1000));

    let mut last = 0;
    for _ in 0..20 {
        if let CycleOutcome::Advanced { range, .. } = w.run_cycle().await.unwrap() {
            assert!(range.block_count() <= 10);
            let cp = store.load_checkpoint("alpha").await.unwrap().unwrap();
            assert!(cp.last_block >= last);
            assert_eq!(cp.last_block, range.to);
            last = cp.last_block;
        }
    }

    let scanned = extractor.scanned.lock().unwrap().clone();
    for pair in scanned.windows(2) {
        assert_eq!(pair[1].from, pair[0].to + 1);
    }
}

#[tokio::test]
async fn missing_start_block_is_fatal() {
    let extractor = Arc::new(Scripted::new(1050, Vec::new()));
    let store = Arc::new(MemoryStore::new());
    let w = watcher(extractor, store, None);

    let err = w.watch(CancellationToken::new()).await.unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn watch_stops_on_cancel() {
    let mut scripted = Scripted::new(1000, vec![(1003, event(1))]);
    scripted.step = 5;
    let extractor = Arc::new(scripted);
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(Counting::default());
    let w = Arc::new(Watcher::new(
        extractor.clone(),
        store.clone(),
        notifier.clone(),
        config(Some(1000)),
    ));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let w = Arc::clone(&w);
        let cancel = cancel.clone();
        async move { w.watch(cancel).await }
    });

    tokio::time::sleep(Duration::from_millis(60)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let cp = store.load_checkpoint("alpha").await.unwrap().unwrap();
    assert!(cp.last_block >= 1005);
    assert_eq!(notifier.published.load(Ordering::SeqCst), 1);
}

/// Extractor whose `message_records` never returns.
struct Stalled {
    entered: tokio::sync::Notify,
    release: tokio::sync::Notify,
}

#[async_trait]
impl ChainExtractor for Stalled {
    fn chain(&self) -> &str {
        "alpha"
    }

    fn chain_id(&self) -> u16 {
        CHAIN_ID
    }

    fn maximum_batch_size(&self) -> u64 {
        100
    }

    async fn finalized_block_number(&self) -> Result<u64, WatcherError> {
        Ok(1050)
    }

    async fn messages_for_blocks(&self, _range: BlockRange) -> Result<MessagesByBlock, WatcherError> {
        Ok(BTreeMap::new())
    }

    async fn message_records(&self, _range: BlockRange) -> Result<Vec<MessageRecord>, WatcherError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn cancel_during_extraction_keeps_checkpoint() {
    let store = Arc::new(MemoryStore::new());
    store.store_checkpoint("alpha", CHAIN_ID, 1010, Some(3)).await.unwrap();
    let before = store.load_checkpoint("alpha").await.unwrap();

    let extractor = Arc::new(Stalled {
        entered: tokio::sync::Notify::new(),
        release: tokio::sync::Notify::new(),
    });
    let w = Arc::new(Watcher::new(
        extractor.clone(),
        store.clone(),
        Arc::new(NoopNotifier),
        config(Some(1000)),
    ));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let w = Arc::clone(&w);
        let cancel = cancel.clone();
        async move { w.watch(cancel).await }
    });

    tokio::time::timeout(Duration::from_secs(5), extractor.entered.notified())
        .await
        .expect("extraction never started");
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("watch did not stop while extraction was blocked")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(store.load_checkpoint("alpha").await.unwrap(), before);
}

#[tokio::test]
async fn messages_for_blocks_keys_by_block() {
    let extractor = Scripted::new(1050, vec![(1020, event(7)), (1020, event(8))]);
    let map = extractor
        .messages_for_blocks(BlockRange { from: 1000, to: 1050 })
        .await
        .unwrap();
    let (key, ids) = map.iter().next().unwrap();
    assert_eq!(key.number, 1020);
    assert_eq!(key.timestamp, timestamp_from_secs(1_704_067_200).unwrap());
    assert_eq!(ids.len(), 2);
}

#[tokio::test]
async fn redemption_scan_defaults_to_empty() {
    let extractor = Scripted::new(1050, Vec::new());
    let redemptions: Vec<RedemptionRecord> = extractor
        .redemption_records(BlockRange { from: 1, to: 2 })
        .await
        .unwrap();
    assert!(redemptions.is_empty());
}
