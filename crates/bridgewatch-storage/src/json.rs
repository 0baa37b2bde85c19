//! Flat-file store: `messages.json`, `redemptions.json` and `checkpoints.json`
//! in one directory.
//!
//! Every write rewrites the affected document in full through a temporary
//! file and a rename, so a crash never leaves a half-written document behind.
//! The in-memory tables only take a change once the file write succeeded.
//!
//! Checkpoint documents written by older deployments (`id` or `_id` instead of
//! `chain`, `blockNumber` as a number or a `"N/<timestamp>"` string) are
//! accepted on load and rewritten in the canonical shape on the next write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use bridgewatch_core::error::WatcherError;
use bridgewatch_core::store::{
    advance_checkpoint, merge_message, merge_redemption, settle_message, Checkpoint, MessageStore,
};
use bridgewatch_core::types::{MessageRecord, RedemptionRecord};

const MESSAGES_FILE: &str = "messages.json";
const REDEMPTIONS_FILE: &str = "redemptions.json";
const CHECKPOINTS_FILE: &str = "checkpoints.json";

#[derive(Default)]
struct Tables {
    messages: BTreeMap<String, MessageRecord>,
    redemptions: BTreeMap<String, RedemptionRecord>,
    checkpoints: BTreeMap<String, Checkpoint>,
}

/// JSON flat-file store.
pub struct JsonStore {
    dir: PathBuf,
    tables: Mutex<Tables>,
}

impl JsonStore {
    /// Store rooted at `dir`. Nothing is read until [`MessageStore::start`].
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            tables: Mutex::new(Tables::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    async fn write_document<T: Serialize>(&self, file: &str, rows: &T) -> Result<(), WatcherError> {
        let path = self.path(file);
        let tmp = path.with_extension("json.tmp");
        let bytes =
            serde_json::to_vec_pretty(rows).map_err(|e| WatcherError::Storage(e.to_string()))?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| WatcherError::Storage(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| WatcherError::Storage(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }
}

async fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, WatcherError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(file = %path.display(), "file does not exist, starting empty");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(WatcherError::Storage(format!(
                "read {}: {e}",
                path.display()
            )))
        }
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw)
        .map_err(|e| WatcherError::Storage(format!("parse {}: {e}", path.display())))
}

// ─── Checkpoint import ────────────────────────────────────────────────────────

/// A block number stored either as a number or as a `"N/<timestamp>"` key.
#[derive(Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Number(u64),
    Text(String),
}

impl LooseNumber {
    fn value(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.split('/').next()?.trim().parse().ok(),
        }
    }
}

/// Any checkpoint shape found on disk.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointDocument {
    #[serde(alias = "id", alias = "_id")]
    chain: String,
    #[serde(default)]
    chain_id: u16,
    #[serde(alias = "blockNumber")]
    last_block: LooseNumber,
    #[serde(default, alias = "lastSequenceNumber")]
    last_sequence: Option<LooseNumber>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl CheckpointDocument {
    fn normalize(self, now: DateTime<Utc>) -> Result<Checkpoint, WatcherError> {
        let last_block = self.last_block.value().ok_or_else(|| {
            WatcherError::Storage(format!("checkpoint for '{}' has no block number", self.chain))
        })?;
        let created_at = self.created_at.unwrap_or(now);
        Ok(Checkpoint {
            last_block,
            last_sequence: self.last_sequence.as_ref().and_then(LooseNumber::value),
            chain_id: self.chain_id,
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
            chain: self.chain,
        })
    }
}

fn import_checkpoints(
    docs: Vec<CheckpointDocument>,
    now: DateTime<Utc>,
) -> Result<BTreeMap<String, Checkpoint>, WatcherError> {
    let mut out = BTreeMap::new();
    for doc in docs {
        let cp = doc.normalize(now)?;
        out.insert(cp.chain.clone(), cp);
    }
    Ok(out)
}

// ─── MessageStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl MessageStore for JsonStore {
    async fn start(&self) -> Result<(), WatcherError> {
        info!(dir = %self.dir.display(), "starting JSON store");
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| WatcherError::Storage(format!("create {}: {e}", self.dir.display())))?;

        let messages: Vec<MessageRecord> = read_document(&self.path(MESSAGES_FILE)).await?;
        let redemptions: Vec<RedemptionRecord> =
            read_document(&self.path(REDEMPTIONS_FILE)).await?;
        let checkpoints: Vec<CheckpointDocument> =
            read_document(&self.path(CHECKPOINTS_FILE)).await?;

        let mut tables = self.tables.lock().await;
        tables.messages = messages.into_iter().map(|m| (m.id.clone(), m)).collect();
        tables.redemptions = redemptions.into_iter().map(|r| (r.id.clone(), r)).collect();
        tables.checkpoints = import_checkpoints(checkpoints, Utc::now())?;

        info!(
            messages = tables.messages.len(),
            redemptions = tables.redemptions.len(),
            checkpoints = tables.checkpoints.len(),
            "JSON store ready"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), WatcherError> {
        info!("JSON store stopped");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        tokio::fs::metadata(&self.dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn load_checkpoint(&self, chain: &str) -> Result<Option<Checkpoint>, WatcherError> {
        Ok(self.tables.lock().await.checkpoints.get(chain).cloned())
    }

    async fn checkpoints(&self) -> Result<Vec<Checkpoint>, WatcherError> {
        Ok(self.tables.lock().await.checkpoints.values().cloned().collect())
    }

    async fn store_messages(
        &self,
        chain: &str,
        records: &[MessageRecord],
    ) -> Result<(), WatcherError> {
        if records.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let mut tables = self.tables.lock().await;
        let mut staged = tables.messages.clone();
        for record in records {
            let redeemed = tables
                .redemptions
                .get(&record.id)
                .map(|r| r.destination_tx.status);
            let merged = merge_message(staged.get(&record.id), record, redeemed, now);
            debug!(chain, id = %record.id, revision = merged.revision, "message upserted");
            staged.insert(record.id.clone(), merged);
        }
        self.write_document(MESSAGES_FILE, &staged.values().collect::<Vec<_>>())
            .await?;
        tables.messages = staged;
        Ok(())
    }

    async fn store_redemptions(
        &self,
        chain: &str,
        records: &[RedemptionRecord],
    ) -> Result<(), WatcherError> {
        if records.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let mut tables = self.tables.lock().await;
        let mut messages = tables.messages.clone();
        let mut redemptions = tables.redemptions.clone();
        let mut settled = false;
        for record in records {
            if let Some(message) = messages.get_mut(&record.id) {
                settle_message(message, record.destination_tx.status, now);
                settled = true;
            }
            let merged = merge_redemption(redemptions.get(&record.id), record, now);
            debug!(chain, id = %record.id, revision = merged.revision, "redemption upserted");
            redemptions.insert(record.id.clone(), merged);
        }
        self.write_document(REDEMPTIONS_FILE, &redemptions.values().collect::<Vec<_>>())
            .await?;
        tables.redemptions = redemptions;
        if settled {
            self.write_document(MESSAGES_FILE, &messages.values().collect::<Vec<_>>())
                .await?;
            tables.messages = messages;
        }
        Ok(())
    }

    async fn store_checkpoint(
        &self,
        chain: &str,
        chain_id: u16,
        last_block: u64,
        last_sequence: Option<u64>,
    ) -> Result<Checkpoint, WatcherError> {
        let mut tables = self.tables.lock().await;
        let cp = advance_checkpoint(
            tables.checkpoints.get(chain),
            chain,
            chain_id,
            last_block,
            last_sequence,
            Utc::now(),
        );
        let mut staged = tables.checkpoints.clone();
        staged.insert(chain.to_string(), cp.clone());
        self.write_document(CHECKPOINTS_FILE, &staged.values().collect::<Vec<_>>())
            .await?;
        tables.checkpoints = staged;
        debug!(chain, block = cp.last_block, "checkpoint stored");
        Ok(cp)
    }

    async fn get_message(&self, id: &str) -> Result<Option<MessageRecord>, WatcherError> {
        Ok(self.tables.lock().await.messages.get(id).cloned())
    }

    async fn get_redemption(&self, id: &str) -> Result<Option<RedemptionRecord>, WatcherError> {
        Ok(self.tables.lock().await.redemptions.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridgewatch_core::types::{DestinationTx, SettlementStatus};

    fn message(id: &str) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            emitter_chain: 2,
            emitter_address: "ab".repeat(32),
            sequence: 7,
            tx_hash: "0xfeed".into(),
            block_number: 1020,
            envelope: vec![1, 0, 0, 0, 0, 0],
            sender: "0xsender".into(),
            status: SettlementStatus::Pending,
            indexed_at: Utc::now(),
            created_at: None,
            updated_at: None,
            revision: 0,
        }
    }

    fn redemption(id: &str) -> RedemptionRecord {
        RedemptionRecord {
            id: id.to_string(),
            destination_tx: DestinationTx {
                chain_id: 4,
                tx_hash: "0xbeef".into(),
                status: SettlementStatus::Completed,
                method: "completeTransfer".into(),
                from: "0xrelayer".into(),
                to: "0xbridge".into(),
                block_number: 88,
                timestamp: Utc::now(),
                updated_at: None,
            },
            indexed_at: Utc::now(),
            revision: 0,
        }
    }

    async fn started(dir: &Path) -> JsonStore {
        let store = JsonStore::new(dir);
        store.start().await.unwrap();
        store
    }

    #[tokio::test]
    async fn records_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let id = format!("2/{}/7", "ab".repeat(32));
        {
            let store = started(dir.path()).await;
            store.store_messages("ethereum", &[message(&id)]).await.unwrap();
            store.store_checkpoint("ethereum", 2, 1050, Some(7)).await.unwrap();
        }
        let store = started(dir.path()).await;
        let stored = store.get_message(&id).await.unwrap().unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.block_number, 1020);
        assert_eq!(
            store.resume_block("ethereum", Some(1000)).await.unwrap(),
            Some(1051)
        );
    }

    #[tokio::test]
    async fn repeated_batches_bump_revision_once_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let store = started(dir.path()).await;
        let batch = vec![message("2/a/1"), message("2/a/2")];
        store.store_messages("ethereum", &batch).await.unwrap();
        store.store_messages("ethereum", &batch).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join(MESSAGES_FILE)).unwrap();
        let rows: Vec<MessageRecord> = serde_json::from_str(&raw).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|m| m.revision == 2));
    }

    #[tokio::test]
    async fn redemption_before_message_keeps_linkage() {
        let dir = tempfile::tempdir().unwrap();
        let store = started(dir.path()).await;
        store.store_redemptions("bsc", &[redemption("2/a/9")]).await.unwrap();
        assert!(store.get_redemption("2/a/9").await.unwrap().is_some());

        store.store_messages("ethereum", &[message("2/a/9")]).await.unwrap();
        let m = store.get_message("2/a/9").await.unwrap().unwrap();
        assert_eq!(m.status, SettlementStatus::Completed);
        assert!(store.get_redemption("2/a/9").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn redemption_settles_existing_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = started(dir.path()).await;
        store.store_messages("ethereum", &[message("2/a/3")]).await.unwrap();
        store.store_redemptions("bsc", &[redemption("2/a/3")]).await.unwrap();

        let reopened = started(dir.path()).await;
        let m = reopened.get_message("2/a/3").await.unwrap().unwrap();
        assert_eq!(m.status, SettlementStatus::Completed);
        assert_eq!(m.revision, 2);
    }

    #[tokio::test]
    async fn checkpoint_never_moves_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let store = started(dir.path()).await;
        store.store_checkpoint("terra", 3, 500, None).await.unwrap();
        let cp = store.store_checkpoint("terra", 3, 400, Some(12)).await.unwrap();
        assert_eq!(cp.last_block, 500);
        assert_eq!(cp.last_sequence, Some(12));
    }

    #[tokio::test]
    async fn legacy_checkpoints_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = r#"[
            {"id": "ethereum", "blockNumber": 1500, "lastSequenceNumber": 42, "chainId": 2,
             "createdAt": "2023-05-01T10:00:00.000Z", "updatedAt": "2023-05-02T10:00:00.000Z"},
            {"_id": "terra", "blockNumber": "9000/2023-05-01T10:00:00.000Z", "lastSequenceNumber": null, "chainId": 3,
             "createdAt": "2023-05-01T10:00:00.000Z", "updatedAt": "2023-05-01T10:00:00.000Z"}
        ]"#;
        std::fs::write(dir.path().join(CHECKPOINTS_FILE), legacy).unwrap();

        let store = started(dir.path()).await;
        let eth = store.load_checkpoint("ethereum").await.unwrap().unwrap();
        assert_eq!(eth.last_block, 1500);
        assert_eq!(eth.last_sequence, Some(42));
        assert_eq!(eth.chain_id, 2);

        let terra = store.load_checkpoint("terra").await.unwrap().unwrap();
        assert_eq!(terra.last_block, 9000);
        assert_eq!(terra.last_sequence, None);
        assert_eq!(store.resume_block("terra", None).await.unwrap(), Some(9001));

        // next write rewrites the document canonically
        store.store_checkpoint("terra", 3, 9100, None).await.unwrap();
        let raw = std::fs::read_to_string(dir.path().join(CHECKPOINTS_FILE)).unwrap();
        assert!(raw.contains("\"lastBlock\": 9100"));
        assert!(!raw.contains("_id"));
    }

    #[tokio::test]
    async fn corrupt_document_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MESSAGES_FILE), "{not json").unwrap();
        let store = JsonStore::new(dir.path());
        assert!(matches!(
            store.start().await,
            Err(WatcherError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("state");
        let store = JsonStore::new(&nested);
        assert!(!store.is_connected().await);
        store.start().await.unwrap();
        assert!(store.is_connected().await);
        assert!(store.checkpoints().await.unwrap().is_empty());
    }
}
