//! Store contract: checkpoints plus idempotent message/redemption upserts.
//!
//! Every backend applies the merge rules below ([`merge_message`],
//! [`merge_redemption`], [`settle_message`], [`advance_checkpoint`]).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WatcherError;
use crate::types::{MessageRecord, RedemptionRecord, SettlementStatus};

/// Persisted scan position of one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Registry name (e.g. `"ethereum"`).
    pub chain: String,
    pub chain_id: u16,
    /// Last fully persisted block.
    pub last_block: u64,
    /// Highest sequence seen from this chain's own emitters.
    #[serde(default)]
    pub last_sequence: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Where the next scan starts.
    pub fn resume_block(&self) -> u64 {
        self.last_block.saturating_add(1)
    }
}

/// Persistence contract shared by every backend.
///
/// All methods take `&self`: one store instance is shared by every chain
/// worker and serializes writes internally.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Open connections / load files.
    async fn start(&self) -> Result<(), WatcherError> {
        Ok(())
    }

    /// Flush and release resources.
    async fn stop(&self) -> Result<(), WatcherError> {
        Ok(())
    }

    /// Health check.
    async fn is_connected(&self) -> bool;

    async fn load_checkpoint(&self, chain: &str) -> Result<Option<Checkpoint>, WatcherError>;

    /// Every stored checkpoint, ordered by chain name.
    async fn checkpoints(&self) -> Result<Vec<Checkpoint>, WatcherError>;

    /// Upsert messages one by one. Records before a failing one stay written.
    async fn store_messages(
        &self,
        chain: &str,
        records: &[MessageRecord],
    ) -> Result<(), WatcherError>;

    /// Upsert redemptions, back-propagating status onto matching messages.
    async fn store_redemptions(
        &self,
        chain: &str,
        records: &[RedemptionRecord],
    ) -> Result<(), WatcherError>;

    /// Advance the chain's checkpoint. Never lowers a stored block.
    async fn store_checkpoint(
        &self,
        chain: &str,
        chain_id: u16,
        last_block: u64,
        last_sequence: Option<u64>,
    ) -> Result<Checkpoint, WatcherError>;

    async fn get_message(&self, id: &str) -> Result<Option<MessageRecord>, WatcherError>;

    async fn get_redemption(&self, id: &str) -> Result<Option<RedemptionRecord>, WatcherError>;

    /// Resume point: `last_block + 1`, else `initial_block`, else `None`.
    async fn resume_block(
        &self,
        chain: &str,
        initial_block: Option<u64>,
    ) -> Result<Option<u64>, WatcherError> {
        Ok(match self.load_checkpoint(chain).await? {
            Some(cp) => Some(cp.resume_block()),
            None => initial_block,
        })
    }
}

// ─── Merge rules ──────────────────────────────────────────────────────────────

/// Upsert rule for a message.
///
/// Insert: revision 1, status inherited from an already stored redemption.
/// Update: keep the stored record, refresh `updated_at`, bump `revision`.
pub fn merge_message(
    existing: Option<&MessageRecord>,
    incoming: &MessageRecord,
    redeemed: Option<SettlementStatus>,
    now: DateTime<Utc>,
) -> MessageRecord {
    match existing {
        Some(stored) => {
            let mut merged = stored.clone();
            merged.updated_at = Some(now);
            merged.revision = stored.revision.saturating_add(1).max(1);
            merged
        }
        None => {
            let mut inserted = incoming.clone();
            if let Some(status) = redeemed {
                inserted.status = status;
            }
            inserted.created_at = Some(now);
            inserted.updated_at = Some(now);
            inserted.revision = 1;
            inserted
        }
    }
}

/// Upsert rule for a redemption: insert at revision 1, otherwise overwrite
/// `method`/`status`, refresh `updated_at` and bump `revision`.
pub fn merge_redemption(
    existing: Option<&RedemptionRecord>,
    incoming: &RedemptionRecord,
    now: DateTime<Utc>,
) -> RedemptionRecord {
    match existing {
        Some(stored) => {
            let mut merged = stored.clone();
            merged.destination_tx.method = incoming.destination_tx.method.clone();
            merged.destination_tx.status = incoming.destination_tx.status;
            merged.destination_tx.updated_at = Some(now);
            merged.revision = stored.revision.saturating_add(1).max(1);
            merged
        }
        None => {
            let mut inserted = incoming.clone();
            inserted.revision = 1;
            inserted
        }
    }
}

/// Apply a redemption's status to the message it settles.
pub fn settle_message(message: &mut MessageRecord, status: SettlementStatus, now: DateTime<Utc>) {
    message.status = status;
    message.updated_at = Some(now);
    message.revision = message.revision.saturating_add(1);
}

/// Build the next checkpoint. A lower `last_block` than the stored one is
/// ignored, the stored block wins.
pub fn advance_checkpoint(
    existing: Option<&Checkpoint>,
    chain: &str,
    chain_id: u16,
    last_block: u64,
    last_sequence: Option<u64>,
    now: DateTime<Utc>,
) -> Checkpoint {
    match existing {
        Some(stored) => Checkpoint {
            chain: chain.to_string(),
            chain_id,
            last_block: stored.last_block.max(last_block),
            last_sequence: last_sequence.or(stored.last_sequence),
            created_at: stored.created_at,
            updated_at: now,
        },
        None => Checkpoint {
            chain: chain.to_string(),
            chain_id,
            last_block,
            last_sequence,
            created_at: now,
            updated_at: now,
        },
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

#[derive(Default)]
struct Tables {
    messages: HashMap<String, MessageRecord>,
    redemptions: HashMap<String, RedemptionRecord>,
    checkpoints: HashMap<String, Checkpoint>,
}

/// In-memory store for tests and ephemeral runs. All data is lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_count(&self) -> usize {
        self.tables.lock().unwrap().messages.len()
    }

    pub fn redemption_count(&self) -> usize {
        self.tables.lock().unwrap().redemptions.len()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn is_connected(&self) -> bool {
        true
    }

    async fn load_checkpoint(&self, chain: &str) -> Result<Option<Checkpoint>, WatcherError> {
        Ok(self.tables.lock().unwrap().checkpoints.get(chain).cloned())
    }

    async fn checkpoints(&self) -> Result<Vec<Checkpoint>, WatcherError> {
        let mut all: Vec<Checkpoint> =
            self.tables.lock().unwrap().checkpoints.values().cloned().collect();
        all.sort_by(|a, b| a.chain.cmp(&b.chain));
        Ok(all)
    }

    async fn store_messages(
        &self,
        _chain: &str,
        records: &[MessageRecord],
    ) -> Result<(), WatcherError> {
        let now = Utc::now();
        let mut tables = self.tables.lock().unwrap();
        for record in records {
            let redeemed = tables
                .redemptions
                .get(&record.id)
                .map(|r| r.destination_tx.status);
            let merged = merge_message(tables.messages.get(&record.id), record, redeemed, now);
            tables.messages.insert(record.id.clone(), merged);
        }
        Ok(())
    }

    async fn store_redemptions(
        &self,
        _chain: &str,
        records: &[RedemptionRecord],
    ) -> Result<(), WatcherError> {
        let now = Utc::now();
        let mut tables = self.tables.lock().unwrap();
        for record in records {
            if let Some(message) = tables.messages.get_mut(&record.id) {
                settle_message(message, record.destination_tx.status, now);
            }
            let merged = merge_redemption(tables.redemptions.get(&record.id), record, now);
            tables.redemptions.insert(record.id.clone(), merged);
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
        let mut tables = self.tables.lock().unwrap();
        let cp = advance_checkpoint(
            tables.checkpoints.get(chain),
            chain,
            chain_id,
            last_block,
            last_sequence,
            Utc::now(),
        );
        tables.checkpoints.insert(chain.to_string(), cp.clone());
        Ok(cp)
    }

    async fn get_message(&self, id: &str) -> Result<Option<MessageRecord>, WatcherError> {
        Ok(self.tables.lock().unwrap().messages.get(id).cloned())
    }

    async fn get_redemption(&self, id: &str) -> Result<Option<RedemptionRecord>, WatcherError> {
        Ok(self.tables.lock().unwrap().redemptions.get(id).cloned())
    }
}
