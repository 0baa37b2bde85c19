//! Shared record types for the watcher pipeline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// ─── SettlementStatus ─────────────────────────────────────────────────────────

/// Redemption status of a bridge message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    /// Observed on the origin chain, no destination settlement seen yet.
    #[default]
    Pending,
    /// Settled on the destination chain.
    Completed,
    /// Destination transaction reverted.
    Failed,
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for SettlementStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown settlement status '{other}'")),
        }
    }
}

// ─── MessageRecord ────────────────────────────────────────────────────────────

/// A bridge message observed on its origin chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// `{chain_id}/{emitter}/{sequence}`, see [`crate::codec::message_id`].
    pub id: String,
    pub emitter_chain: u16,
    /// 32-byte emitter address, lowercase hex without `0x`.
    pub emitter_address: String,
    pub sequence: u64,
    pub tx_hash: String,
    pub block_number: u64,
    /// Unsigned wire envelope.
    #[serde(with = "base64_bytes")]
    pub envelope: Vec<u8>,
    /// Transaction sender, empty when the chain does not expose it.
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub status: SettlementStatus,
    pub indexed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// 1 on insert, +1 on every subsequent upsert of the same `id`.
    #[serde(default)]
    pub revision: u32,
}

// ─── RedemptionRecord ─────────────────────────────────────────────────────────

/// Destination-side settlement of a bridge message. Shares `id` with the
/// [`MessageRecord`] it redeems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionRecord {
    pub id: String,
    pub destination_tx: DestinationTx,
    pub indexed_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u32,
}

/// The transaction that settled a message on its destination chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationTx {
    pub chain_id: u16,
    pub tx_hash: String,
    pub status: SettlementStatus,
    /// Contract method that performed the redemption (e.g. `completeTransfer`).
    pub method: String,
    pub from: String,
    pub to: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

// ─── BlockKey ─────────────────────────────────────────────────────────────────

/// Identifies a scanned block: `"{number}/{rfc3339 timestamp}"`.
///
/// Orders by block number first so a [`MessagesByBlock`] map iterates in
/// chain order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockKey {
    pub number: u64,
    pub timestamp: DateTime<Utc>,
}

impl BlockKey {
    pub fn new(number: u64, timestamp: DateTime<Utc>) -> Self {
        Self { number, timestamp }
    }

    /// Parse a `"{number}/{timestamp}"` key.
    pub fn parse(key: &str) -> Option<Self> {
        let (number, ts) = key.split_once('/')?;
        Some(Self {
            number: number.parse().ok()?,
            timestamp: DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc),
        })
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.number,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }
}

/// Block key → message keys found in that block. A block with no bridge
/// messages maps to an empty list (used as a progress marker).
pub type MessagesByBlock = BTreeMap<BlockKey, Vec<String>>;

/// Parse a unix-seconds timestamp into a UTC datetime.
pub fn timestamp_from_secs(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

// ─── serde helpers ────────────────────────────────────────────────────────────

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
