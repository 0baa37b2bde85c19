//! Message codec: the unsigned wire envelope and the derived record keys.
//!
//! Envelope layout (big-endian):
//!
//! ```text
//! version u8 (=1) | guardian_set_index u32 (=0) | signature_count u8 (=0)
//! body: timestamp u32 | nonce u32 | emitter_chain u16 | emitter_address [u8; 32]
//!       | sequence u64 | consistency_level u8 | payload ...
//! ```

use chrono::{DateTime, Utc};
use tiny_keccak::{Hasher, Keccak};

use crate::error::WatcherError;
use crate::types::{MessageRecord, SettlementStatus};

pub const ENVELOPE_VERSION: u8 = 1;
/// Byte offset of the body in an unsigned envelope.
pub const UNSIGNED_HEADER_LEN: usize = 6;

/// Decoded per-chain fields of one bridge message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFields {
    pub timestamp: DateTime<Utc>,
    pub nonce: u32,
    pub emitter_chain: u16,
    pub emitter_address: [u8; 32],
    pub sequence: u64,
    pub consistency_level: u8,
    pub payload: Vec<u8>,
}

impl MessageFields {
    /// Lowercase hex of the padded emitter address.
    pub fn emitter_hex(&self) -> String {
        hex::encode(self.emitter_address)
    }

    pub fn id(&self) -> String {
        message_id(self.emitter_chain, &self.emitter_address, self.sequence)
    }

    /// Build the normalized record for this message. Revision is left at 0;
    /// the store assigns it.
    pub fn into_record(
        self,
        tx_hash: impl Into<String>,
        block_number: u64,
        sender: impl Into<String>,
    ) -> MessageRecord {
        let envelope = MessageEnvelope::unsigned(&self).into_bytes();
        MessageRecord {
            id: self.id(),
            emitter_chain: self.emitter_chain,
            emitter_address: self.emitter_hex(),
            sequence: self.sequence,
            tx_hash: tx_hash.into(),
            block_number,
            envelope,
            sender: sender.into(),
            status: SettlementStatus::Pending,
            indexed_at: self.timestamp,
            created_at: None,
            updated_at: None,
            revision: 0,
        }
    }
}

/// A serialized message envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    bytes: Vec<u8>,
}

impl MessageEnvelope {
    /// Serialize an envelope carrying no signatures.
    pub fn unsigned(fields: &MessageFields) -> Self {
        let mut bytes = Vec::with_capacity(UNSIGNED_HEADER_LEN + 51 + fields.payload.len());
        bytes.push(ENVELOPE_VERSION);
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&encode_body(fields));
        Self { bytes }
    }

    pub fn body(&self) -> &[u8] {
        &self.bytes[UNSIGNED_HEADER_LEN..]
    }

    /// keccak256(keccak256(body)), the digest signers attest to.
    pub fn digest(&self) -> [u8; 32] {
        keccak256(&keccak256(self.body()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

fn encode_body(fields: &MessageFields) -> Vec<u8> {
    // Timestamps past 2106 do not fit the wire format; clamp rather than wrap.
    let ts = fields.timestamp.timestamp().clamp(0, u32::MAX as i64) as u32;
    let mut body = Vec::with_capacity(51 + fields.payload.len());
    body.extend_from_slice(&ts.to_be_bytes());
    body.extend_from_slice(&fields.nonce.to_be_bytes());
    body.extend_from_slice(&fields.emitter_chain.to_be_bytes());
    body.extend_from_slice(&fields.emitter_address);
    body.extend_from_slice(&fields.sequence.to_be_bytes());
    body.push(fields.consistency_level);
    body.extend_from_slice(&fields.payload);
    body
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}

// ─── Keys ─────────────────────────────────────────────────────────────────────

/// Derived record id: `"{chain_id}/{emitter_hex}/{sequence}"`.
pub fn message_id(emitter_chain: u16, emitter_address: &[u8; 32], sequence: u64) -> String {
    format!("{emitter_chain}/{}/{sequence}", hex::encode(emitter_address))
}

/// Lightweight per-transaction key: `"{tx_hash}:{chain_id}/{emitter}/{sequence}"`.
pub fn message_key(tx_hash: &str, emitter_chain: u16, emitter: &str, sequence: u64) -> String {
    format!("{tx_hash}:{emitter_chain}/{emitter}/{sequence}")
}

/// Parse a hex address (optional `0x`, at most 32 bytes) and left-pad it to 32 bytes.
pub fn parse_emitter_address(s: &str) -> Result<[u8; 32], WatcherError> {
    let raw = s.trim();
    let raw = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    let padded = if raw.len() % 2 == 1 {
        format!("0{raw}")
    } else {
        raw.to_string()
    };
    let bytes =
        hex::decode(&padded).map_err(|e| WatcherError::Decode(format!("emitter '{s}': {e}")))?;
    if bytes.len() > 32 {
        return Err(WatcherError::Decode(format!(
            "emitter '{s}' is {} bytes, expected at most 32",
            bytes.len()
        )));
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

/// Decode a hex payload, tolerating a `0x` prefix and an empty string.
pub fn parse_payload_hex(s: &str) -> Result<Vec<u8>, WatcherError> {
    let raw = s.trim().trim_start_matches("0x");
    hex::decode(raw).map_err(|e| WatcherError::Decode(format!("payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::timestamp_from_secs;

    fn fields() -> MessageFields {
        MessageFields {
            timestamp: timestamp_from_secs(1_700_000_000).unwrap(),
            nonce: 42,
            emitter_chain: 3,
            emitter_address: parse_emitter_address("0xabc").unwrap(),
            sequence: 7,
            consistency_level: 0,
            payload: vec![0xde, 0xad],
        }
    }

    #[test]
    fn emitter_is_left_padded() {
        let addr = parse_emitter_address("0xabc").unwrap();
        assert_eq!(&addr[..30], &[0u8; 30]);
        assert_eq!(&addr[30..], &[0x0a, 0xbc]);
    }

    #[test]
    fn emitter_longer_than_32_bytes_is_rejected() {
        let long = "ab".repeat(33);
        assert!(parse_emitter_address(&long).is_err());
        assert!(parse_emitter_address("terra1xyz").is_err());
    }

    #[test]
    fn unsigned_envelope_layout() {
        let env = MessageEnvelope::unsigned(&fields());
        let b = env.as_bytes();
        assert_eq!(b[0], ENVELOPE_VERSION);
        assert_eq!(&b[1..5], &[0, 0, 0, 0]);
        assert_eq!(b[5], 0);

        let body = env.body();
        assert_eq!(&body[0..4], &1_700_000_000u32.to_be_bytes());
        assert_eq!(&body[4..8], &42u32.to_be_bytes());
        assert_eq!(&body[8..10], &3u16.to_be_bytes());
        assert_eq!(&body[10..40], &[0u8; 30]);
        assert_eq!(&body[40..42], &[0x0a, 0xbc]);
        assert_eq!(&body[42..50], &7u64.to_be_bytes());
        assert_eq!(body[50], 0);
        assert_eq!(&body[51..], &[0xde, 0xad]);
        assert_eq!(b.len(), UNSIGNED_HEADER_LEN + 51 + 2);
    }

    #[test]
    fn digest_depends_on_body() {
        let a = MessageEnvelope::unsigned(&fields());
        let mut other = fields();
        other.payload.push(0);
        let b = MessageEnvelope::unsigned(&other);
        assert_eq!(a.digest(), MessageEnvelope::unsigned(&fields()).digest());
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn id_is_deterministic_per_chain_emitter_sequence() {
        let f = fields();
        assert_eq!(
            f.id(),
            format!("3/{}0abc/7", "0".repeat(60))
        );
        // payload and nonce do not participate in the id
        let mut g = fields();
        g.payload = vec![1, 2, 3];
        g.nonce = 0;
        assert_eq!(f.id(), g.id());
    }

    #[test]
    fn record_carries_envelope_and_key_fields() {
        let record = fields().into_record("ABCD", 1020, "");
        assert_eq!(record.emitter_chain, 3);
        assert_eq!(record.sequence, 7);
        assert_eq!(record.block_number, 1020);
        assert_eq!(record.revision, 0);
        assert_eq!(record.envelope, MessageEnvelope::unsigned(&fields()).into_bytes());
    }

    #[test]
    fn message_key_format() {
        assert_eq!(message_key("AB", 3, "00ff", 9), "AB:3/00ff/9");
    }
}
