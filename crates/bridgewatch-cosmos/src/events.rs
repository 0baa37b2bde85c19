//! CosmWasm `wasm` event attribute decoding.
//!
//! The bridge core contract emits one `wasm` event per message with
//! `message.*` attributes. Some endpoints return keys and values base64
//! encoded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bridgewatch_core::codec::{message_key, parse_emitter_address, parse_payload_hex};
use bridgewatch_core::types::timestamp_from_secs;
use bridgewatch_core::{AttributeEncoding, ChainConfig, MessageFields, WatcherError};

/// Settings shared by both Cosmos extractors.
#[derive(Debug, Clone)]
pub struct CosmosExtractorConfig {
    pub chain: String,
    pub chain_id: u16,
    /// Core contract bech32 address, lowercase.
    pub core_contract: String,
    pub encoding: AttributeEncoding,
    pub max_batch_size: u64,
    pub concurrency: usize,
}

impl CosmosExtractorConfig {
    pub fn from_chain(chain: &ChainConfig) -> Result<Self, WatcherError> {
        chain.validate()?;
        Ok(Self {
            chain: chain.name.clone(),
            chain_id: chain.chain_id,
            core_contract: chain.core()?.to_lowercase(),
            encoding: chain.attribute_encoding,
            max_batch_size: chain.max_batch_size,
            concurrency: chain.concurrency.max(1),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<EventAttribute>,
}

/// A bridge message read from one `wasm` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WasmMessage {
    pub emitter: String,
    pub sequence: u64,
    pub nonce: u32,
    /// Hex payload, empty when absent.
    pub payload: String,
    pub chain_id: Option<u16>,
    pub block_time: Option<DateTime<Utc>>,
}

impl WasmMessage {
    /// `{tx_hash}:{chain}/{emitter}/{sequence}`.
    pub fn key(&self, tx_hash: &str, default_chain: u16) -> String {
        message_key(
            tx_hash,
            self.chain_id.unwrap_or(default_chain),
            &self.emitter,
            self.sequence,
        )
    }

    /// Codec fields. Chain id and time fall back to the scanning chain and the
    /// block header when the event omits them. Consistency level is always 0.
    pub fn to_fields(
        &self,
        default_chain: u16,
        block_time: DateTime<Utc>,
    ) -> Result<MessageFields, WatcherError> {
        Ok(MessageFields {
            timestamp: self.block_time.unwrap_or(block_time),
            nonce: self.nonce,
            emitter_chain: self.chain_id.unwrap_or(default_chain),
            emitter_address: parse_emitter_address(&self.emitter)?,
            sequence: self.sequence,
            consistency_level: 0,
            payload: parse_payload_hex(&self.payload)?,
        })
    }
}

pub fn decode_attribute(raw: &str, encoding: AttributeEncoding) -> Result<String, WatcherError> {
    match encoding {
        AttributeEncoding::Plain => Ok(raw.to_string()),
        AttributeEncoding::Base64 => {
            let bytes = STANDARD
                .decode(raw)
                .map_err(|e| WatcherError::Decode(format!("attribute '{raw}' is not base64: {e}")))?;
            String::from_utf8(bytes)
                .map_err(|e| WatcherError::Decode(format!("attribute '{raw}' is not UTF-8: {e}")))
        }
    }
}

/// Read a bridge message out of `event` if it is a `wasm` event emitted by
/// `core_contract`. Events from other contracts yield `None`.
pub fn read_wasm_message(
    event: &Event,
    encoding: AttributeEncoding,
    core_contract: &str,
) -> Result<Option<WasmMessage>, WatcherError> {
    if event.kind != "wasm" {
        return Ok(None);
    }

    let mut attributes = Vec::with_capacity(event.attributes.len());
    let mut undecodable = None;
    for attr in &event.attributes {
        match (
            decode_attribute(&attr.key, encoding),
            decode_attribute(&attr.value, encoding),
        ) {
            (Ok(key), Ok(value)) => attributes.push((key.to_lowercase(), value.to_lowercase())),
            (Err(e), _) | (_, Err(e)) => {
                undecodable.get_or_insert(e);
            }
        }
    }

    // Values are only interpreted once the emitting contract is known.
    let is_core = attributes.iter().any(|(key, value)| {
        matches!(key.as_str(), "_contract_address" | "contract_address") && value == core_contract
    });
    if !is_core {
        return Ok(None);
    }
    if let Some(e) = undecodable {
        return Err(e);
    }

    let mut emitter = None;
    let mut sequence = None;
    let mut nonce = 0u32;
    let mut payload = String::new();
    let mut chain_id = None;
    let mut block_time = None;

    for (key, value) in attributes {
        match key.as_str() {
            "message.sender" => emitter = Some(value),
            "message.sequence" => sequence = Some(parse_number::<u64>(&key, &value)?),
            "message.nonce" => nonce = parse_number(&key, &value)?,
            "message.message" => payload = value,
            "message.chain_id" => chain_id = Some(parse_number(&key, &value)?),
            "message.block_time" => {
                let secs: i64 = parse_number(&key, &value)?;
                block_time = Some(timestamp_from_secs(secs).ok_or_else(|| {
                    WatcherError::Decode(format!("block time {secs} out of range"))
                })?);
            }
            _ => {}
        }
    }

    match (emitter, sequence) {
        (Some(emitter), Some(sequence)) if !emitter.is_empty() => Ok(Some(WasmMessage {
            emitter,
            sequence,
            nonce,
            payload,
            chain_id,
            block_time,
        })),
        _ => Err(WatcherError::Decode(
            "core contract event is missing message.sender or message.sequence".into(),
        )),
    }
}

/// Every bridge message in `events`, in event order.
pub fn read_wasm_messages(
    events: &[Event],
    encoding: AttributeEncoding,
    core_contract: &str,
) -> Result<Vec<WasmMessage>, WatcherError> {
    let mut out = Vec::new();
    for event in events {
        if let Some(m) = read_wasm_message(event, encoding, core_contract)? {
            out.push(m);
        }
    }
    Ok(out)
}

/// Parse an RFC 3339 block time.
pub fn parse_block_time(s: &str) -> Result<DateTime<Utc>, WatcherError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| WatcherError::Decode(format!("invalid block time '{s}': {e}")))
}

/// Parse a decimal height string.
pub fn parse_height(s: &str) -> Result<u64, WatcherError> {
    s.trim()
        .parse()
        .map_err(|_| WatcherError::Decode(format!("invalid block height '{s}'")))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, WatcherError> {
    value
        .trim()
        .parse()
        .map_err(|_| WatcherError::Decode(format!("attribute {key}='{value}' is not a number")))
}
