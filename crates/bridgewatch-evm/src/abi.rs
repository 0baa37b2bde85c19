//! Event topics, method selectors and ABI decoding for the bridge contracts.

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{keccak256, Selector, B256, U256};
use bridgewatch_core::WatcherError;

pub const LOG_MESSAGE_PUBLISHED: &str = "LogMessagePublished(address,uint64,uint32,bytes,uint8)";
pub const TRANSFER_REDEEMED: &str = "TransferRedeemed(uint16,bytes32,uint64)";

/// Token bridge entry points that complete a transfer.
pub const REDEEM_METHODS: [&str; 4] = [
    "completeTransfer(bytes)",
    "completeTransferWithPayload(bytes)",
    "completeTransferAndUnwrapETH(bytes)",
    "completeTransferAndUnwrapETHWithPayload(bytes)",
];

/// `0x`-prefixed lowercase topic hash of an event signature.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

/// First four bytes of the signature hash.
pub fn selector(signature: &str) -> Selector {
    Selector::from_slice(&keccak256(signature.as_bytes())[..4])
}

/// Name of the redeem method called by `input`, `"unknown"` otherwise.
pub fn redeem_method(input: &str) -> String {
    let Ok(bytes) = decode_hex(input) else {
        return "unknown".into();
    };
    let Some(called) = bytes.get(..4) else {
        return "unknown".into();
    };
    REDEEM_METHODS
        .iter()
        .find(|sig| selector(sig).as_slice() == called)
        .and_then(|sig| sig.split('(').next())
        .unwrap_or("unknown")
        .to_string()
}

pub fn decode_hex(s: &str) -> Result<Vec<u8>, WatcherError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| WatcherError::Decode(format!("invalid hex '{s}': {e}")))
}

/// Non-indexed `LogMessagePublished` parameters, in log data order.
fn published_data_type() -> DynSolType {
    DynSolType::Tuple(vec![
        DynSolType::Uint(64),
        DynSolType::Uint(32),
        DynSolType::Bytes,
        DynSolType::Uint(8),
    ])
}

/// Decoded `LogMessagePublished` (sender is the indexed topic).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub sender: [u8; 32],
    pub sequence: u64,
    pub nonce: u32,
    pub payload: Vec<u8>,
    pub consistency_level: u8,
}

impl PublishedMessage {
    pub fn decode(topics: &[String], data: &str) -> Result<Self, WatcherError> {
        let sender = topic_word(topics, 1)?;
        let data = decode_hex(data)?;

        // Log data is a parameter sequence, not a single encoded tuple.
        let decoded = published_data_type()
            .abi_decode_params(&data)
            .map_err(|e| WatcherError::Decode(format!("LogMessagePublished data: {e}")))?;
        let values = match decoded {
            DynSolValue::Tuple(vals) => vals,
            other => vec![other],
        };
        let [sequence, nonce, payload, consistency_level] = values.as_slice() else {
            return Err(WatcherError::Decode(format!(
                "LogMessagePublished data has {} fields, expected 4",
                values.len()
            )));
        };

        Ok(Self {
            sender: sender.0,
            sequence: uint_field(sequence, "sequence")?,
            nonce: uint_field(nonce, "nonce")?,
            payload: payload
                .as_bytes()
                .ok_or_else(|| WatcherError::Decode("payload is not bytes".into()))?
                .to_vec(),
            consistency_level: uint_field(consistency_level, "consistency level")?,
        })
    }
}

/// Decoded `TransferRedeemed`; every field is indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemedTransfer {
    pub emitter_chain: u16,
    pub emitter_address: [u8; 32],
    pub sequence: u64,
}

impl RedeemedTransfer {
    pub fn decode(topics: &[String]) -> Result<Self, WatcherError> {
        let chain = topic_word(topics, 1)?;
        let emitter_address = topic_word(topics, 2)?;
        let sequence = topic_word(topics, 3)?;
        Ok(Self {
            emitter_chain: narrow(U256::from_be_bytes(chain.0), "emitter chain")?,
            emitter_address: emitter_address.0,
            sequence: narrow(U256::from_be_bytes(sequence.0), "sequence")?,
        })
    }
}

fn topic_word(topics: &[String], i: usize) -> Result<B256, WatcherError> {
    let topic = topics
        .get(i)
        .ok_or_else(|| WatcherError::Decode(format!("log is missing topic {i}")))?;
    topic
        .parse::<B256>()
        .map_err(|e| WatcherError::Decode(format!("topic {i} '{topic}': {e}")))
}

fn uint_field<T: TryFrom<U256>>(value: &DynSolValue, name: &str) -> Result<T, WatcherError> {
    let (n, _) = value
        .as_uint()
        .ok_or_else(|| WatcherError::Decode(format!("{name} is not an unsigned integer")))?;
    narrow(n, name)
}

fn narrow<T: TryFrom<U256>>(n: U256, name: &str) -> Result<T, WatcherError> {
    T::try_from(n).map_err(|_| {
        WatcherError::Decode(format!(
            "{name} {n} does not fit in {} bits",
            std::mem::size_of::<T>() * 8
        ))
    })
}
