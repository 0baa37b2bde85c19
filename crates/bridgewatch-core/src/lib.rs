//! bridgewatch-core: foundation for the multi-chain bridge message watcher.
//!
//! # Architecture
//!
//! ```text
//! Watcher (one per chain)
//!     ├── ChainExtractor   (EVM logs / Cosmos blocks / Cosmos indexer)
//!     ├── MessageStore     (checkpoints + idempotent record upserts)
//!     └── Notifier         (best-effort fan-out of new records)
//! ```

pub mod chain;
pub mod codec;
pub mod cursor;
pub mod error;
pub mod extractor;
pub mod notifier;
pub mod store;
pub mod types;
pub mod watcher;

pub use chain::{AttributeEncoding, ChainConfig, ChainFamily, ChainRegistry, Finality, Network};
pub use codec::{MessageEnvelope, MessageFields};
pub use cursor::BlockRange;
pub use error::WatcherError;
pub use extractor::ChainExtractor;
pub use notifier::{NoopNotifier, NotificationInput, Notifier, PublishOutcome, PublishStatus};
pub use store::{Checkpoint, MemoryStore, MessageStore};
pub use types::{BlockKey, MessageRecord, MessagesByBlock, RedemptionRecord, SettlementStatus};
pub use watcher::{CycleOutcome, Watcher, WatcherConfig};
