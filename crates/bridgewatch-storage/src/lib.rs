//! bridgewatch-storage: persistent backends for the BridgeWatch store contract.
//!
//! Backends:
//! - [`json`]: three JSON documents in a directory, rewritten on every write
//! - [`sqlite`]: SQLite via `sqlx`, one table per record kind
//!
//! The in-memory backend lives in `bridgewatch-core` as
//! [`bridgewatch_core::MemoryStore`].

#[cfg(feature = "json")]
pub mod json;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "json")]
pub use json::JsonStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
