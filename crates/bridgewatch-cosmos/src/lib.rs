//! bridgewatch-cosmos: extractors for CosmWasm chains.
//!
//! - [`direct`]: walks every height through the Tendermint RPC and fetches
//!   each transaction's result.
//! - [`explorer`]: pages through an indexer's transactions for the core
//!   contract, newest first.
//!
//! Both read the same `wasm` event attributes, see [`events`].

pub mod direct;
pub mod events;
pub mod explorer;

pub use direct::{is_ignorable_marshal_error, DirectExtractor, HttpTendermintClient, TendermintClient};
pub use events::{CosmosExtractorConfig, Event, EventAttribute, WasmMessage};
pub use explorer::{ExplorerClient, ExplorerExtractor, HttpExplorerClient};
