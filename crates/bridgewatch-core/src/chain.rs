//! Chain registry: supported chains and their per-network settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::WatcherError;

/// Extraction family of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChainFamily {
    /// Account/log model: `eth_getLogs` over the core contract.
    Evm,
    /// Cosmos chain queried block by block through its Tendermint RPC.
    CosmosRpc,
    /// Cosmos chain queried through a paginated transaction indexer.
    CosmosIndexer,
}

impl std::fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Evm => write!(f, "evm"),
            Self::CosmosRpc => write!(f, "cosmos-rpc"),
            Self::CosmosIndexer => write!(f, "cosmos-indexer"),
        }
    }
}

/// Network environment; selects the initial-deployment block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl std::str::FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            other => Err(format!("unknown network '{other}'")),
        }
    }
}

/// How a chain's finalized height is derived from its head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "depth")]
pub enum Finality {
    /// Ask the node for its `finalized` block.
    Tag,
    /// Head minus a fixed number of confirmations.
    Depth(u64),
    /// Consensus height is final (Tendermint).
    Instant,
}

impl Finality {
    /// Apply this rule to a raw head height.
    pub fn finalized_from_head(&self, head: u64) -> u64 {
        match self {
            Self::Depth(depth) => head.saturating_sub(*depth),
            Self::Tag | Self::Instant => head,
        }
    }
}

/// Encoding of Cosmos event attribute keys and values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeEncoding {
    #[default]
    Plain,
    Base64,
}

/// Resolved configuration of one chain for the active network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: u16,
    pub family: ChainFamily,
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// Bridge core contract emitting messages.
    #[serde(default)]
    pub core_contract: Option<String>,
    /// Token bridge emitting redemption events (EVM only).
    #[serde(default)]
    pub token_bridge: Option<String>,
    #[serde(default)]
    pub initial_block_mainnet: Option<u64>,
    #[serde(default)]
    pub initial_block_testnet: Option<u64>,
    #[serde(default = "default_rps")]
    pub requests_per_second: f64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub max_batch_size: u64,
    #[serde(default = "default_finality")]
    pub finality: Finality,
    /// Largest block span per `eth_getLogs` call.
    #[serde(default = "default_batch_size")]
    pub max_log_range: u64,
    /// Parallel RPC calls within one range scan.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub attribute_encoding: AttributeEncoding,
}

fn default_rps() -> f64 {
    5.0
}
fn default_poll_interval_ms() -> u64 {
    10_000
}
fn default_batch_size() -> u64 {
    100
}
fn default_finality() -> Finality {
    Finality::Instant
}
fn default_concurrency() -> usize {
    4
}

impl ChainConfig {
    /// A config with defaults for everything but identity and family.
    pub fn new(name: impl Into<String>, chain_id: u16, family: ChainFamily) -> Self {
        Self {
            name: name.into(),
            chain_id,
            family,
            rpc_url: None,
            core_contract: None,
            token_bridge: None,
            initial_block_mainnet: None,
            initial_block_testnet: None,
            requests_per_second: default_rps(),
            poll_interval_ms: default_poll_interval_ms(),
            max_batch_size: default_batch_size(),
            finality: default_finality(),
            max_log_range: default_batch_size(),
            concurrency: default_concurrency(),
            attribute_encoding: AttributeEncoding::Plain,
        }
    }

    /// The initial-deployment block for `network`.
    pub fn initial_block(&self, network: Network) -> Option<u64> {
        match network {
            Network::Mainnet => self.initial_block_mainnet,
            Network::Testnet => self.initial_block_testnet,
        }
    }

    /// Reject configurations a worker cannot run with.
    pub fn validate(&self) -> Result<(), WatcherError> {
        if self.rpc_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
            return Err(WatcherError::config(&self.name, "RPC URL is not defined"));
        }
        if self.core_contract.as_deref().map_or(true, |c| c.trim().is_empty()) {
            return Err(WatcherError::config(&self.name, "core contract is not defined"));
        }
        if self.requests_per_second <= 0.0 {
            return Err(WatcherError::config(&self.name, "requests_per_second must be positive"));
        }
        if self.max_batch_size == 0 {
            return Err(WatcherError::config(&self.name, "max_batch_size must be positive"));
        }
        Ok(())
    }

    /// RPC URL after validation.
    pub fn rpc(&self) -> Result<&str, WatcherError> {
        self.rpc_url
            .as_deref()
            .ok_or_else(|| WatcherError::config(&self.name, "RPC URL is not defined"))
    }

    /// Core contract address after validation.
    pub fn core(&self) -> Result<&str, WatcherError> {
        self.core_contract
            .as_deref()
            .ok_or_else(|| WatcherError::config(&self.name, "core contract is not defined"))
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────

/// Supported chains for one network environment.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    network: Network,
    chains: BTreeMap<String, ChainConfig>,
}

impl ChainRegistry {
    /// An empty registry.
    pub fn empty(network: Network) -> Self {
        Self {
            network,
            chains: BTreeMap::new(),
        }
    }

    /// The built-in chain table. RPC URLs are never built in.
    pub fn builtin(network: Network) -> Self {
        let mut registry = Self::empty(network);
        for chain in builtin_chains(network) {
            registry.insert(chain);
        }
        registry
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Add or replace a chain.
    pub fn insert(&mut self, chain: ChainConfig) {
        self.chains.insert(chain.name.clone(), chain);
    }

    pub fn get(&self, name: &str) -> Option<&ChainConfig> {
        self.chains.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ChainConfig> {
        self.chains.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.values()
    }

    /// Resolve and validate the chains to run. Unknown names and invalid
    /// configurations are errors; nothing is skipped silently.
    pub fn enabled(&self, names: &[String]) -> Result<Vec<ChainConfig>, WatcherError> {
        names
            .iter()
            .map(|name| {
                let chain = self
                    .get(name)
                    .ok_or_else(|| WatcherError::config(name, "chain is not in the registry"))?;
                chain.validate()?;
                Ok(chain.clone())
            })
            .collect()
    }
}

fn evm(
    name: &str,
    chain_id: u16,
    core: Option<&str>,
    token_bridge: Option<&str>,
    initial_mainnet: Option<u64>,
    finality: Finality,
) -> ChainConfig {
    let mut c = ChainConfig::new(name, chain_id, ChainFamily::Evm);
    c.core_contract = core.map(str::to_string);
    c.token_bridge = token_bridge.map(str::to_string);
    c.initial_block_mainnet = initial_mainnet;
    c.finality = finality;
    c.max_log_range = 1_000;
    c
}

fn builtin_chains(network: Network) -> Vec<ChainConfig> {
    let mainnet = network == Network::Mainnet;
    let pick = |m: &'static str, t: Option<&'static str>| if mainnet { Some(m) } else { t };

    let ethereum = evm(
        "ethereum",
        2,
        pick("0x98f3c9e6E3fAce36bAAd05FE09d375Ef1464288B", Some("0x4a8bc80Ed5a4067f1CCf107057b8270E0cC11A78")),
        pick("0x3ee18B2214AFF97000D974cf647E7C347E8fa585", Some("0xDB5492265f6038831E89f495670FF909aDe94bd9")),
        Some(12_959_638),
        Finality::Tag,
    );
    let bsc = evm(
        "bsc",
        4,
        pick("0x98f3c9e6E3fAce36bAAd05FE09d375Ef1464288B", None),
        pick("0xB6F6D86a8f9879A9c87f643768d9efc38c1Da6E7", None),
        Some(9_745_450),
        Finality::Depth(15),
    );
    let polygon = evm(
        "polygon",
        5,
        pick("0x7A4B5a56256163F07b2C80A7cA55aBE66c4ec4d7", None),
        pick("0x5a58505a96D1dbf8dF91cB21B54419FC36e93fdE", None),
        Some(20_629_146),
        Finality::Tag,
    );

    let mut terra = ChainConfig::new("terra", 3, ChainFamily::CosmosIndexer);
    terra.core_contract = pick("terra1dq03ugtd40zu9hcgdzrsq6z2z4hwhc9tqk2uy5", None).map(str::to_string);
    terra.initial_block_mainnet = Some(4_810_000);
    // Pagination bounds work per call, not the block count.
    terra.max_batch_size = 100_000;
    terra.finality = Finality::Instant;

    vec![ethereum, bsc, polygon, terra]
}
