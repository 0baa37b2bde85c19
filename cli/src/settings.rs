//! `bridgewatch.yaml` settings plus environment overrides.
//!
//! ```yaml
//! network: mainnet
//! chains: [ethereum, terra]
//! store:
//!   kind: sqlite
//!   path: ./bridgewatch.db
//! notifier:
//!   url: https://events.example.org/topics/bridge
//! logging:
//!   level: info
//!   json: false
//! overrides:
//!   ethereum:
//!     rpc_url: https://eth.example.org
//!     requests_per_second: 10
//! custom_chains:
//!   - name: injective
//!     chain_id: 19
//!     family: cosmos-rpc
//!     rpc_url: https://tm.injective.example.org
//!     core_contract: inj17p9rzwnnfxcjp32un9ug7yhhzgtkhvl9l2q74d
//!     initial_block_mainnet: 24905509
//! ```
//!
//! Environment variables take precedence over the file:
//! `BRIDGEWATCH_NETWORK`, `BRIDGEWATCH_CHAINS` (comma list) and
//! `<CHAIN>_RPC` (e.g. `ETHEREUM_RPC`) for each registry chain.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use bridgewatch_core::{AttributeEncoding, ChainConfig, ChainRegistry, Finality, Network};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub network: Network,
    /// Chains to run. Chains not listed are never started.
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub notifier: NotifierSettings,
    #[serde(default)]
    pub logging: LogSettings,
    /// Per-chain changes to the built-in registry entries.
    #[serde(default)]
    pub overrides: BTreeMap<String, ChainOverride>,
    /// Chains that are not built in.
    #[serde(default)]
    pub custom_chains: Vec<ChainConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            network: Network::default(),
            chains: Vec::new(),
            store: StoreSettings::default(),
            notifier: NotifierSettings::default(),
            logging: LogSettings::default(),
            overrides: BTreeMap::new(),
            custom_chains: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Json,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub kind: StoreKind,
    /// Directory for `json`, database file for `sqlite`.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierSettings {
    /// Topic endpoint. Notifications are dropped when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_notify_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_notify_timeout_ms() -> u64 {
    10_000
}

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

/// Optional replacements for a registry entry's fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainOverride {
    pub rpc_url: Option<String>,
    pub core_contract: Option<String>,
    pub token_bridge: Option<String>,
    pub initial_block_mainnet: Option<u64>,
    pub initial_block_testnet: Option<u64>,
    pub requests_per_second: Option<f64>,
    pub poll_interval_ms: Option<u64>,
    pub max_batch_size: Option<u64>,
    pub finality: Option<Finality>,
    pub max_log_range: Option<u64>,
    pub concurrency: Option<usize>,
    pub attribute_encoding: Option<AttributeEncoding>,
}

impl ChainOverride {
    fn apply(&self, chain: &mut ChainConfig) {
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(v) = &self.$field { chain.$field = v.clone().into(); })*
            };
        }
        set!(rpc_url, core_contract, token_bridge, initial_block_mainnet, initial_block_testnet);
        set!(requests_per_second, poll_interval_ms, max_batch_size, finality, max_log_range);
        set!(concurrency, attribute_encoding);
    }
}

impl Settings {
    /// Read `path` (defaults when `None`) and apply the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("reading settings file {}", p.display()))?;
                Self::from_yaml(&raw)
                    .with_context(|| format!("parsing settings file {}", p.display()))?
            }
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply environment overrides read through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(network) = var("BRIDGEWATCH_NETWORK") {
            self.network = network
                .parse()
                .map_err(|e: String| anyhow::anyhow!("BRIDGEWATCH_NETWORK: {e}"))?;
        }
        if let Some(chains) = var("BRIDGEWATCH_CHAINS") {
            self.chains = chains
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
        }

        let names: Vec<String> = ChainRegistry::builtin(self.network)
            .iter()
            .map(|c| c.name.clone())
            .chain(self.custom_chains.iter().map(|c| c.name.clone()))
            .collect();
        for name in names {
            if let Some(url) = var(&rpc_env_var(&name)) {
                self.overrides.entry(name).or_default().rpc_url = Some(url);
            }
        }
        Ok(())
    }

    /// Built-in chains, then custom chains, then overrides.
    pub fn registry(&self) -> Result<ChainRegistry> {
        let mut registry = ChainRegistry::builtin(self.network);
        for chain in &self.custom_chains {
            registry.insert(chain.clone());
        }
        for (name, patch) in &self.overrides {
            let chain = registry
                .get_mut(name)
                .with_context(|| format!("override for unknown chain '{name}'"))?;
            patch.apply(chain);
        }
        Ok(registry)
    }
}

/// `ethereum` → `ETHEREUM_RPC`.
pub fn rpc_env_var(chain: &str) -> String {
    format!("{}_RPC", chain.to_uppercase().replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridgewatch_core::ChainFamily;

    const SAMPLE: &str = r#"
network: testnet
chains: [ethereum]
store:
  kind: sqlite
  path: /var/lib/bridgewatch/state.db
overrides:
  ethereum:
    rpc_url: https://sepolia.example.org
    finality: { kind: depth, depth: 32 }
custom_chains:
  - name: injective
    chain_id: 19
    family: cosmos-rpc
    rpc_url: https://tm.example.org
    core_contract: inj1core
    attribute_encoding: base64
"#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_file_gives_defaults() {
        let s = Settings::from_yaml("").unwrap();
        assert_eq!(s.network, Network::Mainnet);
        assert_eq!(s.store.kind, StoreKind::Json);
        assert_eq!(s.logging.level, "info");
        assert!(s.notifier.url.is_none());
    }

    #[test]
    fn file_overrides_and_custom_chains_reach_registry() {
        let s = Settings::from_yaml(SAMPLE).unwrap();
        assert_eq!(s.store.kind, StoreKind::Sqlite);

        let registry = s.registry().unwrap();
        let eth = registry.get("ethereum").unwrap();
        assert_eq!(eth.rpc_url.as_deref(), Some("https://sepolia.example.org"));
        assert_eq!(eth.finality, Finality::Depth(32));
        assert_eq!(eth.initial_block_testnet, None);

        let inj = registry.get("injective").unwrap();
        assert_eq!(inj.family, ChainFamily::CosmosRpc);
        assert_eq!(inj.attribute_encoding, AttributeEncoding::Base64);
    }

    #[test]
    fn environment_wins_over_file() {
        let mut s = Settings::from_yaml(SAMPLE).unwrap();
        s.apply_env(env(&[
            ("BRIDGEWATCH_NETWORK", "mainnet"),
            ("BRIDGEWATCH_CHAINS", "ethereum, terra ,"),
            ("TERRA_RPC", "https://fcd.example.org"),
            ("INJECTIVE_RPC", "https://tm2.example.org"),
        ]))
        .unwrap();

        assert_eq!(s.network, Network::Mainnet);
        assert_eq!(s.chains, vec!["ethereum", "terra"]);
        let registry = s.registry().unwrap();
        assert_eq!(
            registry.get("terra").unwrap().rpc_url.as_deref(),
            Some("https://fcd.example.org")
        );
        assert_eq!(
            registry.get("injective").unwrap().rpc_url.as_deref(),
            Some("https://tm2.example.org")
        );
    }

    #[test]
    fn bad_network_is_rejected() {
        let mut s = Settings::default();
        assert!(s.apply_env(env(&[("BRIDGEWATCH_NETWORK", "devnet")])).is_err());
    }

    #[test]
    fn override_of_unknown_chain_is_an_error() {
        let s = Settings::from_yaml("overrides:\n  solana:\n    rpc_url: http://x\n").unwrap();
        assert!(s.registry().is_err());
    }

    #[test]
    fn enabled_chain_without_rpc_refuses_to_start() {
        let s = Settings::from_yaml("chains: [ethereum]\n").unwrap();
        let err = s.registry().unwrap().enabled(&s.chains).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("ethereum"));
    }

    #[test]
    fn rpc_env_var_names() {
        assert_eq!(rpc_env_var("ethereum"), "ETHEREUM_RPC");
        assert_eq!(rpc_env_var("terra-classic"), "TERRA_CLASSIC_RPC");
    }
}
