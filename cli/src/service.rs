//! Wiring: settings → store, notifier, extractors, supervised watchers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use bridgewatch_core::{
    ChainConfig, ChainExtractor, ChainFamily, ChainRegistry, MemoryStore, MessageStore,
    NoopNotifier, Notifier, Watcher, WatcherConfig,
};
use bridgewatch_cosmos::{
    CosmosExtractorConfig, DirectExtractor, ExplorerExtractor, HttpExplorerClient,
    HttpTendermintClient,
};
use bridgewatch_evm::{EvmExtractor, EvmExtractorConfig, HttpEvmClient};
use bridgewatch_rpc::{HttpClient, HttpClientConfig};
use bridgewatch_storage::{JsonStore, SqliteStore};

use crate::notifier::HttpTopicNotifier;
use crate::settings::{Settings, StoreKind};

pub async fn build_store(settings: &Settings) -> Result<Arc<dyn MessageStore>> {
    let store: Arc<dyn MessageStore> = match settings.store.kind {
        StoreKind::Json => Arc::new(JsonStore::new(&settings.store.path)),
        StoreKind::Sqlite => {
            let path = settings.store.path.to_string_lossy();
            Arc::new(
                SqliteStore::open(&path)
                    .await
                    .with_context(|| format!("opening SQLite store at {path}"))?,
            )
        }
        StoreKind::Memory => {
            warn!("Using the in-memory store, nothing survives a restart");
            Arc::new(MemoryStore::new())
        }
    };
    store.start().await.context("starting store")?;
    Ok(store)
}

pub fn build_notifier(settings: &Settings) -> Result<Arc<dyn Notifier>> {
    let notifier: Arc<dyn Notifier> = match &settings.notifier.url {
        Some(url) => Arc::new(HttpTopicNotifier::new(
            url.as_str(),
            Duration::from_millis(settings.notifier.timeout_ms),
        )?),
        None => {
            info!("No notifier URL configured, notifications are dropped");
            Arc::new(NoopNotifier)
        }
    };
    Ok(notifier)
}

/// The extractor for `chain`'s family, talking to its configured RPC.
pub fn build_extractor(chain: &ChainConfig) -> Result<Arc<dyn ChainExtractor>> {
    chain.validate()?;
    let http = HttpClient::new(chain.rpc()?, HttpClientConfig::with_rate(chain.requests_per_second))
        .with_context(|| format!("building HTTP client for '{}'", chain.name))?;

    let extractor: Arc<dyn ChainExtractor> = match chain.family {
        ChainFamily::Evm => Arc::new(EvmExtractor::new(
            EvmExtractorConfig::from_chain(chain)?,
            HttpEvmClient::new(http),
        )),
        ChainFamily::CosmosRpc => Arc::new(DirectExtractor::new(
            CosmosExtractorConfig::from_chain(chain)?,
            HttpTendermintClient::new(http),
        )),
        ChainFamily::CosmosIndexer => Arc::new(ExplorerExtractor::new(
            CosmosExtractorConfig::from_chain(chain)?,
            HttpExplorerClient::new(http),
        )),
    };
    Ok(extractor)
}

/// Chains selected in the settings, all validated before anything starts.
pub fn enabled_chains(settings: &Settings, registry: &ChainRegistry) -> Result<Vec<ChainConfig>> {
    if settings.chains.is_empty() {
        anyhow::bail!("no chains enabled; set `chains` in the settings file or BRIDGEWATCH_CHAINS");
    }
    Ok(registry.enabled(&settings.chains)?)
}

/// Run one watcher per enabled chain until Ctrl-C.
pub async fn run(settings: Settings) -> Result<()> {
    let registry = settings.registry()?;
    let chains = enabled_chains(&settings, &registry)?;
    let network = registry.network();

    let mut watchers = Vec::with_capacity(chains.len());
    let store = build_store(&settings).await?;
    let notifier = build_notifier(&settings)?;
    for chain in &chains {
        let extractor = build_extractor(chain)?;
        watchers.push(Watcher::new(
            extractor,
            Arc::clone(&store),
            Arc::clone(&notifier),
            WatcherConfig::from_chain(chain, network),
        ));
    }

    info!(
        network = ?network,
        chains = ?settings.chains,
        store = ?settings.store.kind,
        "BridgeWatch starting"
    );

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();
    for watcher in watchers {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let chain = watcher.config().chain.clone();
            (chain, watcher.watch(cancel).await)
        });
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!(error = %e, "Cannot listen for Ctrl-C, stopping"),
        }
        shutdown.cancel();
    });

    let mut failed = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((chain, Err(e))) => {
                error!(chain = %chain, error = %e, "Watcher exited");
                failed.push(chain);
            }
            Err(e) => error!(error = %e, "Watcher task panicked"),
        }
    }

    if let Err(e) = store.stop().await {
        warn!(error = %e, "Store did not stop cleanly");
    }
    info!("BridgeWatch stopped");

    if failed.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("watchers exited with errors: {}", failed.join(", "))
    }
}
