//! The per-chain watcher loop.
//!
//! One cycle:
//!   1. resume point ← checkpoint + 1, else the chain's initial block
//!   2. finalized ← extractor; nothing to do if below the resume point
//!   3. range ← [resume, min(finalized, resume + batch - 1)]
//!   4. extract messages + redemptions
//!   5. store records, then the checkpoint
//!   6. notify in the background
//!
//! A failure in 2–5 aborts the cycle before the checkpoint write, so the same
//! range is scanned again next time.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::chain::{ChainConfig, Network};
use crate::cursor::BlockRange;
use crate::error::WatcherError;
use crate::extractor::ChainExtractor;
use crate::notifier::{NotificationInput, Notifier};
use crate::store::MessageStore;
use crate::types::{MessageRecord, RedemptionRecord};

/// Static settings of one watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub chain: String,
    pub chain_id: u16,
    /// Start height when no checkpoint exists yet.
    pub initial_block: Option<u64>,
    /// Sleep between cycles.
    pub poll_interval: Duration,
}

impl WatcherConfig {
    pub fn from_chain(chain: &ChainConfig, network: Network) -> Self {
        Self {
            chain: chain.name.clone(),
            chain_id: chain.chain_id,
            initial_block: chain.initial_block(network),
            poll_interval: Duration::from_millis(chain.poll_interval_ms),
        }
    }
}

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Finalized height is behind the resume point.
    Idle { resume: u64, finalized: u64 },
    /// `range` was scanned and persisted.
    Advanced {
        range: BlockRange,
        messages: usize,
        redemptions: usize,
    },
}

pub struct Watcher {
    extractor: Arc<dyn ChainExtractor>,
    store: Arc<dyn MessageStore>,
    notifier: Arc<dyn Notifier>,
    config: WatcherConfig,
}

impl Watcher {
    pub fn new(
        extractor: Arc<dyn ChainExtractor>,
        store: Arc<dyn MessageStore>,
        notifier: Arc<dyn Notifier>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            extractor,
            store,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Run one cycle.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, WatcherError> {
        let chain = self.config.chain.as_str();

        let resume = self
            .store
            .resume_block(chain, self.config.initial_block)
            .await?
            .ok_or_else(|| {
                WatcherError::config(chain, "no checkpoint stored and no initial block configured")
            })?;

        let finalized = self.extractor.finalized_block_number().await?;

        let Some(range) = BlockRange::next(resume, finalized, self.extractor.maximum_batch_size())
        else {
            tracing::debug!(resume, finalized, "No finalized blocks to scan");
            return Ok(CycleOutcome::Idle { resume, finalized });
        };

        let messages = self.extractor.message_records(range).await?;
        let redemptions = self.extractor.redemption_records(range).await?;

        self.store.store_messages(chain, &messages).await?;
        self.store.store_redemptions(chain, &redemptions).await?;

        let last_sequence = messages
            .iter()
            .filter(|m| m.emitter_chain == self.config.chain_id)
            .map(|m| m.sequence)
            .max();
        self.store
            .store_checkpoint(chain, self.config.chain_id, range.to, last_sequence)
            .await?;

        tracing::info!(
            from = range.from,
            to = range.to,
            messages = messages.len(),
            redemptions = redemptions.len(),
            "Range persisted"
        );

        let outcome = CycleOutcome::Advanced {
            range,
            messages: messages.len(),
            redemptions: redemptions.len(),
        };
        self.notify(messages, redemptions);
        Ok(outcome)
    }

    /// Cycle until `cancel` fires. Returns `Err` only for configuration errors.
    pub async fn watch(&self, cancel: CancellationToken) -> Result<(), WatcherError> {
        let span = tracing::info_span!("watcher", chain = %self.config.chain);
        async {
            tracing::info!(
                initial_block = ?self.config.initial_block,
                poll_ms = self.config.poll_interval.as_millis() as u64,
                "Watcher started"
            );
            loop {
                let result = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = self.run_cycle() => r,
                };

                match result {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => {
                        tracing::error!(error = %e, "Watcher stopped on configuration error");
                        return Err(e);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Cycle aborted, range will be retried");
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
            tracing::info!("Watcher stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Fire-and-forget publication of the cycle's records.
    fn notify(&self, messages: Vec<MessageRecord>, redemptions: Vec<RedemptionRecord>) {
        if messages.is_empty() && redemptions.is_empty() {
            return;
        }

        let group = self.config.chain_id.to_string();
        let mut inputs = Vec::with_capacity(messages.len() + redemptions.len());
        for m in &messages {
            match NotificationInput::json(m) {
                Ok(input) => inputs.push(input.with_subject("message").with_group(&group).with_dedup(&m.id)),
                Err(e) => tracing::warn!(id = %m.id, error = %e, "Skipping notification"),
            }
        }
        for r in &redemptions {
            match NotificationInput::json(r) {
                Ok(input) => inputs.push(
                    input
                        .with_subject("redemption")
                        .with_group(&group)
                        .with_dedup(format!("{}/redeemed", r.id)),
                ),
                Err(e) => tracing::warn!(id = %r.id, error = %e, "Skipping notification"),
            }
        }

        let notifier = Arc::clone(&self.notifier);
        let span = tracing::Span::current();
        tokio::spawn(
            async move {
                let outcome = notifier.publish_many(inputs).await;
                if !outcome.is_success() {
                    tracing::warn!(reasons = ?outcome.reasons, "Notification failed");
                }
            }
            .instrument(span),
        );
    }
}
