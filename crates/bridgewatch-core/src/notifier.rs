//! Notification contract: best-effort fan-out of observed records.
//!
//! The watcher never waits on a notifier to advance a checkpoint; failures are
//! reported through [`PublishOutcome`] and logged, never escalated.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::WatcherError;

/// Largest batch a single publish call accepts.
pub const MAX_BATCH: usize = 10;

/// One message to publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationInput {
    /// Serialized body.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Ordering group (e.g. the origin chain).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Deduplication key (e.g. the message id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_id: Option<String>,
}

impl NotificationInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            subject: None,
            group_id: None,
            dedup_id: None,
        }
    }

    /// Serialize `value` as the message body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, WatcherError> {
        Ok(Self::new(serde_json::to_string(value)?))
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_dedup(mut self, dedup_id: impl Into<String>) -> Self {
        self.dedup_id = Some(dedup_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    Success,
    Error,
}

/// Result of a publish call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub status: PublishStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

impl PublishOutcome {
    pub fn success() -> Self {
        Self {
            status: PublishStatus::Success,
            reasons: Vec::new(),
        }
    }

    pub fn error(reasons: Vec<String>) -> Self {
        Self {
            status: PublishStatus::Error,
            reasons,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PublishStatus::Success
    }
}

/// Publishes watcher output to a downstream topic.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish one message.
    async fn publish_one(&self, input: NotificationInput) -> PublishOutcome;

    /// Publish at most [`MAX_BATCH`] messages in one call.
    async fn publish_batch(&self, batch: Vec<NotificationInput>) -> PublishOutcome;

    /// Publish any number of messages, chunked at [`MAX_BATCH`]. Every chunk is
    /// attempted; the outcome carries the reasons of all failed chunks.
    async fn publish_many(&self, inputs: Vec<NotificationInput>) -> PublishOutcome {
        if inputs.is_empty() {
            return PublishOutcome::success();
        }

        let chunks: Vec<Vec<NotificationInput>> = inputs
            .chunks(MAX_BATCH)
            .map(|c| c.to_vec())
            .collect();
        let outcomes = join_all(chunks.into_iter().map(|c| self.publish_batch(c))).await;

        let reasons: Vec<String> = outcomes
            .into_iter()
            .filter(|o| !o.is_success())
            .flat_map(|o| o.reasons)
            .collect();

        if reasons.is_empty() {
            PublishOutcome::success()
        } else {
            PublishOutcome::error(reasons)
        }
    }
}

/// Discards everything. Used when no topic is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn publish_one(&self, _input: NotificationInput) -> PublishOutcome {
        PublishOutcome::success()
    }

    async fn publish_batch(&self, _batch: Vec<NotificationInput>) -> PublishOutcome {
        PublishOutcome::success()
    }
}
