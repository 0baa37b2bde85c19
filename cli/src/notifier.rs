//! HTTP topic publisher.
//!
//! `publish_one` POSTs a single entry to the topic URL, `publish_batch` POSTs
//! `{"entries": [...]}` to `{url}/batch`. A batch response may list rejected
//! entries under `failed`; each becomes a failure reason.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use bridgewatch_core::notifier::MAX_BATCH;
use bridgewatch_core::{NotificationInput, Notifier, PublishOutcome};

pub struct HttpTopicNotifier {
    url: String,
    http: reqwest::Client,
}

#[derive(Debug, Default, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    failed: Vec<FailedEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailedEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpTopicNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> Result<String, String> {
        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if status.is_success() {
            Ok(text)
        } else {
            Err(format!("HTTP {}: {}", status.as_u16(), text))
        }
    }
}

/// Failure reasons listed in a batch response body.
fn batch_failures(body: &str) -> Vec<String> {
    if body.trim().is_empty() {
        return Vec::new();
    }
    let parsed: BatchResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(
                error = %e,
                body = %body.chars().take(200).collect::<String>(),
                "Unreadable batch response, assuming every entry was accepted"
            );
            return Vec::new();
        }
    };
    parsed
        .failed
        .into_iter()
        .map(|f| match (f.id, f.message) {
            (Some(id), Some(msg)) => format!("{id}: {msg}"),
            (Some(id), None) => format!("{id}: rejected"),
            (None, Some(msg)) => msg,
            (None, None) => "rejected".to_string(),
        })
        .collect()
}

#[async_trait]
impl Notifier for HttpTopicNotifier {
    async fn publish_one(&self, input: NotificationInput) -> PublishOutcome {
        match self.post(&self.url, json!(input)).await {
            Ok(_) => PublishOutcome::success(),
            Err(reason) => {
                tracing::warn!(%reason, "Notification failed");
                PublishOutcome::error(vec![reason])
            }
        }
    }

    async fn publish_batch(&self, batch: Vec<NotificationInput>) -> PublishOutcome {
        if batch.len() > MAX_BATCH {
            return self.publish_many(batch).await;
        }
        let url = format!("{}/batch", self.url);
        let reasons = match self.post(&url, json!({ "entries": batch })).await {
            Ok(body) => batch_failures(&body),
            Err(reason) => vec![reason],
        };
        if reasons.is_empty() {
            PublishOutcome::success()
        } else {
            tracing::warn!(failed = reasons.len(), "Notification batch partially failed");
            PublishOutcome::error(reasons)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_entries_become_reasons() {
        let body = r#"{"failed":[{"id":"2/ab/7","message":"throttled"},{"id":"2/ab/8"}]}"#;
        assert_eq!(
            batch_failures(body),
            vec!["2/ab/7: throttled".to_string(), "2/ab/8: rejected".to_string()]
        );
    }

    #[test]
    fn empty_or_foreign_bodies_mean_success() {
        assert!(batch_failures("").is_empty());
        assert!(batch_failures(r#"{"accepted": 10}"#).is_empty());
    }

    #[test]
    fn unreadable_body_is_accepted_with_a_warning() {
        assert!(batch_failures("OK").is_empty());
        assert!(batch_failures(r#"{"failed": "everything"}"#).is_empty());
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let n = HttpTopicNotifier::new("http://localhost:9000/topic/", Duration::from_secs(1)).unwrap();
        assert_eq!(n.url, "http://localhost:9000/topic");
    }
}
