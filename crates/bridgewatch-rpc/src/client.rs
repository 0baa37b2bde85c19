//! HTTP client backed by `reqwest`, shared by the JSON-RPC and REST extractors.
//!
//! Every call passes through the chain's rate limiter and the retry policy,
//! and is bounded by the request timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TransportError;
use crate::policy::{RateLimiter, RateLimiterConfig, RetryConfig, RetryPolicy};
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// Configuration for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub retry: RetryConfig,
    pub rate_limiter: RateLimiterConfig,
    pub request_timeout: Duration,
}

impl HttpClientConfig {
    /// Defaults with a `rps` requests-per-second ceiling.
    pub fn with_rate(rps: f64) -> Self {
        Self {
            rate_limiter: RateLimiterConfig::per_second(rps),
            ..Self::default()
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Rate-limited, retrying HTTP client for one endpoint.
pub struct HttpClient {
    base_url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    rate_limiter: RateLimiter,
    request_timeout: Duration,
    next_id: AtomicU64,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, config: HttpClientConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            retry: RetryPolicy::new(config.retry),
            rate_limiter: RateLimiter::new(config.rate_limiter),
            request_timeout: config.request_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET {base_url}/{path}` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let url = url.as_str();
        let value = self
            .retry
            .run(path, move || async move {
                self.rate_limiter.acquire().await;
                self.get_once(url).await
            })
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// JSON-RPC 2.0 call against `base_url`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        let req = &req;
        let resp = self
            .retry
            .run(method, move || async move {
                self.rate_limiter.acquire().await;
                self.post_once(req).await
            })
            .await?;
        let result = resp.into_result().map_err(TransportError::Rpc)?;
        Ok(serde_json::from_value(result)?)
    }

    async fn get_once(&self, url: &str) -> Result<Value, TransportError> {
        tracing::trace!(url, "GET");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;
        Self::read_json(resp).await
    }

    async fn post_once(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        tracing::trace!(method = %req.method, "POST");
        let resp = self
            .http
            .post(&self.base_url)
            .json(req)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;
        let value = Self::read_json(resp).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn read_json(resp: reqwest::Response) -> Result<Value, TransportError> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn map_reqwest(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            TransportError::Http(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let c = HttpClient::new("https://fcd.terra.dev/", HttpClientConfig::default()).unwrap();
        assert_eq!(c.base_url(), "https://fcd.terra.dev");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let config = HttpClientConfig {
            retry: RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            },
            rate_limiter: RateLimiterConfig::per_second(100.0),
            request_timeout: Duration::from_millis(500),
        };
        let c = HttpClient::new("http://127.0.0.1:9", config).unwrap();
        let err = c.get_json::<Value>("abci_info").await.unwrap_err();
        assert!(matches!(err, TransportError::Http(_) | TransportError::Timeout { .. }));
    }
}
