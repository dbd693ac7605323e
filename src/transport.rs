//! Transport to the remote collection store.
//!
//! ```text
//! GET  {base}/collections/{name}            → JSON value (404 = no value yet)
//! POST {base}/collections/{name}            ← { "value": ..., "userId": ... }
//! ```
//!
//! Per-user collections are distinguished by the `x-user-id` header, not by
//! the path. Transient failures (network, timeout, 5xx) are retried with
//! capped exponential backoff; 4xx responses come back immediately.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client as HttpClient, Method, StatusCode};
use serde_json::{json, Value};

use crate::config::RemoteConfig;
use crate::error::TransportError;

const API_KEY_HEADER: &str = "x-api-key";
const USER_ID_HEADER: &str = "x-user-id";

/// Capped exponential backoff: `min(base * 2^(attempt-1), cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(8000),
            max_retries: 3,
        }
    }
}

impl Backoff {
    /// Wait before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.cap)
            .min(self.cap)
    }
}

/// Run `op`, retrying transient failures according to `backoff`.
pub async fn retry<T, F, Fut>(backoff: &Backoff, label: &str, mut op: F) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < backoff.max_retries => {
                attempt += 1;
                let wait = backoff.delay(attempt);
                tracing::warn!(
                    "{} failed, retrying in {}ms (attempt {}/{}): {}",
                    label,
                    wait.as_millis(),
                    attempt,
                    backoff.max_retries,
                    e
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// The remote store as seen by the sync engine.
///
/// `identity` is the per-user key; shared collections pass `None`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read a collection. `Ok(None)` means the store holds no value for it.
    async fn fetch(&self, collection: &str, identity: Option<&str>) -> Result<Option<Value>, TransportError>;

    /// Replace a collection's value.
    async fn store(&self, collection: &str, value: &Value, identity: Option<&str>) -> Result<(), TransportError>;
}

/// HTTP implementation of [`RemoteStore`].
pub struct HttpTransport {
    http_client: HttpClient,
    base_url: String,
    api_key: Option<String>,
    backoff: Backoff,
}

impl HttpTransport {
    pub fn new(config: &RemoteConfig, backoff: Backoff) -> Result<Self, TransportError> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            backoff,
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/collections/{}", self.base_url, collection)
    }

    /// Issue one logical request, with retries. Empty or 404 bodies are `None`.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        identity: Option<&str>,
    ) -> Result<Option<Value>, TransportError> {
        let label = format!("{} {}", method, url);
        retry(&self.backoff, &label, || self.send_once(method.clone(), url, body, identity)).await
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        identity: Option<&str>,
    ) -> Result<Option<Value>, TransportError> {
        let mut req = self
            .http_client
            .request(method, url)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(ref key) = self.api_key {
            req = req.header(API_KEY_HEADER, key);
        }
        if let Some(user) = identity {
            req = req.header(USER_ID_HEADER, user);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.is_server_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Server { status: status.as_u16(), body });
        }
        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Rejected { status: status.as_u16(), body });
        }

        let text = resp.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(if value.is_null() { None } else { Some(value) })
    }
}

#[async_trait]
impl RemoteStore for HttpTransport {
    async fn fetch(&self, collection: &str, identity: Option<&str>) -> Result<Option<Value>, TransportError> {
        let url = self.collection_url(collection);
        self.request(Method::GET, &url, None, identity).await
    }

    async fn store(&self, collection: &str, value: &Value, identity: Option<&str>) -> Result<(), TransportError> {
        let url = self.collection_url(collection);
        let body = match identity {
            Some(user) => json!({ "value": value, "userId": user }),
            None => json!({ "value": value }),
        };
        self.request(Method::POST, &url, Some(&body), identity).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_backoff_schedule() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
        assert_eq!(backoff.delay(4), Duration::from_secs(8));
        assert_eq!(backoff.delay(5), Duration::from_secs(8));
        assert_eq!(backoff.delay(40), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_one_two_four_seconds_then_fails() {
        let backoff = Backoff::default();
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let mut call_times = Vec::new();

        let result: Result<(), TransportError> = retry(&backoff, "GET test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            call_times.push(start.elapsed());
            async { Err(TransportError::Server { status: 503, body: String::new() }) }
        })
        .await;

        assert!(matches!(result, Err(TransportError::Server { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let secs: Vec<u64> = call_times.iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![0, 1, 3, 7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_does_not_repeat_client_errors() {
        let backoff = Backoff::default();
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), TransportError> = retry(&backoff, "POST test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::Rejected { status: 400, body: "bad".into() }) }
        })
        .await;

        assert!(matches!(result, Err(TransportError::Rejected { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_transient_failure() {
        let backoff = Backoff::default();
        let calls = AtomicU32::new(0);

        let result = retry(&backoff, "GET test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(TransportError::Network("reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(1));
    }

    #[test]
    fn test_collection_url_strips_trailing_slash() {
        let config = RemoteConfig {
            base_url: "https://assets.example.com/".to_string(),
            api_key: Some(String::new()),
            timeout_secs: 5,
        };
        let transport = HttpTransport::new(&config, Backoff::default()).unwrap();
        assert_eq!(
            transport.collection_url("templates"),
            "https://assets.example.com/collections/templates"
        );
        assert!(transport.api_key.is_none());
    }
}
