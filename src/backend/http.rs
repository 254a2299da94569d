use std::time::Duration;

use ::http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::errors::{AdapterError, CallFailure};

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Errors raised while building a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid base URL {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("invalid value for header {0}")]
    InvalidHeader(&'static str),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// How many times a call is attempted and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt; failures propagate immediately.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Up to `max_retries` repeats of a retryable failure with exponential backoff.
    pub fn bounded(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            base_delay: Duration::from_millis(500),
        }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` attempts so far.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(6);
        self.base_delay * (1u32 << exp)
    }
}

/// JSON-over-HTTP client owned by a single adapter.
pub struct HttpTransport {
    backend: &'static str,
    client: reqwest::Client,
    base_url: Url,
    headers: HeaderMap,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(
        backend: &'static str,
        base_url: &str,
        timeout: Option<Duration>,
        retry: RetryPolicy,
    ) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url).map_err(|source| TransportError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;

        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            backend,
            client: builder.build()?,
            base_url,
            headers: HeaderMap::new(),
            retry,
        })
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Result<Self, TransportError> {
        let value = HeaderValue::from_str(value).map_err(|_| TransportError::InvalidHeader(name))?;
        self.headers.insert(HeaderName::from_static(name), value);
        Ok(self)
    }

    /// Add a credential header. Its value is kept out of debug output.
    pub fn with_secret_header(
        mut self,
        name: &'static str,
        value: &str,
    ) -> Result<Self, TransportError> {
        let mut value =
            HeaderValue::from_str(value).map_err(|_| TransportError::InvalidHeader(name))?;
        value.set_sensitive(true);
        self.headers.insert(HeaderName::from_static(name), value);
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// POST `body` as JSON to `path` and decode the JSON answer.
    ///
    /// The body is serialized once, so every retry sends the identical request.
    /// Only failures classified as retryable are repeated.
    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, AdapterError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = endpoint_url(&self.base_url, path);
        let payload = serde_json::to_vec(body).map_err(|e| {
            AdapterError::backend_call(self.backend, CallFailure::Decode, e.to_string())
        })?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.post_once(&url, &payload).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        backend = self.backend,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying backend call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once<R: DeserializeOwned>(
        &self,
        url: &Url,
        payload: &[u8],
    ) -> Result<R, AdapterError> {
        let resp = self
            .client
            .post(url.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AdapterError::backend_call(
                self.backend,
                CallFailure::Status(status.as_u16()),
                preview(&body, MAX_ERROR_BODY),
            ));
        }

        let bytes = resp.bytes().await.map_err(|e| self.transport_error(e))?;
        debug!(backend = self.backend, url = %url, bytes = bytes.len(), "backend call succeeded");
        serde_json::from_slice(&bytes).map_err(|e| {
            AdapterError::backend_call(
                self.backend,
                CallFailure::Decode,
                format!(
                    "{e}; body: {}",
                    preview(&String::from_utf8_lossy(&bytes), MAX_ERROR_BODY)
                ),
            )
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> AdapterError {
        let failure = if e.is_timeout() {
            CallFailure::Timeout
        } else if e.is_decode() {
            CallFailure::Decode
        } else {
            CallFailure::Connect
        };
        AdapterError::backend_call(self.backend, failure, e.to_string())
    }
}

/// Join an endpoint path onto a base URL, keeping any path prefix of the base.
pub fn endpoint_url(base: &Url, path: &str) -> Url {
    let mut url = base.clone();

    let normalized_base = base.path().trim_end_matches('/');
    let trimmed_path = path.trim_start_matches('/');

    let full_path = if normalized_base.is_empty() || normalized_base == "/" {
        format!("/{trimmed_path}")
    } else if trimmed_path.is_empty() {
        normalized_base.to_string()
    } else {
        format!("{normalized_base}/{trimmed_path}")
    };

    url.set_path(&full_path);
    url.set_query(None);
    url
}

/// First `max` characters of `text`, for logs and error messages.
pub fn preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde::Deserialize;
    use serde_json::{json, Value};

    use super::*;
    use crate::backend::testing::serve;

    #[derive(Debug, Deserialize)]
    struct Answer {
        ok: bool,
    }

    /// Mock endpoint answering with the scripted statuses, then 200.
    async fn scripted(statuses: &[u16]) -> (String, Arc<AtomicUsize>, Arc<Mutex<Vec<Value>>>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(statuses.iter().copied().collect::<VecDeque<u16>>()));

        let (h, b, s) = (hits.clone(), bodies.clone(), script.clone());
        let app = Router::new().route(
            "/api/v1/test",
            post(move |Json(body): Json<Value>| {
                let (h, b, s) = (h.clone(), b.clone(), s.clone());
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    b.lock().unwrap().push(body);
                    match s.lock().unwrap().pop_front() {
                        Some(code) => (
                            StatusCode::from_u16(code).unwrap(),
                            Json(json!({"error": "scripted"})),
                        ),
                        None => (StatusCode::OK, Json(json!({"ok": true}))),
                    }
                }
            }),
        );
        (serve(app).await, hits, bodies)
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: max_retries + 1,
            base_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_endpoint_url_joins_paths() {
        let base = Url::parse("https://api.example.com").unwrap();
        assert_eq!(
            endpoint_url(&base, "/v1/chat/completions").as_str(),
            "https://api.example.com/v1/chat/completions"
        );

        let base = Url::parse("http://localhost:8080/api/").unwrap();
        assert_eq!(
            endpoint_url(&base, "/generate").as_str(),
            "http://localhost:8080/api/generate"
        );
    }

    #[test]
    fn test_endpoint_url_keeps_colon_paths() {
        let base = Url::parse("https://generativelanguage.googleapis.com").unwrap();
        assert_eq!(
            endpoint_url(&base, "/v1beta/models/gemini-1.0-pro:generateContent").as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.0-pro:generateContent"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let result = HttpTransport::new("test", "://bad", None, RetryPolicy::none());
        assert!(matches!(result, Err(TransportError::InvalidUrl { .. })));
    }

    #[test]
    fn test_invalid_header_value() {
        let transport =
            HttpTransport::new("test", "http://localhost", None, RetryPolicy::none()).unwrap();
        let result = transport.with_secret_header("x-api-key", "line\nbreak");
        assert!(matches!(result, Err(TransportError::InvalidHeader("x-api-key"))));
    }

    #[test]
    fn test_retry_delays_grow() {
        let policy = RetryPolicy::bounded(3);
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_retries_transient_status_with_identical_body() {
        let (base, hits, bodies) = scripted(&[429, 503]).await;
        let transport = HttpTransport::new("test", &format!("{base}/api"), None, fast_retry(3)).unwrap();

        let answer: Answer = transport
            .post_json("/v1/test", &json!({"prompt": "⊢ True"}))
            .await
            .unwrap();
        assert!(answer.ok);
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        let bodies = bodies.lock().unwrap();
        assert!(bodies.iter().all(|b| b == &bodies[0]));
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let (base, hits, _) = scripted(&[500, 500, 500, 500, 500]).await;
        let transport = HttpTransport::new("test", &format!("{base}/api"), None, fast_retry(2)).unwrap();

        let err = transport
            .post_json::<_, Answer>("/v1/test", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdapterError::BackendCall { failure: CallFailure::Status(500), .. }
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_status_is_not_retried() {
        let (base, hits, _) = scripted(&[401]).await;
        let transport = HttpTransport::new("test", &format!("{base}/api"), None, fast_retry(3)).unwrap();

        let err = transport
            .post_json::<_, Answer>("/v1/test", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdapterError::BackendCall { failure: CallFailure::Status(401), .. }
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_policy_makes_one_attempt() {
        let (base, hits, _) = scripted(&[503]).await;
        let transport =
            HttpTransport::new("test", &format!("{base}/api"), None, RetryPolicy::none()).unwrap();

        let err = transport
            .post_json::<_, Answer>("/v1/test", &json!({}))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_terminal() {
        let (base, hits, _) = scripted(&[]).await;
        let transport = HttpTransport::new("test", &format!("{base}/api"), None, fast_retry(3)).unwrap();

        #[derive(Debug, Deserialize)]
        struct Other {
            #[allow(dead_code)]
            choices: Vec<String>,
        }

        let err = transport
            .post_json::<_, Other>("/v1/test", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdapterError::BackendCall { failure: CallFailure::Decode, .. }
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_refused_is_classified() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport =
            HttpTransport::new("test", &format!("http://{addr}"), None, RetryPolicy::none())
                .unwrap();
        let err = transport
            .post_json::<_, Answer>("/v1/test", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdapterError::BackendCall { failure: CallFailure::Connect, .. }
        ));
    }
}
