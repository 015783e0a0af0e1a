//! # flowsplit-remote
//!
//! Talks to the remote document endpoint: `GET <base>/flows` (honouring
//! `If-None-Match`) and `POST <base>/flows?rev=<revision>` (optimistic-concurrency
//! push). Rate limiting, retry-with-backoff, and timeouts live here so the watch
//! orchestrator only ever sees `Fresh`/`Unchanged`/`Ok` outcomes or a typed error.

mod rate_limit;

use std::time::Duration;

use flowsplit_core::{Document, FlowsplitConfig, FlowsplitError};
use parking_lot::Mutex;
use reqwest::{header, StatusCode};
use tracing::{debug, warn};

pub use rate_limit::SlidingWindowLimiter;

/// Already-resolved credential to send with every request. Resolving it from a file,
/// environment variable, or interactive prompt is an external collaborator's job.
#[derive(Debug, Clone)]
pub enum Credential {
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

/// Result of a successful `fetch`.
#[derive(Debug)]
pub enum FetchOutcome {
    Fresh { document: Document, etag: Option<String>, revision: Option<String> },
    Unchanged,
}

/// Result of a successful `push`.
#[derive(Debug)]
pub struct PushOutcome {
    pub new_revision: String,
}

pub struct RemoteClient {
    http: reqwest::Client,
    base_url: String,
    credential: Credential,
    retry_backoff_secs: Vec<u64>,
    consecutive_failure_cap: usize,
    short_window: Mutex<SlidingWindowLimiter>,
    long_window: Mutex<SlidingWindowLimiter>,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>, credential: Credential, config: &FlowsplitConfig) -> Result<Self, FlowsplitError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| FlowsplitError::Config(format!("building HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            credential,
            retry_backoff_secs: config.retry_backoff_secs.clone(),
            consecutive_failure_cap: config.consecutive_failure_cap,
            short_window: Mutex::new(SlidingWindowLimiter::new(config.rate_limit_short.0, config.rate_limit_short.1)),
            long_window: Mutex::new(SlidingWindowLimiter::new(config.rate_limit_long.0, config.rate_limit_long.1)),
        })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credential {
            Credential::None => builder,
            Credential::Bearer(token) => builder.bearer_auth(token),
            Credential::Basic { username, password } => builder.basic_auth(username, Some(password)),
        }
    }

    /// `GET <base>/flows`. `etag` is the last value observed by the caller; `None`
    /// forces an unconditional fetch.
    pub async fn fetch(&self, etag: Option<&str>) -> Result<FetchOutcome, FlowsplitError> {
        let url = format!("{}/flows", self.base_url.trim_end_matches('/'));
        let response = self
            .with_retry(|| {
                let mut builder = self.authorize(self.http.get(&url));
                if let Some(etag) = etag {
                    builder = builder.header(header::IF_NONE_MATCH, etag);
                }
                builder
            })
            .await?;

        match response.status() {
            StatusCode::NOT_MODIFIED => Ok(FetchOutcome::Unchanged),
            status if status.is_success() => {
                let etag = response
                    .headers()
                    .get(header::ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let revision = response
                    .headers()
                    .get("x-flow-revision")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| FlowsplitError::RemoteTransient(e.to_string()))?;
                let document = Document::from_json_slice(&bytes)?;
                Ok(FetchOutcome::Fresh { document, etag, revision })
            }
            status => Err(FlowsplitError::RemoteTransient(format!("unexpected fetch status {status}"))),
        }
    }

    /// `POST <base>/flows?rev=<revision>`. `revision` is `None` on the very first
    /// push against a tree that has never been fetched.
    pub async fn push(&self, document: &Document, revision: Option<&str>) -> Result<PushOutcome, FlowsplitError> {
        if let Some(wait) = self.rate_limit_wait() {
            return Err(FlowsplitError::RateLimited { retry_after_secs: wait.as_secs() });
        }

        let mut url = format!("{}/flows", self.base_url.trim_end_matches('/'));
        if let Some(revision) = revision {
            url = format!("{url}?rev={revision}");
        }
        let body = document.to_json_vec()?;

        let response = self
            .with_retry(|| self.authorize(self.http.post(&url)).body(body.clone()).header(header::CONTENT_TYPE, "application/json"))
            .await?;

        match response.status() {
            status if status.is_success() => {
                let parsed: PushResponseBody = response
                    .json()
                    .await
                    .map_err(|e| FlowsplitError::RemoteTransient(format!("malformed push response: {e}")))?;
                Ok(PushOutcome { new_revision: parsed.revision_string() })
            }
            StatusCode::CONFLICT => Err(FlowsplitError::RemoteConflict),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                Err(FlowsplitError::RateLimited { retry_after_secs: retry_after })
            }
            status => Err(FlowsplitError::RemoteTransient(format!("unexpected push status {status}"))),
        }
    }

    /// `None` if the request is allowed now; `Some(wait)` if an internally enforced
    /// ceiling was hit and the caller should back off for `wait` before retrying.
    fn rate_limit_wait(&self) -> Option<Duration> {
        let mut short = self.short_window.lock();
        let mut long = self.long_window.lock();
        if let Some(wait) = short.check_and_record() {
            return Some(wait);
        }
        if let Some(wait) = long.check_and_record() {
            short.rollback_last();
            return Some(wait);
        }
        None
    }

    /// Send a request, retrying transient failures (timeouts, connection errors, 5xx)
    /// with the configured exponential backoff, up to the consecutive-failure cap.
    async fn with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, FlowsplitError> {
        let mut attempt = 0usize;
        loop {
            match build().send().await {
                Ok(response) if response.status().is_server_error() => {
                    if attempt >= self.consecutive_failure_cap {
                        return Err(FlowsplitError::RemoteTransient(format!(
                            "server error {} after {} attempts",
                            response.status(),
                            attempt + 1
                        )));
                    }
                    warn!(status = %response.status(), attempt, "transient remote failure, retrying");
                    self.backoff(attempt).await;
                    attempt += 1;
                }
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.consecutive_failure_cap && (e.is_timeout() || e.is_connect()) => {
                    warn!(error = %e, attempt, "transient remote failure, retrying");
                    self.backoff(attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(FlowsplitError::RemoteTransient(e.to_string())),
            }
        }
    }

    async fn backoff(&self, attempt: usize) {
        let secs = self
            .retry_backoff_secs
            .get(attempt)
            .or_else(|| self.retry_backoff_secs.last())
            .copied()
            .unwrap_or(1);
        debug!(secs, "backing off before retry");
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }
}

#[derive(Debug, serde::Deserialize)]
struct PushResponseBody {
    rev: serde_json::Value,
}

impl PushResponseBody {
    fn revision_string(&self) -> String {
        match &self.rev {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsplit_core::Node;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn doc() -> Document {
        let node = Node::new(json!({"id": "n1", "type": "function"}).as_object().unwrap().clone());
        Document::from_nodes(vec![node]).unwrap()
    }

    #[tokio::test]
    async fn fetch_unchanged_on_304() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flows"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let client = RemoteClient::new(server.uri(), Credential::None, &FlowsplitConfig::default()).unwrap();
        let outcome = client.fetch(Some("etag-1")).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Unchanged));
    }

    #[tokio::test]
    async fn fetch_fresh_returns_document_and_etag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flows"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "e2")
                    .insert_header("x-flow-revision", "r2")
                    .set_body_json(json!([{"id": "n1", "type": "function"}])),
            )
            .mount(&server)
            .await;

        let client = RemoteClient::new(server.uri(), Credential::None, &FlowsplitConfig::default()).unwrap();
        let outcome = client.fetch(None).await.unwrap();
        match outcome {
            FetchOutcome::Fresh { document, etag, revision } => {
                assert_eq!(document.len(), 1);
                assert_eq!(etag.as_deref(), Some("e2"));
                assert_eq!(revision.as_deref(), Some("r2"));
            }
            FetchOutcome::Unchanged => panic!("expected Fresh"),
        }
    }

    #[tokio::test]
    async fn push_conflict_maps_to_remote_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/flows"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let client = RemoteClient::new(server.uri(), Credential::None, &FlowsplitConfig::default()).unwrap();
        let err = client.push(&doc(), Some("r2")).await.unwrap_err();
        assert!(matches!(err, FlowsplitError::RemoteConflict));
    }

    #[tokio::test]
    async fn push_ok_returns_new_revision() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/flows"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rev": "r3"})))
            .mount(&server)
            .await;

        let client = RemoteClient::new(server.uri(), Credential::None, &FlowsplitConfig::default()).unwrap();
        let outcome = client.push(&doc(), Some("r2")).await.unwrap();
        assert_eq!(outcome.new_revision, "r3");
    }
}
