use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiErrorKind};

pub const ITEMS_PER_PAGE: u32 = 100;
const RETRY_LIMIT: u32 = 10;
/// The search endpoints have a separate rate limit that is not always
/// reflected in the response headers; wait this long when nothing better
/// is published.
const FALLBACK_WAIT_SECS: u64 = 30;

pub type Headers = BTreeMap<String, String>;
pub type Params = Vec<(String, String)>;

/// A response as read off the wire, before classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// Header names lowercased.
    pub headers: Headers,
    pub body: String,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// The seam between the client and the network. Tests script this;
/// production uses [`ReqwestTransport`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        params: &[(String, String)],
        etag: Option<&str>,
    ) -> Result<RawResponse, ApiError>;
}

pub struct ReqwestTransport {
    client: Client,
    token: Option<String>,
}

impl ReqwestTransport {
    pub fn new(token: Option<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("gh-recon/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError {
                kind: ApiErrorKind::Unknown,
                status: None,
                message: format!("Failed to build HTTP client: {}", e),
                retry_after_secs: None,
            })?;
        Ok(Self { client, token })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        params: &[(String, String)],
        etag: Option<&str>,
    ) -> Result<RawResponse, ApiError> {
        let mut req = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github.v3+json")
            .query(params);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("token {}", token));
        }
        if let Some(etag) = etag {
            req = req.header("If-None-Match", etag);
        }

        let resp = req.send().await.map_err(|e| ApiError::network(&e))?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_ascii_lowercase(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = resp.text().await.map_err(|e| ApiError::network(&e))?;
        Ok(RawResponse { status, headers, body })
    }
}

/// Last known quota state, updated from response headers immediately after
/// each read. This is the token's whole budget; all calls sharing the
/// token serialize against it.
#[derive(Debug, Default, Clone)]
pub struct RateLimitState {
    pub remaining: Option<u64>,
    /// Unix timestamp of the published reset.
    pub reset_at: Option<u64>,
}

impl RateLimitState {
    fn update_from(&mut self, headers: &Headers) {
        if let Some(remaining) = headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.remaining = Some(remaining);
        }
        if let Some(reset) = headers
            .get("x-ratelimit-reset")
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.reset_at = Some(reset);
        }
    }
}

/// Metadata the monitor needs from conditional event polls.
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    pub etag: Option<String>,
    pub poll_interval_secs: Option<u64>,
}

/// Rate-limit-aware GitHub API client. Successful GET bodies are cached by
/// (url, params) for the lifetime of the client, so repeated runs over the
/// same account within one process do not re-spend quota. Staleness is the
/// caller's problem.
pub struct ApiClient {
    transport: Box<dyn HttpTransport>,
    limits: Mutex<RateLimitState>,
    cache: Mutex<HashMap<String, (Value, Headers)>>,
    unattended_timeout: Option<Duration>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new(config.token.clone())?;
        Ok(Self::with_transport(Box::new(transport), config))
    }

    pub fn with_transport(transport: Box<dyn HttpTransport>, config: &ApiConfig) -> Self {
        Self {
            transport,
            limits: Mutex::new(RateLimitState::default()),
            cache: Mutex::new(HashMap::new()),
            unattended_timeout: config.unattended_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn rate_limit_state(&self) -> RateLimitState {
        self.limits.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Cached GET returning just the JSON body.
    pub async fn request(&self, url: &str, params: &[(String, String)]) -> Result<Value, ApiError> {
        let (body, _) = self.request_with_headers(url, params).await?;
        Ok(body)
    }

    /// Cached GET returning body and response headers (pagination needs
    /// the Link header).
    pub async fn request_with_headers(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<(Value, Headers), ApiError> {
        let key = cache_key(url, params);
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(&key) {
                debug!(url, "API cache hit");
                return Ok(hit.clone());
            }
        }

        let (body, headers) = match self.execute(url, params, None).await? {
            (Some(body), headers) => (body, headers),
            // 304 cannot happen without an If-None-Match.
            (None, headers) => (Value::Null, headers),
        };

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(key, (body.clone(), headers.clone()));
        Ok((body, headers))
    }

    /// Uncached GET. The monitor re-fetches the same endpoints every tick
    /// and must see current data, not the run cache.
    pub async fn request_fresh_with_headers(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<(Value, Headers), ApiError> {
        match self.execute(url, params, None).await? {
            (Some(body), headers) => Ok((body, headers)),
            (None, headers) => Ok((Value::Null, headers)),
        }
    }

    /// Conditional GET for event polling. Not cached: the whole point is
    /// asking the server what changed. A 304 yields `None`.
    pub async fn request_conditional(
        &self,
        url: &str,
        params: &[(String, String)],
        etag: Option<&str>,
    ) -> Result<(Option<Value>, ResponseMeta), ApiError> {
        let (body, headers) = self.execute(url, params, etag).await?;
        let meta = ResponseMeta {
            etag: headers.get("etag").cloned(),
            poll_interval_secs: headers
                .get("x-poll-interval")
                .and_then(|v| v.parse::<u64>().ok()),
        };
        Ok((body, meta))
    }

    async fn execute(
        &self,
        url: &str,
        params: &[(String, String)],
        etag: Option<&str>,
    ) -> Result<(Option<Value>, Headers), ApiError> {
        self.wait_for_quota().await?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let resp = match self.transport.get(url, params, etag).await {
                Ok(resp) => resp,
                Err(err) => {
                    if !err.is_retryable() || attempt >= RETRY_LIMIT {
                        return Err(err);
                    }
                    let delay = backoff_delay(attempt);
                    warn!(url, error = %err, attempt, "Transport error, backing off {:?}", delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            {
                let mut limits = self.limits.lock().unwrap_or_else(|e| e.into_inner());
                limits.update_from(&resp.headers);
            }

            match resp.status {
                200 => {
                    let body: Value = serde_json::from_str(&resp.body).map_err(|e| ApiError {
                        kind: ApiErrorKind::Unknown,
                        status: Some(200),
                        message: format!("Invalid JSON from {}: {}", url, e),
                        retry_after_secs: None,
                    })?;
                    return Ok((Some(body), resp.headers));
                }
                304 => return Ok((None, resp.headers)),
                401 => {
                    return Err(ApiError::auth(
                        "Authentication failed. Add or fix the GitHub token.",
                    ))
                }
                403 | 429 => {
                    // A 403 without rate-limit signature is a permissions
                    // problem, not a quota one.
                    if !is_rate_limited(&resp) {
                        return Err(ApiError::auth(format!(
                            "Forbidden: {}",
                            truncated(&resp.body)
                        )));
                    }
                    if attempt >= RETRY_LIMIT {
                        return Err(ApiError::rate_limited(
                            format!("Exceeded retry limit ({}) for {}", RETRY_LIMIT, url),
                            None,
                        ));
                    }
                    let wait = rate_limit_wait(&resp.headers);
                    self.check_unattended(wait)?;
                    if attempt > 1 {
                        debug!(url, attempt, limit = RETRY_LIMIT, "Rate-limit retry");
                    }
                    warn!(url, wait_secs = wait.as_secs(), "Rate limited, waiting for reset");
                    tokio::time::sleep(wait).await;
                }
                500 | 502 | 503 | 504 => {
                    if attempt >= RETRY_LIMIT {
                        return Err(ApiError::from_status(resp.status, &resp.body));
                    }
                    let delay = backoff_delay(attempt);
                    warn!(url, status = resp.status, attempt, "Server error, backing off {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
                status => return Err(ApiError::from_status(status, &resp.body)),
            }
        }
    }

    /// Pre-flight quota check: if the last response said the budget is
    /// spent, block until the published reset rather than burning a request
    /// on a guaranteed 403.
    async fn wait_for_quota(&self) -> Result<(), ApiError> {
        let wait = {
            let limits = self.limits.lock().unwrap_or_else(|e| e.into_inner());
            match (limits.remaining, limits.reset_at) {
                (Some(0), Some(reset)) => {
                    let now = unix_now();
                    if reset > now {
                        Some(Duration::from_secs(reset - now))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        if let Some(wait) = wait {
            self.check_unattended(wait)?;
            warn!(wait_secs = wait.as_secs(), "Quota exhausted, blocking until reset");
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }

    fn check_unattended(&self, wait: Duration) -> Result<(), ApiError> {
        if let Some(timeout) = self.unattended_timeout {
            if wait > timeout {
                return Err(ApiError::rate_limited(
                    format!(
                        "Rate-limit reset is {}s away, past the unattended timeout of {}s",
                        wait.as_secs(),
                        timeout.as_secs()
                    ),
                    Some(wait.as_secs()),
                ));
            }
        }
        Ok(())
    }
}

fn cache_key(url: &str, params: &[(String, String)]) -> String {
    let mut key = url.to_string();
    for (k, v) in params {
        key.push('\u{1f}');
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }
    key
}

fn is_rate_limited(resp: &RawResponse) -> bool {
    resp.status == 429
        || resp.header("retry-after").is_some()
        || resp.header("x-ratelimit-remaining") == Some("0")
        || resp.body.contains("rate limit")
}

/// How long to wait before retrying a rate-limited request: the secondary
/// limit's Retry-After wins, then the primary limit's reset timestamp, then
/// the search-endpoint fallback.
fn rate_limit_wait(headers: &Headers) -> Duration {
    if let Some(secs) = headers.get("retry-after").and_then(|v| v.parse::<u64>().ok()) {
        return Duration::from_secs(secs);
    }
    if headers.get("x-ratelimit-remaining").map(String::as_str) == Some("0") {
        if let Some(reset) = headers
            .get("x-ratelimit-reset")
            .and_then(|v| v.parse::<u64>().ok())
        {
            let now = unix_now();
            return Duration::from_secs(reset.saturating_sub(now).max(1));
        }
    }
    Duration::from_secs(FALLBACK_WAIT_SECS)
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs((1u64 << attempt.min(6)).min(60))
}

fn truncated(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((i, _)) => &body[..i],
        None => body,
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
