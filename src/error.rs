use std::fmt;

/// Classified GitHub API error. Tells the caller *why* a request failed
/// so it can pick the right recovery strategy.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Seconds to wait before retrying (from a Retry-After header or the
    /// published rate-limit reset).
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// 401, or 403 without rate-limit headers: bad or missing token.
    Auth,
    /// 403/429 with rate-limit headers; check retry_after_secs.
    RateLimit,
    /// 404: deleted account/repository or never existed.
    NotFound,
    /// 451: repository taken down (DMCA).
    Dmca,
    /// Request timeout, or 408.
    Timeout,
    /// Connection refused, DNS failure, reset, etc.
    Network,
    /// 500/502/503/504: GitHub-side outage.
    Server,
    /// Anything else.
    Unknown,
}

impl ApiError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 => ApiErrorKind::Auth,
            403 | 429 => ApiErrorKind::RateLimit,
            404 => ApiErrorKind::NotFound,
            408 => ApiErrorKind::Timeout,
            451 => ApiErrorKind::Dmca,
            500 | 502 | 503 | 504 => ApiErrorKind::Server,
            _ => ApiErrorKind::Unknown,
        };

        Self {
            kind,
            status: Some(status),
            message: truncate_body(body),
            retry_after_secs: None,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Auth,
            status: None,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        Self {
            kind: ApiErrorKind::RateLimit,
            status: Some(403),
            message: message.into(),
            retry_after_secs,
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ApiErrorKind::Timeout
        } else {
            ApiErrorKind::Network
        };
        Self {
            kind,
            status: None,
            message: err.to_string(),
            retry_after_secs: None,
        }
    }

    /// Whether this error is worth retrying against the same endpoint.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ApiErrorKind::RateLimit
                | ApiErrorKind::Timeout
                | ApiErrorKind::Network
                | ApiErrorKind::Server
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "GitHub API error ({}, {:?}): {}", status, self.kind, self.message)
        } else {
            write!(f, "GitHub API error ({:?}): {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for ApiError {}

fn truncate_body(body: &str) -> String {
    if body.len() > 300 {
        let cut = body
            .char_indices()
            .take_while(|(i, _)| *i <= 300)
            .last()
            .map(|(i, _)| i)
            .unwrap_or(0);
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}
