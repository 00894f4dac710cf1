//! Test infrastructure: MockTransport plus JSON and git fixtures.
//!
//! MockTransport scripts a FIFO queue of responses per URL and records
//! every request, so tests can assert both the data flow and the exact
//! number of network round trips.

use std::collections::{HashMap, VecDeque};
use std::process::Command;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::api::{Headers, HttpTransport, Params, RawResponse};
use crate::error::ApiError;

/// Route test log output through RUST_LOG. Safe to call from every test;
/// only the first call wins.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// A recorded call to `MockTransport::get()`.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct RecordedCall {
    pub url: String,
    pub params: Params,
    pub etag: Option<String>,
}

/// One scripted response. Construct via [`json_response`],
/// [`page_response`], or [`MockTransport::status`], then adjust `headers`
/// as needed.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: String,
}

/// Scripted HTTP transport. Each URL holds a FIFO queue of responses;
/// a request for a URL with nothing queued gets a 404.
pub struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a response for `url`. Responses for the same URL are served
    /// in push order.
    pub fn push(&self, url: &str, response: MockResponse) {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    /// Handle onto the call log; clone before handing the transport to a
    /// client.
    pub fn calls(&self) -> Arc<Mutex<Vec<RecordedCall>>> {
        Arc::clone(&self.calls)
    }

    /// A bare response with the given status and body.
    pub fn status(status: u16, body: &str) -> MockResponse {
        MockResponse {
            status,
            headers: Headers::new(),
            body: body.to_string(),
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(
        &self,
        url: &str,
        params: &[(String, String)],
        etag: Option<&str>,
    ) -> Result<RawResponse, ApiError> {
        self.calls.lock().unwrap().push(RecordedCall {
            url: url.to_string(),
            params: params.to_vec(),
            etag: etag.map(String::from),
        });

        let response = self
            .routes
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| MockTransport::status(404, r#"{"message": "Not Found"}"#));

        Ok(RawResponse {
            status: response.status,
            headers: response.headers,
            body: response.body,
        })
    }
}

/// A 200 response carrying the given JSON body.
pub fn json_response(body: Value) -> MockResponse {
    MockResponse {
        status: 200,
        headers: Headers::new(),
        body: body.to_string(),
    }
}

/// A 200 listing page. When `next` is given, a `Link` header in GitHub's
/// pagination format points at it.
pub fn page_response(items: Vec<Value>, next: Option<&str>) -> MockResponse {
    let mut response = json_response(Value::Array(items));
    if let Some(next_url) = next {
        response.headers.insert(
            "link".to_string(),
            format!("<{}>; rel=\"next\", <{}>; rel=\"last\"", next_url, next_url),
        );
    }
    response
}

// ---------------------------------------------------------------------------
// JSON fixtures
// ---------------------------------------------------------------------------

pub fn profile_json(login: &str, created_at: &str) -> Value {
    json!({
        "login": login,
        "name": null,
        "company": null,
        "blog": "",
        "location": null,
        "email": null,
        "bio": null,
        "twitter_username": null,
        "created_at": created_at,
        "updated_at": created_at,
        "followers": 2,
        "following": 1,
    })
}

pub fn repo_json(name: &str, owner: &str, fork: bool) -> Value {
    json!({
        "name": name,
        "owner": {"login": owner},
        "fork": fork,
        "default_branch": "main",
        "language": "Rust",
        "stargazers_count": 0,
        "forks_count": 0,
        "created_at": "2020-01-01T00:00:00Z",
        "pushed_at": "2024-01-01T00:00:00Z",
        "clone_url": format!("https://github.com/{}/{}.git", owner, name),
    })
}

pub fn event_json(kind: &str, actor: &str, repo: &str, created_at: &str) -> Value {
    json!({
        "type": kind,
        "actor": {"login": actor},
        "repo": {"name": repo},
        "payload": {},
        "created_at": created_at,
    })
}

// ---------------------------------------------------------------------------
// Git fixtures
// ---------------------------------------------------------------------------

/// Build a real git repository in a temp directory with one empty commit
/// per message, oldest first. Panics on any git failure; tests that use
/// this need a `git` binary on PATH.
pub fn local_git_repo(messages: &[&str]) -> TempDir {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path();

    git(path, &["init", "--quiet"]);
    git(path, &["config", "user.name", "Tester"]);
    git(path, &["config", "user.email", "tester@example.com"]);
    git(path, &["config", "commit.gpgsign", "false"]);
    for message in messages {
        git(path, &["commit", "--quiet", "--allow-empty", "-m", message]);
    }
    dir
}

fn git(dir: &std::path::Path, args: &[&str]) {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .expect("run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}
