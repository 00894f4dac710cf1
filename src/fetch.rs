use serde_json::Value;
use tracing::{info, warn};

use crate::api::{ApiClient, Params, ResponseMeta, ITEMS_PER_PAGE};
use crate::error::ApiError;
use crate::models::{CommitRecord, ContributorEdge, ProfileSnapshot, RepositoryRecord};
use crate::pagination::Paginator;

/// Typed wrappers over the GitHub endpoints the pipeline consumes.
pub struct GithubFetcher<'a> {
    client: &'a ApiClient,
    base_url: String,
}

fn per_page() -> Params {
    vec![("per_page".to_string(), ITEMS_PER_PAGE.to_string())]
}

impl<'a> GithubFetcher<'a> {
    pub fn new(client: &'a ApiClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn client(&self) -> &ApiClient {
        self.client
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Basic profile lookup. A failure here means the account itself is
    /// unreachable and the run cannot proceed.
    pub async fn profile(&self, login: &str) -> Result<ProfileSnapshot, ApiError> {
        let body = self.client.request(&self.url(&format!("/users/{}", login)), &[]).await?;
        ProfileSnapshot::from_json(&body).ok_or_else(|| ApiError {
            kind: crate::error::ApiErrorKind::Unknown,
            status: None,
            message: format!("Unexpected profile payload for {}", login),
            retry_after_secs: None,
        })
    }

    pub async fn followers(&self, login: &str, limit: usize) -> (Vec<String>, Option<ApiError>) {
        self.login_list(&format!("/users/{}/followers", login), limit).await
    }

    pub async fn following(&self, login: &str, limit: usize) -> (Vec<String>, Option<ApiError>) {
        self.login_list(&format!("/users/{}/following", login), limit).await
    }

    async fn login_list(&self, path: &str, limit: usize) -> (Vec<String>, Option<ApiError>) {
        let pager = Paginator::new(self.client, self.url(path), per_page(), Some(limit));
        let (items, error) = pager.collect_remaining().await;
        let logins = items
            .iter()
            .filter_map(|v| v["login"].as_str().map(String::from))
            .collect();
        (logins, error)
    }

    pub async fn repositories(
        &self,
        login: &str,
        limit: usize,
    ) -> (Vec<RepositoryRecord>, Option<ApiError>) {
        let url = self.url(&format!("/users/{}/repos", login));
        let pager = Paginator::new(self.client, url, per_page(), Some(limit));
        let (items, error) = pager.collect_remaining().await;
        let repos: Vec<RepositoryRecord> = items
            .iter()
            .filter_map(RepositoryRecord::from_json)
            .collect();
        info!(login, count = repos.len(), "Fetched repository list");
        (repos, error)
    }

    /// Commit history through the API, bounded by `depth` as the
    /// commit-depth equivalent of a shallow clone.
    pub async fn commits_via_api(
        &self,
        owner: &str,
        repo: &str,
        depth: usize,
    ) -> (Vec<CommitRecord>, Option<ApiError>) {
        let url = self.url(&format!("/repos/{}/{}/commits", owner, repo));
        let pager = Paginator::new(self.client, url, per_page(), Some(depth));
        let (items, error) = pager.collect_remaining().await;
        let commits = items
            .iter()
            .filter_map(|v| CommitRecord::from_api_json(repo, v))
            .collect();
        (commits, error)
    }

    pub async fn contributors(
        &self,
        owner: &str,
        repo: &str,
    ) -> (Vec<ContributorEdge>, Option<ApiError>) {
        let url = self.url(&format!("/repos/{}/{}/contributors", owner, repo));
        let pager = Paginator::new(self.client, url, per_page(), None);
        let (items, error) = pager.collect_remaining().await;
        let edges = items
            .iter()
            .filter_map(|v| {
                Some(ContributorEdge {
                    repo: repo.to_string(),
                    login: v["login"].as_str()?.to_string(),
                    contributions: v["contributions"].as_u64().unwrap_or(0),
                })
            })
            .collect();
        (edges, error)
    }

    /// One-shot commit search; returns the reported total and the first
    /// page of matches.
    pub async fn search_commits(&self, query: &str) -> Result<(u64, Vec<Value>), ApiError> {
        let mut params = per_page();
        params.push(("q".to_string(), query.to_string()));
        let body = self.client.request(&self.url("/search/commits"), &params).await?;
        let total = body["total_count"].as_u64().unwrap_or(0);
        let items = body["items"].as_array().cloned().unwrap_or_default();
        Ok((total, items))
    }

    /// All pull requests the account authored, via the issue-search API.
    pub async fn search_user_pull_requests(&self, login: &str) -> (Vec<Value>, Option<ApiError>) {
        let mut params = per_page();
        params.push(("q".to_string(), format!("type:pr author:{}", login)));
        let pager = Paginator::new(self.client, self.url("/search/issues"), params, None);
        pager.collect_remaining().await
    }

    /// All commits the account authored anywhere, via the commit-search API.
    pub async fn search_user_commits(&self, login: &str) -> (Vec<Value>, Option<ApiError>) {
        let mut params = per_page();
        params.push(("q".to_string(), format!("author:{}", login)));
        let pager = Paginator::new(self.client, self.url("/search/commits"), params, None);
        pager.collect_remaining().await
    }

    /// Profile lookup that bypasses the run cache; used by the monitor,
    /// which exists to observe change.
    pub async fn profile_fresh(&self, login: &str) -> Result<ProfileSnapshot, ApiError> {
        let (body, _) = self
            .client
            .request_fresh_with_headers(&self.url(&format!("/users/{}", login)), &[])
            .await?;
        ProfileSnapshot::from_json(&body).ok_or_else(|| ApiError {
            kind: crate::error::ApiErrorKind::Unknown,
            status: None,
            message: format!("Unexpected profile payload for {}", login),
            retry_after_secs: None,
        })
    }

    /// Uncached follower listing for monitor diffs, manually paged up to
    /// `limit`.
    pub async fn followers_fresh(&self, login: &str, limit: usize) -> Result<Vec<String>, ApiError> {
        let mut logins = Vec::new();
        let mut url = self.url(&format!("/users/{}/followers", login));
        let mut params = per_page();
        loop {
            let (body, headers) = self.client.request_fresh_with_headers(&url, &params).await?;
            let page: Vec<String> = body
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|v| v["login"].as_str().map(String::from))
                .collect();
            if page.is_empty() {
                break;
            }
            logins.extend(page);
            if logins.len() >= limit {
                logins.truncate(limit);
                break;
            }
            match crate::pagination::next_link(&headers) {
                Some(next) => {
                    url = next;
                    params = Vec::new();
                }
                None => break,
            }
        }
        Ok(logins)
    }

    /// Conditional event poll. `None` body means nothing changed since the
    /// supplied ETag.
    pub async fn user_events(
        &self,
        login: &str,
        etag: Option<&str>,
    ) -> Result<(Option<Vec<Value>>, ResponseMeta), ApiError> {
        let url = self.url(&format!("/users/{}/events", login));
        let (body, meta) = self.client.request_conditional(&url, &per_page(), etag).await?;
        let events = match body {
            Some(Value::Array(events)) => Some(events),
            Some(other) => {
                warn!(login, "Unexpected events payload shape: {}", other);
                Some(Vec::new())
            }
            None => None,
        };
        Ok((events, meta))
    }
}
