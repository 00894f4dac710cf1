use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Profile fields captured once per run (and re-captured per monitor tick).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileSnapshot {
    pub login: String,
    pub name: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub company: Option<String>,
    pub blog: Option<String>,
    pub email: Option<String>,
    pub twitter_username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub followers: u64,
    pub following: u64,
}

impl ProfileSnapshot {
    /// Parse from the `/users/{login}` response body.
    pub fn from_json(body: &Value) -> Option<Self> {
        Some(Self {
            login: body["login"].as_str()?.to_string(),
            name: opt_str(&body["name"]),
            location: opt_str(&body["location"]),
            bio: opt_str(&body["bio"]),
            company: opt_str(&body["company"]),
            blog: opt_str(&body["blog"]),
            email: opt_str(&body["email"]),
            twitter_username: opt_str(&body["twitter_username"]),
            created_at: parse_timestamp(&body["created_at"])?,
            updated_at: parse_timestamp(&body["updated_at"]),
            followers: body["followers"].as_u64().unwrap_or(0),
            following: body["following"].as_u64().unwrap_or(0),
        })
    }
}

/// One repository from the account's repository listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub name: String,
    pub owner: String,
    pub fork: bool,
    pub default_branch: Option<String>,
    pub language: Option<String>,
    pub stargazers: u64,
    pub forks: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub pushed_at: Option<DateTime<Utc>>,
    pub clone_url: String,
}

impl RepositoryRecord {
    pub fn from_json(body: &Value) -> Option<Self> {
        Some(Self {
            name: body["name"].as_str()?.to_string(),
            owner: body["owner"]["login"].as_str().unwrap_or_default().to_string(),
            fork: body["fork"].as_bool().unwrap_or(false),
            default_branch: opt_str(&body["default_branch"]),
            language: opt_str(&body["language"]),
            stargazers: body["stargazers_count"].as_u64().unwrap_or(0),
            forks: body["forks_count"].as_u64().unwrap_or(0),
            created_at: parse_timestamp(&body["created_at"]),
            pushed_at: parse_timestamp(&body["pushed_at"]),
            clone_url: body["clone_url"].as_str().unwrap_or_default().to_string(),
        })
    }
}

/// One commit, from either `git log` or the API commits endpoint.
/// Never mutated after creation; `repo` refers to a RepositoryRecord by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    pub repo: String,
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    pub committer_name: String,
    pub committer_email: String,
    pub authored_at: DateTime<Utc>,
    pub message: String,
}

impl CommitRecord {
    /// Parse from one element of the `/repos/{owner}/{repo}/commits`
    /// response.
    pub fn from_api_json(repo: &str, body: &Value) -> Option<Self> {
        let commit = &body["commit"];
        Some(Self {
            repo: repo.to_string(),
            sha: body["sha"].as_str()?.to_string(),
            author_name: commit["author"]["name"].as_str().unwrap_or_default().to_string(),
            author_email: commit["author"]["email"].as_str().unwrap_or_default().to_string(),
            committer_name: commit["committer"]["name"].as_str().unwrap_or_default().to_string(),
            committer_email: commit["committer"]["email"].as_str().unwrap_or_default().to_string(),
            authored_at: parse_timestamp(&commit["author"]["date"])?,
            message: commit["message"].as_str().unwrap_or_default().to_string(),
        })
    }
}

/// One normalized email with everything it has been observed with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityEntry {
    pub email: String,
    pub names: BTreeSet<String>,
    pub repos: BTreeSet<String>,
}

/// Contributor login attached to one repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributorEdge {
    pub repo: String,
    pub login: String,
    pub contributions: u64,
}

/// Advisory detector output. Presence is the signal; no numeric score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeuristicFlag {
    /// First commit (or repo creation) predates the account itself.
    TemporalAnomaly {
        repo: String,
        commit_sha: Option<String>,
        commit_date: DateTime<Utc>,
        account_created_at: DateTime<Utc>,
        /// Rebased or transferred history produces the same signature, so
        /// this stays a lead for human review.
        note: String,
    },
    /// An owned, non-forked repository has contributors besides the owner.
    ContributorAnomaly {
        repo: String,
        outside_logins: Vec<String>,
    },
    /// Commit message found verbatim in other repositories via search.
    CopiedCommit {
        repo: String,
        message: String,
        search_results: u64,
        matching_repos: Vec<String>,
    },
    /// Summary of access failures by kind, with the DMCA/deleted/empty
    /// co-occurrence called out for review.
    AccessErrorCluster {
        counts: BTreeMap<RepoErrorKind, usize>,
        suspicious_pattern: bool,
    },
}

/// Why a repository could not be harvested. Recorded, never fatal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RepoErrorKind {
    Clone,
    Dmca,
    NotFound,
    Network,
    EmptyRepo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoError {
    pub repo: String,
    pub kind: RepoErrorKind,
    pub message: String,
}

/// Activity observed while monitoring, ordered by timestamp ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub login: String,
    pub repo: Option<String>,
    pub description: String,
    /// Present only for profile-update events.
    pub change: Option<ProfileChange>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Follow,
    Push,
    Fork,
    Star,
    Issue,
    PullRequest,
    ProfileUpdate,
    Create,
    Delete,
    Other,
}

/// Field-level diff for a profile-update event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileChange {
    pub field: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Pull requests or commits the account authored in repositories it does
/// not own. `repo` is `owner/name`; `items` are PR URLs or commit SHAs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossRepoActivity {
    pub repo: String,
    pub items: Vec<String>,
}

/// The terminal aggregate of one analysis run. Immutable once built; the
/// consumer owns serialization to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub profile: ProfileSnapshot,
    pub original_repos_count: usize,
    pub forked_repos_count: usize,
    pub followers: Vec<String>,
    pub following: Vec<String>,
    pub mutual_followers: Vec<String>,
    /// Non-forked repository names; disjoint from `forked_repo_list`.
    pub repo_list: Vec<String>,
    pub forked_repo_list: Vec<String>,
    pub repos: Vec<RepositoryRecord>,
    /// Harvested commits per repository name, newest first.
    pub commits: BTreeMap<String, Vec<CommitRecord>>,
    pub unique_emails: Vec<IdentityEntry>,
    /// Advisory owner/contributor/unknown attribution of `unique_emails`.
    pub email_categories: crate::identity::EmailCategories,
    pub contributors: Vec<ContributorEdge>,
    pub flags: Vec<HeuristicFlag>,
    pub pull_requests_to_other_repos: Vec<CrossRepoActivity>,
    pub commits_to_other_repos: Vec<CrossRepoActivity>,
    pub recent_events: Vec<EventRecord>,
    pub errors: Vec<RepoError>,
}

fn opt_str(v: &Value) -> Option<String> {
    v.as_str().filter(|s| !s.is_empty()).map(String::from)
}

fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    v.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
