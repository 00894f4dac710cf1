use std::path::PathBuf;

use serde::Deserialize;

/// Analyzer configuration. The consumer (CLI) is responsible for locating
/// and reading the config file; every section falls back to defaults so an
/// empty document is valid.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AnalyzerConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub clone: CloneConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// Personal access token. Unauthenticated runs work but hit the 60
    /// requests/hour ceiling almost immediately.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// When set, an exhausted quota fails fast once the published reset is
    /// further away than this, instead of blocking an unattended run.
    #[serde(default)]
    pub unattended_timeout_secs: Option<u64>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: default_base_url(),
            unattended_timeout_secs: None,
        }
    }
}

fn default_base_url() -> String {
    "https://api.github.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_followers")]
    pub max_followers: usize,
    #[serde(default = "default_max_following")]
    pub max_following: usize,
    #[serde(default = "default_max_repositories")]
    pub max_repositories: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_followers: default_max_followers(),
            max_following: default_max_following(),
            max_repositories: default_max_repositories(),
        }
    }
}

fn default_max_followers() -> usize {
    500
}

fn default_max_following() -> usize {
    500
}

fn default_max_repositories() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct CloneConfig {
    /// When false, commit history comes from the API commits endpoint
    /// instead of a local clone. The clone path sees history the API
    /// windowing can hide, at the cost of disk and bandwidth.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_clone_depth")]
    pub depth: u32,
    #[serde(default = "default_true")]
    pub bare: bool,
    #[serde(default = "default_true")]
    pub remove_after_harvest: bool,
    #[serde(default)]
    pub include_forks: bool,
    /// Where clones land; defaults to the system temp directory when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_git_binary")]
    pub git_binary: String,
    #[serde(default = "default_clone_timeout")]
    pub timeout_secs: u64,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            depth: default_clone_depth(),
            bare: true,
            remove_after_harvest: true,
            include_forks: false,
            dir: None,
            git_binary: default_git_binary(),
            timeout_secs: default_clone_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_clone_depth() -> u32 {
    100
}

fn default_git_binary() -> String {
    "git".to_string()
}

fn default_clone_timeout() -> u64 {
    300
}

/// Scope of the copied-commit search. Off by default: each candidate
/// message costs one search-API request, and the search quota is tiny.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommitSearchScope {
    #[default]
    Off,
    All,
    Repository,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SearchConfig {
    #[serde(default)]
    pub commit_search: CommitSearchScope,
    /// Target when `commit_search = "repository"`.
    #[serde(default)]
    pub repository: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    /// Cap on how many followers are pulled per tick for the new-follower
    /// diff. Accounts beyond this still get event/profile monitoring.
    #[serde(default = "default_monitor_max_followers")]
    pub max_followers: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            lookback_days: default_lookback_days(),
            max_followers: default_monitor_max_followers(),
        }
    }
}

fn default_poll_interval() -> u64 {
    60
}

fn default_lookback_days() -> i64 {
    90
}

fn default_monitor_max_followers() -> usize {
    500
}
