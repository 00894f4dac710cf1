use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::config::AnalyzerConfig;
use crate::error::ApiError;
use crate::fetch::GithubFetcher;
use crate::models::{EventKind, EventRecord, ProfileChange, ProfileSnapshot};

/// Profile fields the monitor diffs tick to tick.
const DIFF_FIELDS: &[&str] = &[
    "name",
    "company",
    "blog",
    "location",
    "email",
    "bio",
    "twitter_username",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Initializing,
    Polling,
    Stopped,
}

/// Per-account polling cursor: what the last tick saw.
#[derive(Debug, Default)]
struct AccountCursor {
    etag: Option<String>,
    profile: Option<ProfileSnapshot>,
    followers: BTreeSet<String>,
    last_event_at: Option<DateTime<Utc>>,
    baseline_done: bool,
}

/// Continuous activity monitor. The first tick per account establishes a
/// baseline (lookback window of events, current profile, current follower
/// set) without emitting diffs; every later tick emits EventRecords for new
/// events, profile field changes, and follower additions. Follower removals
/// are deliberately not surfaced.
///
/// Cancellation is cooperative and observed between ticks only; an
/// in-flight fetch always completes.
pub struct Monitor<'a> {
    fetcher: GithubFetcher<'a>,
    config: AnalyzerConfig,
    accounts: Vec<String>,
    cursors: HashMap<String, AccountCursor>,
    state: MonitorState,
    /// Largest X-Poll-Interval hint seen; respected when it exceeds the
    /// configured interval.
    poll_hint_secs: Option<u64>,
}

impl<'a> Monitor<'a> {
    pub fn new(client: &'a ApiClient, config: &AnalyzerConfig, accounts: Vec<String>) -> Self {
        Self {
            fetcher: GithubFetcher::new(client, &config.api.base_url),
            config: config.clone(),
            accounts,
            cursors: HashMap::new(),
            state: MonitorState::Initializing,
            poll_hint_secs: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Poll until `shutdown` flips to true. Emitted records go to `tx`;
    /// the caller owns their persistence. Returns the final state.
    pub async fn run(
        mut self,
        tx: mpsc::UnboundedSender<EventRecord>,
        mut shutdown: watch::Receiver<bool>,
    ) -> MonitorState {
        info!(accounts = ?self.accounts, "Monitor starting");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let accounts = self.accounts.clone();
            for account in &accounts {
                match self.tick_account(account).await {
                    Ok(events) => {
                        for event in events {
                            info!(account = %account, "{}", event.description);
                            if tx.send(event).is_err() {
                                // Receiver gone; nobody is listening.
                                self.state = MonitorState::Stopped;
                                return self.state;
                            }
                        }
                    }
                    Err(err) => {
                        warn!(account = %account, error = %err, "Monitor tick failed, will retry next interval");
                    }
                }
            }

            let interval = self
                .config
                .monitor
                .poll_interval_secs
                .max(self.poll_hint_secs.unwrap_or(0));
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!("Monitor stopped");
        self.state = MonitorState::Stopped;
        self.state
    }

    /// One poll of one account. Public within the crate so tests can drive
    /// ticks without the timer.
    pub(crate) async fn tick_account(&mut self, login: &str) -> Result<Vec<EventRecord>, ApiError> {
        let profile = self.fetcher.profile_fresh(login).await?;

        let etag = self.cursors.get(login).and_then(|c| c.etag.clone());
        let (raw_events, meta) = self.fetcher.user_events(login, etag.as_deref()).await?;
        if let Some(hint) = meta.poll_interval_secs {
            self.poll_hint_secs = Some(self.poll_hint_secs.unwrap_or(0).max(hint));
        }

        let followers: BTreeSet<String> = self
            .fetcher
            .followers_fresh(login, self.config.monitor.max_followers)
            .await?
            .into_iter()
            .collect();

        // Every fetch succeeded; only now may the cursor advance. A failed
        // tick leaves no trace, so a retry re-reads the full feed instead
        // of 304ing against an ETag whose events were never processed.
        let cursor = self.cursors.entry(login.to_string()).or_default();
        cursor.etag = meta.etag.or(etag);

        let mut emitted = if !cursor.baseline_done {
            // Baseline: the lookback window of events, no diffs.
            let cutoff = Utc::now() - chrono::Duration::days(self.config.monitor.lookback_days);
            let events = process_events(login, raw_events.as_deref().unwrap_or(&[]), Some(cutoff));
            cursor.followers = followers;
            cursor.profile = Some(profile);
            cursor.baseline_done = true;
            // Anchor the cursor so a later tick never re-reports feed items
            // that were already present at baseline.
            cursor.last_event_at = Some(Utc::now());
            self.state = MonitorState::Polling;
            events
        } else {
            let since = cursor.last_event_at;
            let mut events = process_events(login, raw_events.as_deref().unwrap_or(&[]), since);

            if let Some(previous) = &cursor.profile {
                for change in diff_profiles(previous, &profile) {
                    events.push(EventRecord {
                        timestamp: Utc::now(),
                        kind: EventKind::ProfileUpdate,
                        login: login.to_string(),
                        repo: None,
                        description: format!(
                            "{} changed their {} from {:?} to {:?}",
                            login, change.field, change.old, change.new
                        ),
                        change: Some(change),
                    });
                }
            }

            // Additions only; removals are not surfaced.
            for follower in followers.difference(&cursor.followers) {
                events.push(EventRecord {
                    timestamp: Utc::now(),
                    kind: EventKind::Follow,
                    login: login.to_string(),
                    repo: None,
                    description: format!("{} is now followed by {}", login, follower),
                    change: None,
                });
            }
            cursor.followers = followers;
            cursor.profile = Some(profile);
            events
        };

        emitted.sort_by_key(|e| e.timestamp);
        if let Some(last) = emitted.last() {
            cursor.last_event_at = Some(
                cursor
                    .last_event_at
                    .map_or(last.timestamp, |prev| prev.max(last.timestamp)),
            );
        }
        Ok(emitted)
    }
}

/// Field-level diff between two profile snapshots.
pub fn diff_profiles(old: &ProfileSnapshot, new: &ProfileSnapshot) -> Vec<ProfileChange> {
    let field = |p: &ProfileSnapshot, name: &str| -> Option<String> {
        match name {
            "name" => p.name.clone(),
            "company" => p.company.clone(),
            "blog" => p.blog.clone(),
            "location" => p.location.clone(),
            "email" => p.email.clone(),
            "bio" => p.bio.clone(),
            "twitter_username" => p.twitter_username.clone(),
            _ => None,
        }
    };

    DIFF_FIELDS
        .iter()
        .filter_map(|&name| {
            let old_value = field(old, name);
            let new_value = field(new, name);
            (old_value != new_value).then(|| ProfileChange {
                field: name.to_string(),
                old: old_value,
                new: new_value,
            })
        })
        .collect()
}

/// Normalize raw API events into EventRecords, newest-last. Events at or
/// before `since` are dropped.
pub(crate) fn process_events(
    login: &str,
    raw: &[Value],
    since: Option<DateTime<Utc>>,
) -> Vec<EventRecord> {
    let mut events: Vec<EventRecord> = raw
        .iter()
        .filter_map(|event| {
            let timestamp = event["created_at"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))?;
            if let Some(cutoff) = since {
                if timestamp <= cutoff {
                    return None;
                }
            }
            let repo = event["repo"]["name"].as_str().map(String::from);
            let (kind, description) = interpret_event(event, repo.as_deref());
            Some(EventRecord {
                timestamp,
                kind,
                login: login.to_string(),
                repo,
                description,
                change: None,
            })
        })
        .collect();
    events.sort_by_key(|e| e.timestamp);
    events
}

/// Turn one raw API event into a kind plus a human-readable line.
fn interpret_event(event: &Value, repo: Option<&str>) -> (EventKind, String) {
    let actor = event["actor"]["login"].as_str().unwrap_or("unknown");
    let repo = repo.unwrap_or("unknown");
    let payload = &event["payload"];
    let action = payload["action"].as_str().unwrap_or("updated");

    match event["type"].as_str().unwrap_or_default() {
        "WatchEvent" => (EventKind::Star, format!("{} starred {}", actor, repo)),
        "PushEvent" => {
            let count = payload["commits"].as_array().map(Vec::len).unwrap_or(0);
            (EventKind::Push, format!("{} pushed to {}. Commits: {}", actor, repo, count))
        }
        "ForkEvent" => (EventKind::Fork, format!("{} forked {}", actor, repo)),
        "CreateEvent" => {
            let ref_type = payload["ref_type"].as_str().unwrap_or("ref");
            (EventKind::Create, format!("{} created a {} in {}", actor, ref_type, repo))
        }
        "DeleteEvent" => {
            let ref_type = payload["ref_type"].as_str().unwrap_or("ref");
            (EventKind::Delete, format!("{} deleted a {} in {}", actor, ref_type, repo))
        }
        "IssuesEvent" => (EventKind::Issue, format!("{} {} an issue in {}", actor, action, repo)),
        "IssueCommentEvent" => {
            (EventKind::Issue, format!("{} commented on an issue in {}", actor, repo))
        }
        "PullRequestEvent" => (
            EventKind::PullRequest,
            format!("{} {} a pull request in {}", actor, action, repo),
        ),
        "PullRequestReviewEvent" => (
            EventKind::PullRequest,
            format!("{} reviewed a pull request in {}", actor, repo),
        ),
        "PullRequestReviewCommentEvent" => (
            EventKind::PullRequest,
            format!("{} commented on a pull request review in {}", actor, repo),
        ),
        "ReleaseEvent" => (EventKind::Other, format!("{} {} a release in {}", actor, action, repo)),
        "PublicEvent" => (EventKind::Other, format!("{} made {} public", actor, repo)),
        other => (EventKind::Other, format!("{}: {} in {}", other, actor, repo)),
    }
}
