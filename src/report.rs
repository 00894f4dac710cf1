use std::collections::{BTreeMap, BTreeSet};

use anyhow::Context;
use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::config::{AnalyzerConfig, CommitSearchScope};
use crate::error::{ApiError, ApiErrorKind};
use crate::fetch::GithubFetcher;
use crate::harvest::RepoHarvester;
use crate::heuristics;
use crate::identity::IdentityRegistry;
use crate::models::{
    CommitRecord, ContributorEdge, CrossRepoActivity, RepoError, RepoErrorKind, Report,
};
use crate::monitor;

/// One-shot analysis of a single account. The only terminal failure is
/// account identification (unknown login, unusable credential); every
/// per-repository or per-listing failure degrades into the report's
/// `errors` section and the run continues.
pub async fn produce_report(
    login: &str,
    config: &AnalyzerConfig,
    client: &ApiClient,
) -> anyhow::Result<Report> {
    let fetcher = GithubFetcher::new(client, &config.api.base_url);
    let mut errors: Vec<RepoError> = Vec::new();

    let profile = fetcher
        .profile(login)
        .await
        .with_context(|| format!("Cannot identify account {}", login))?;
    info!(login, created_at = %profile.created_at, "Analyzing account");

    // Social graph, bounded by the configured limits.
    let (followers, err) = fetcher.followers(login, config.limits.max_followers).await;
    record_listing_error("followers", err, &mut errors);
    let (following, err) = fetcher.following(login, config.limits.max_following).await;
    record_listing_error("following", err, &mut errors);

    let follower_set: BTreeSet<&String> = followers.iter().collect();
    let mut mutual_followers: Vec<String> = following
        .iter()
        .filter(|login| follower_set.contains(login))
        .cloned()
        .collect();
    mutual_followers.sort();

    // Repository enumeration and classification.
    let (repos, err) = fetcher.repositories(login, config.limits.max_repositories).await;
    record_listing_error("repositories", err, &mut errors);

    let repo_list: Vec<String> = repos.iter().filter(|r| !r.fork).map(|r| r.name.clone()).collect();
    let forked_repo_list: Vec<String> =
        repos.iter().filter(|r| r.fork).map(|r| r.name.clone()).collect();
    let original_repos_count = repo_list.len();
    let forked_repos_count = forked_repo_list.len();

    // Commit harvesting; failures downgrade per repository.
    let harvester = RepoHarvester::new(&fetcher, &config.clone);
    let mut commits: BTreeMap<String, Vec<CommitRecord>> = BTreeMap::new();
    for repo in &repos {
        if !harvester.should_harvest(repo) {
            continue;
        }
        let (repo_commits, err) = harvester.harvest(repo).await;
        if let Some(err) = err {
            warn!(repo = %repo.name, kind = ?err.kind, "Harvest incomplete: {}", err.message);
            errors.push(err);
        }
        if !repo_commits.is_empty() {
            commits.insert(repo.name.clone(), repo_commits);
        }
    }

    // Identity aggregation across the whole repository set.
    let mut registry = IdentityRegistry::new();
    for repo_commits in commits.values() {
        for commit in repo_commits {
            registry.fold(commit);
        }
    }

    // Contributors for owned, non-forked repositories, fetched
    // concurrently. The client serializes rate-limit accounting.
    let owned: Vec<_> = repos.iter().filter(|r| !r.fork).collect();
    let listings = futures::future::join_all(
        owned.iter().map(|r| fetcher.contributors(&r.owner, &r.name)),
    )
    .await;
    let mut contributors: Vec<ContributorEdge> = Vec::new();
    for (repo, (edges, err)) in owned.iter().zip(listings) {
        contributors.extend(edges);
        record_listing_error(&repo.name, err, &mut errors);
    }
    let contributor_logins: BTreeSet<String> =
        contributors.iter().map(|e| e.login.clone()).collect();

    // Activity in repositories the account does not own.
    let (pr_items, err) = fetcher.search_user_pull_requests(login).await;
    record_listing_error("pull_request_search", err, &mut errors);
    let pull_requests_to_other_repos = group_pull_requests(login, &pr_items);

    let (commit_items, err) = fetcher.search_user_commits(login).await;
    record_listing_error("commit_search", err, &mut errors);
    let commits_to_other_repos = group_foreign_commits(login, &commit_items);

    // Recent events within the lookback window.
    let recent_events = match fetcher.user_events(login, None).await {
        Ok((Some(events), _)) => {
            let cutoff = Utc::now() - Duration::days(config.monitor.lookback_days);
            monitor::process_events(login, &events, Some(cutoff))
        }
        Ok((None, _)) => Vec::new(),
        Err(err) => {
            warn!(error = %err, "Event listing unavailable");
            Vec::new()
        }
    };

    // Detectors over the aggregated model.
    let mut flags = heuristics::temporal_anomalies(&profile, &repos, &commits);
    flags.extend(heuristics::contributor_anomalies(login, &repos, &contributors, &commits));
    flags.extend(heuristics::access_error_clusters(&errors));
    if config.search.commit_search != CommitSearchScope::Off {
        flags.extend(heuristics::copied_commit_search(&fetcher, &commits, &config.search).await);
    }

    let email_categories = registry.categorize(login, &contributor_logins);
    let unique_emails = registry.into_entries();

    info!(
        login,
        repos = repos.len(),
        commits = commits.values().map(Vec::len).sum::<usize>(),
        identities = unique_emails.len(),
        flags = flags.len(),
        errors = errors.len(),
        "Report assembled"
    );

    Ok(Report {
        profile,
        original_repos_count,
        forked_repos_count,
        followers,
        following,
        mutual_followers,
        repo_list,
        forked_repo_list,
        repos,
        commits,
        unique_emails,
        email_categories,
        contributors,
        flags,
        pull_requests_to_other_repos,
        commits_to_other_repos,
        recent_events,
        errors,
    })
}

fn record_listing_error(subject: &str, err: Option<ApiError>, errors: &mut Vec<RepoError>) {
    if let Some(err) = err {
        warn!(subject, error = %err, "Listing stopped early, continuing with partial data");
        errors.push(RepoError {
            repo: subject.to_string(),
            kind: match err.kind {
                ApiErrorKind::NotFound => RepoErrorKind::NotFound,
                ApiErrorKind::Dmca => RepoErrorKind::Dmca,
                _ => RepoErrorKind::Network,
            },
            message: err.to_string(),
        });
    }
}

/// Group PR search hits by `owner/name`, keeping only repositories the
/// analyzed account does not own.
fn group_pull_requests(login: &str, items: &[Value]) -> Vec<CrossRepoActivity> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in items {
        let Some(repo_url) = item["repository_url"].as_str() else {
            continue;
        };
        let mut segments = repo_url.rsplit('/');
        let (Some(name), Some(owner)) = (segments.next(), segments.next()) else {
            continue;
        };
        if owner.eq_ignore_ascii_case(login) {
            continue;
        }
        if let Some(url) = item["html_url"].as_str() {
            grouped
                .entry(format!("{}/{}", owner, name))
                .or_default()
                .push(url.to_string());
        }
    }
    grouped
        .into_iter()
        .map(|(repo, items)| CrossRepoActivity { repo, items })
        .collect()
}

/// Group commit search hits by `owner/name`, excluding owned repositories.
fn group_foreign_commits(login: &str, items: &[Value]) -> Vec<CrossRepoActivity> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in items {
        let Some(owner) = item["repository"]["owner"]["login"].as_str() else {
            continue;
        };
        if owner.eq_ignore_ascii_case(login) {
            continue;
        }
        let Some(name) = item["repository"]["name"].as_str() else {
            continue;
        };
        if let Some(sha) = item["sha"].as_str() {
            grouped
                .entry(format!("{}/{}", owner, name))
                .or_default()
                .push(sha.to_string());
        }
    }
    grouped
        .into_iter()
        .map(|(repo, items)| CrossRepoActivity { repo, items })
        .collect()
}
