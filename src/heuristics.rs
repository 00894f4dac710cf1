use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::config::{CommitSearchScope, SearchConfig};
use crate::fetch::GithubFetcher;
use crate::models::{
    CommitRecord, ContributorEdge, HeuristicFlag, ProfileSnapshot, RepoError, RepoErrorKind,
    RepositoryRecord,
};

/// Messages too common to be worth a search-API request: a match proves
/// nothing and the query costs quota. Trimmed exact match.
const POPULAR_COMMIT_MESSAGES: &[&str] = &[
    "Initial commit",
    "initial commit",
    "Initial Commit",
    "first commit",
    "init",
    "- init",
    "commit",
    "Commit",
    "update",
    "Update",
    "updated",
    "Updates",
    "changes",
    "changed",
    "fix",
    "fixes",
    "fix typo",
    "Fix typo",
    "fix: typo",
    "hotfix",
    "quickfix",
    "minor fix",
    "patch",
    "bugfix",
    "fix build",
    "fix error",
    "fix warning",
    "fix lint",
    "lint",
    "wip",
    "work in progress",
    "temp commit",
    "checkpoint",
    "save progress",
    "backup",
    "cleanup",
    "clean up code",
    "code cleanup",
    "remove unused",
    "formatting",
    "format code",
    "test",
    "add tests",
    "update tests",
    "Fix tests",
    "fix failing tests",
    "readme",
    "update readme",
    "updated readme",
    "Update README",
    "Update README.md",
    "Update readme.md",
    "Create README.md",
    "- update README.md",
    "- add README.md",
    "README.md",
    "Update index.html",
    "Update package.json",
    "Create LICENSE",
    "MIT LICENSE",
    "update docs",
    "docs: update",
    "update changelog",
    "Update changelog",
    "bump version",
    "version bump",
    "update version",
    "Update version",
    "prepare release",
    "update dependencies",
    "deps: update",
    "upgrade dependencies",
    "npm update",
    "update packages",
    "update ci",
    "ci: update workflow",
    "update workflow",
    "update actions",
    "fix pipeline",
    "update config",
    "update settings",
    "merge branch",
    "merge main",
    "merge master",
    "merge develop",
    "resolve conflicts",
    "Merge branch 'main' into main",
    "Merge branch 'master' into master",
    "Add files via upload",
    "- upload files",
    "Upload",
    "create file",
    "design",
    "Refactor",
    ".",
    "...",
];

/// Flag non-forked repositories whose history starts before the account
/// existed. Strictly earlier; equal timestamps pass. Rebased or transferred
/// repositories trip this too, so the note marks the flag as a lead, not a
/// verdict.
pub fn temporal_anomalies(
    profile: &ProfileSnapshot,
    repos: &[RepositoryRecord],
    commits: &BTreeMap<String, Vec<CommitRecord>>,
) -> Vec<HeuristicFlag> {
    let mut flags = Vec::new();
    for repo in repos.iter().filter(|r| !r.fork) {
        let earliest = commits
            .get(&repo.name)
            .into_iter()
            .flatten()
            .min_by_key(|c| c.authored_at);

        if let Some(first) = earliest {
            if first.authored_at < profile.created_at {
                flags.push(HeuristicFlag::TemporalAnomaly {
                    repo: repo.name.clone(),
                    commit_sha: Some(first.sha.clone()),
                    commit_date: first.authored_at,
                    account_created_at: profile.created_at,
                    note: "first commit predates account creation; rebase or repository \
                           transfer can produce the same signature"
                        .to_string(),
                });
                continue;
            }
        }

        if let Some(created) = repo.created_at {
            if created < profile.created_at {
                flags.push(HeuristicFlag::TemporalAnomaly {
                    repo: repo.name.clone(),
                    commit_sha: None,
                    commit_date: created,
                    account_created_at: profile.created_at,
                    note: "repository created before the account; transferred repositories \
                           can produce the same signature"
                        .to_string(),
                });
            }
        }
    }
    flags
}

/// Flag owned, non-forked repositories whose contributor set reaches beyond
/// the owner, including the degenerate case where the owner is missing
/// entirely from a repository that has commits.
pub fn contributor_anomalies(
    owner: &str,
    repos: &[RepositoryRecord],
    contributors: &[ContributorEdge],
    commits: &BTreeMap<String, Vec<CommitRecord>>,
) -> Vec<HeuristicFlag> {
    let owner_lower = owner.to_ascii_lowercase();
    let mut flags = Vec::new();

    for repo in repos.iter().filter(|r| !r.fork) {
        let logins: BTreeSet<&str> = contributors
            .iter()
            .filter(|e| e.repo == repo.name)
            .map(|e| e.login.as_str())
            .collect();
        if logins.is_empty() {
            continue;
        }

        let has_owner = logins.iter().any(|l| l.eq_ignore_ascii_case(&owner_lower));
        let outside: Vec<String> = logins
            .iter()
            .filter(|l| !l.eq_ignore_ascii_case(&owner_lower))
            .map(|l| l.to_string())
            .collect();
        let has_commits = commits.get(&repo.name).map(|c| !c.is_empty()).unwrap_or(false);

        if !outside.is_empty() && (logins.len() > 1 || (has_commits && !has_owner)) {
            flags.push(HeuristicFlag::ContributorAnomaly {
                repo: repo.name.clone(),
                outside_logins: outside,
            });
        }
    }
    flags
}

/// Summarize harvest failures by kind. No inference beyond counting; the
/// DMCA + deleted + empty co-occurrence is pointed out for human review.
pub fn access_error_clusters(errors: &[RepoError]) -> Vec<HeuristicFlag> {
    if errors.is_empty() {
        return Vec::new();
    }
    let mut counts: BTreeMap<RepoErrorKind, usize> = BTreeMap::new();
    for err in errors {
        *counts.entry(err.kind).or_insert(0) += 1;
    }
    let suspicious_pattern = counts.contains_key(&RepoErrorKind::Dmca)
        && counts.contains_key(&RepoErrorKind::NotFound)
        && counts.contains_key(&RepoErrorKind::EmptyRepo);
    vec![HeuristicFlag::AccessErrorCluster {
        counts,
        suspicious_pattern,
    }]
}

fn clean_message(message: &str) -> String {
    message.replace(['\n', '\r'], " ").trim().to_string()
}

fn is_popular(message: &str) -> bool {
    POPULAR_COMMIT_MESSAGES.contains(&message.trim())
}

/// Search GitHub for each candidate commit message and flag messages that
/// exist elsewhere. Opt-in: every candidate costs one search request,
/// though the client cache de-duplicates repeated messages. Search failures
/// are logged and skipped; this detector is advisory and must not sink
/// the run.
pub async fn copied_commit_search(
    fetcher: &GithubFetcher<'_>,
    commits: &BTreeMap<String, Vec<CommitRecord>>,
    config: &SearchConfig,
) -> Vec<HeuristicFlag> {
    let mut flags = Vec::new();
    if config.commit_search == CommitSearchScope::Off {
        return flags;
    }
    for (repo_name, repo_commits) in commits {
        if config.commit_search == CommitSearchScope::Repository
            && config.repository.as_deref() != Some(repo_name.as_str())
        {
            continue;
        }

        for commit in repo_commits {
            let message = clean_message(&commit.message);
            if message.is_empty() || is_popular(&message) {
                continue;
            }

            let (total, items) = match fetcher.search_commits(&message).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(repo = %repo_name, error = %err, "Commit search failed, skipping message");
                    continue;
                }
            };
            if total == 0 {
                continue;
            }

            let matching_repos: Vec<String> = items
                .iter()
                .filter_map(|item| item["repository"]["html_url"].as_str())
                .map(|url| url.trim_start_matches("https://github.com/").to_string())
                .collect();
            if matching_repos.is_empty() {
                continue;
            }

            info!(
                repo = %repo_name,
                matches = total,
                "Commit message found in other repositories"
            );
            flags.push(HeuristicFlag::CopiedCommit {
                repo: repo_name.clone(),
                message,
                search_results: total,
                matching_repos,
            });
        }
    }
    flags
}
