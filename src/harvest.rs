use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::CloneConfig;
use crate::error::ApiErrorKind;
use crate::fetch::GithubFetcher;
use crate::gitlog;
use crate::models::{CommitRecord, RepoError, RepoErrorKind, RepositoryRecord};

/// Output from a finished git invocation.
#[derive(Debug)]
pub struct GitOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Run git with a timeout. The child is killed if the timeout elapses or
/// the future is dropped.
async fn run_git(git_binary: &str, args: &[&str], timeout_secs: u64) -> anyhow::Result<GitOutput> {
    let mut command = tokio::process::Command::new(git_binary);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(git = git_binary, ?args, "Running git");
    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), command.output())
        .await
        .map_err(|_| anyhow::anyhow!("git {:?} timed out after {}s", args.first(), timeout_secs))??;

    Ok(GitOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Per-repository commit harvesting. Every failure is downgraded to a
/// `RepoError` so one bad repository never aborts the account run.
pub struct RepoHarvester<'a> {
    fetcher: &'a GithubFetcher<'a>,
    config: &'a CloneConfig,
}

impl<'a> RepoHarvester<'a> {
    pub fn new(fetcher: &'a GithubFetcher<'a>, config: &'a CloneConfig) -> Self {
        Self { fetcher, config }
    }

    /// Whether this repository should be harvested at all. Fork history
    /// belongs to the upstream owner, so forks are skipped by default.
    pub fn should_harvest(&self, repo: &RepositoryRecord) -> bool {
        !repo.fork || self.config.include_forks
    }

    /// Harvest a repository's commits. Whatever history was obtained is
    /// returned even when an error cut it short, so a truncated listing
    /// still contributes commits alongside its recorded failure.
    pub async fn harvest(
        &self,
        repo: &RepositoryRecord,
    ) -> (Vec<CommitRecord>, Option<RepoError>) {
        if self.config.enabled {
            match self.harvest_via_clone(repo).await {
                Ok(commits) => (commits, None),
                Err(err) => (Vec::new(), Some(err)),
            }
        } else {
            self.harvest_via_api(repo).await
        }
    }

    /// API commits endpoint, bounded by the configured depth. Used when
    /// cloning is disabled; early history beyond the API's window is not
    /// visible on this path.
    async fn harvest_via_api(
        &self,
        repo: &RepositoryRecord,
    ) -> (Vec<CommitRecord>, Option<RepoError>) {
        let (commits, error) = self
            .fetcher
            .commits_via_api(&repo.owner, &repo.name, self.config.depth as usize)
            .await;

        let error = error.map(|err| {
            if !commits.is_empty() {
                warn!(repo = %repo.name, error = %err, "Commit listing truncated by API error");
            }
            RepoError {
                repo: repo.name.clone(),
                kind: match err.kind {
                    ApiErrorKind::NotFound => RepoErrorKind::NotFound,
                    ApiErrorKind::Dmca => RepoErrorKind::Dmca,
                    _ => RepoErrorKind::Network,
                },
                message: err.to_string(),
            }
        });
        (commits, error)
    }

    async fn harvest_via_clone(&self, repo: &RepositoryRecord) -> Result<Vec<CommitRecord>, RepoError> {
        let clone_dir = self.clone_dir(repo);
        // A stale directory from an abandoned run makes clone fail outright.
        if clone_dir.exists() {
            let _ = tokio::fs::remove_dir_all(&clone_dir).await;
        }

        let result = self.clone_and_read_log(repo, &clone_dir).await;

        if self.config.remove_after_harvest {
            // Best-effort: a leftover clone costs disk, never correctness.
            if let Err(e) = tokio::fs::remove_dir_all(&clone_dir).await {
                if clone_dir.exists() {
                    warn!(dir = %clone_dir.display(), error = %e, "Failed to remove clone directory");
                }
            }
        }

        result
    }

    async fn clone_and_read_log(
        &self,
        repo: &RepositoryRecord,
        clone_dir: &Path,
    ) -> Result<Vec<CommitRecord>, RepoError> {
        let depth_arg = self.config.depth.to_string();
        let dir_str = clone_dir.to_string_lossy().into_owned();
        let mut args: Vec<&str> = vec!["clone"];
        if self.config.bare {
            args.push("--bare");
        }
        if self.config.depth > 0 {
            args.push("--depth");
            args.push(&depth_arg);
        }
        args.push(&repo.clone_url);
        args.push(&dir_str);

        info!(repo = %repo.name, url = %repo.clone_url, "Cloning");
        let clone_out = run_git(&self.config.git_binary, &args, self.config.timeout_secs)
            .await
            .map_err(|e| RepoError {
                repo: repo.name.clone(),
                kind: RepoErrorKind::Clone,
                message: e.to_string(),
            })?;
        if clone_out.exit_code != 0 {
            return Err(classify_clone_failure(&repo.name, &clone_out.stderr));
        }

        let format = format!("--pretty=format:{}", gitlog::LOG_FORMAT);
        let log_args = ["-C", dir_str.as_str(), "log", format.as_str()];
        let log_out = run_git(&self.config.git_binary, &log_args, self.config.timeout_secs)
            .await
            .map_err(|e| RepoError {
                repo: repo.name.clone(),
                kind: RepoErrorKind::Clone,
                message: e.to_string(),
            })?;
        if log_out.exit_code != 0 {
            let stderr = log_out.stderr.to_lowercase();
            let kind = if stderr.contains("does not have any commits") {
                RepoErrorKind::EmptyRepo
            } else {
                RepoErrorKind::Clone
            };
            return Err(RepoError {
                repo: repo.name.clone(),
                kind,
                message: log_out.stderr.trim().to_string(),
            });
        }

        let commits = gitlog::parse_log(&repo.name, &log_out.stdout);
        info!(repo = %repo.name, count = commits.len(), "Harvested commits from clone");
        Ok(commits)
    }

    fn clone_dir(&self, repo: &RepositoryRecord) -> PathBuf {
        let root = self
            .config
            .dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        root.join(format!("{}_{}.git", repo.owner, repo.name))
    }
}

fn classify_clone_failure(repo: &str, stderr: &str) -> RepoError {
    let lower = stderr.to_lowercase();
    let kind = if lower.contains("dmca") || lower.contains("unavailable due to legal") {
        RepoErrorKind::Dmca
    } else if lower.contains("not found") || lower.contains("does not exist") {
        RepoErrorKind::NotFound
    } else if lower.contains("could not resolve")
        || lower.contains("unable to access")
        || lower.contains("timed out")
    {
        RepoErrorKind::Network
    } else {
        RepoErrorKind::Clone
    };
    RepoError {
        repo: repo.to_string(),
        kind,
        message: stderr.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiClient;
    use crate::config::ApiConfig;
    use crate::testing::{local_git_repo, MockTransport};

    fn offline_fetcher(client: &ApiClient) -> GithubFetcher<'_> {
        GithubFetcher::new(client, "https://api.test")
    }

    fn record(name: &str, clone_url: &str, fork: bool) -> RepositoryRecord {
        RepositoryRecord {
            name: name.to_string(),
            owner: "alice".to_string(),
            fork,
            default_branch: Some("master".to_string()),
            language: None,
            stargazers: 0,
            forks: 0,
            created_at: None,
            pushed_at: None,
            clone_url: clone_url.to_string(),
        }
    }

    #[test]
    fn test_fork_skipping() {
        let client = ApiClient::with_transport(Box::new(MockTransport::new()), &ApiConfig::default());
        let fetcher = offline_fetcher(&client);
        let config = CloneConfig::default();
        let harvester = RepoHarvester::new(&fetcher, &config);
        assert!(harvester.should_harvest(&record("a", "", false)));
        assert!(!harvester.should_harvest(&record("a", "", true)));

        let config = CloneConfig {
            include_forks: true,
            ..CloneConfig::default()
        };
        let harvester = RepoHarvester::new(&fetcher, &config);
        assert!(harvester.should_harvest(&record("a", "", true)));
    }

    #[test]
    fn test_classify_clone_failure() {
        assert_eq!(
            classify_clone_failure("r", "remote: Repository unavailable due to DMCA takedown.").kind,
            RepoErrorKind::Dmca
        );
        assert_eq!(
            classify_clone_failure("r", "fatal: repository 'x' does not exist").kind,
            RepoErrorKind::NotFound
        );
        assert_eq!(
            classify_clone_failure("r", "fatal: unable to access 'https://...': Could not resolve host").kind,
            RepoErrorKind::Network
        );
        assert_eq!(classify_clone_failure("r", "something odd").kind, RepoErrorKind::Clone);
    }

    #[tokio::test]
    async fn test_harvest_local_repo_via_clone() {
        let source = local_git_repo(&["Initial commit", "Add feature"]);
        let clones = tempfile::tempdir().unwrap();

        let client = ApiClient::with_transport(Box::new(MockTransport::new()), &ApiConfig::default());
        let fetcher = offline_fetcher(&client);
        let config = CloneConfig {
            dir: Some(clones.path().to_path_buf()),
            // Local path clones ignore --depth; keep it off to avoid the warning.
            depth: 0,
            ..CloneConfig::default()
        };
        let harvester = RepoHarvester::new(&fetcher, &config);

        let repo = record("proj", &source.path().to_string_lossy(), false);
        let (commits, err) = harvester.harvest(&repo).await;
        assert!(err.is_none());
        assert_eq!(commits.len(), 2);
        // git log is newest-first.
        assert_eq!(commits[0].message, "Add feature");
        assert_eq!(commits[1].message, "Initial commit");
        assert!(!commits[0].sha.is_empty());
        assert_eq!(commits[0].author_email, "tester@example.com");

        // remove_after_harvest cleaned the clone up.
        assert!(!clones.path().join("alice_proj.git").exists());
    }

    #[tokio::test]
    async fn test_clone_of_missing_path_is_access_error() {
        let clones = tempfile::tempdir().unwrap();
        let client = ApiClient::with_transport(Box::new(MockTransport::new()), &ApiConfig::default());
        let fetcher = offline_fetcher(&client);
        let config = CloneConfig {
            dir: Some(clones.path().to_path_buf()),
            depth: 0,
            ..CloneConfig::default()
        };
        let harvester = RepoHarvester::new(&fetcher, &config);

        let repo = record("gone", "/nonexistent/path/to/repo", false);
        let (commits, err) = harvester.harvest(&repo).await;
        let err = err.unwrap();
        assert!(commits.is_empty());
        assert_eq!(err.repo, "gone");
        assert_eq!(err.kind, RepoErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_failing_git_binary_is_clone_error() {
        let clones = tempfile::tempdir().unwrap();
        let client = ApiClient::with_transport(Box::new(MockTransport::new()), &ApiConfig::default());
        let fetcher = offline_fetcher(&client);
        let config = CloneConfig {
            dir: Some(clones.path().to_path_buf()),
            git_binary: "false".to_string(),
            ..CloneConfig::default()
        };
        let harvester = RepoHarvester::new(&fetcher, &config);

        let repo = record("proj", "https://example.invalid/proj.git", false);
        let (_, err) = harvester.harvest(&repo).await;
        assert_eq!(err.unwrap().kind, RepoErrorKind::Clone);
    }
}
