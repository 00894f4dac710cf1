use chrono::{DateTime, Utc};
use tracing::warn;

use crate::models::CommitRecord;

/// `git log` pretty-format: unit separator between fields, record separator
/// between commits, so multi-line messages survive parsing.
pub const LOG_FORMAT: &str = "%H%x1f%an%x1f%ae%x1f%cn%x1f%ce%x1f%aI%x1f%B%x1e";

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

/// Parse `git log --pretty=format:LOG_FORMAT` output into commit records.
/// Malformed records are skipped with a warning rather than failing the
/// repository.
pub fn parse_log(repo: &str, output: &str) -> Vec<CommitRecord> {
    let mut commits = Vec::new();
    for record in output.split(RECORD_SEP) {
        let record = record.trim_start_matches(['\n', '\r']);
        if record.is_empty() {
            continue;
        }
        let fields: Vec<&str> = record.splitn(7, FIELD_SEP).collect();
        if fields.len() != 7 {
            warn!(repo, "Skipping malformed log record ({} fields)", fields.len());
            continue;
        }
        let authored_at = match DateTime::parse_from_rfc3339(fields[5]) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(e) => {
                warn!(repo, sha = fields[0], error = %e, "Skipping commit with unparseable date");
                continue;
            }
        };
        commits.push(CommitRecord {
            repo: repo.to_string(),
            sha: fields[0].to_string(),
            author_name: fields[1].to_string(),
            author_email: fields[2].to_string(),
            committer_name: fields[3].to_string(),
            committer_email: fields[4].to_string(),
            authored_at,
            message: fields[6].trim_end().to_string(),
        });
    }
    commits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sha: &str, date: &str, message: &str) -> String {
        format!(
            "{sha}\u{1f}Alice\u{1f}alice@example.com\u{1f}Bob\u{1f}bob@example.com\u{1f}{date}\u{1f}{message}\u{1e}"
        )
    }

    #[test]
    fn test_parse_single_commit() {
        let output = record("abc123", "2021-06-01T12:00:00+02:00", "Initial commit\n");
        let commits = parse_log("proj", &output);
        assert_eq!(commits.len(), 1);
        let c = &commits[0];
        assert_eq!(c.repo, "proj");
        assert_eq!(c.sha, "abc123");
        assert_eq!(c.author_name, "Alice");
        assert_eq!(c.committer_email, "bob@example.com");
        assert_eq!(c.authored_at.to_rfc3339(), "2021-06-01T10:00:00+00:00");
        assert_eq!(c.message, "Initial commit");
    }

    #[test]
    fn test_parse_multiline_message() {
        let output = format!(
            "{}{}",
            record("a1", "2021-06-01T12:00:00Z", "Subject line\n\nBody with\ndetails\n"),
            record("a2", "2021-06-02T12:00:00Z", "Second")
        );
        let commits = parse_log("proj", &output);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].message, "Subject line\n\nBody with\ndetails");
        assert_eq!(commits[1].sha, "a2");
    }

    #[test]
    fn test_malformed_records_skipped() {
        let output = format!(
            "garbage-without-separators\u{1e}{}",
            record("ok1", "2021-06-01T12:00:00Z", "fine")
        );
        let commits = parse_log("proj", &output);
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].sha, "ok1");
    }

    #[test]
    fn test_empty_output() {
        assert!(parse_log("proj", "").is_empty());
        assert!(parse_log("proj", "\n").is_empty());
    }
}
