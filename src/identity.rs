use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::{CommitRecord, IdentityEntry};

/// Email↔name registry accumulated over every harvested commit. Entries are
/// keyed by normalized email and never removed within a run, so identity
/// reuse across repositories stays visible.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    entries: BTreeMap<String, IdentityEntry>,
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one commit in: both the author and the committer identity.
    pub fn fold(&mut self, commit: &CommitRecord) {
        self.observe(&commit.author_email, &commit.author_name, &commit.repo);
        self.observe(&commit.committer_email, &commit.committer_name, &commit.repo);
    }

    fn observe(&mut self, email: &str, name: &str, repo: &str) {
        let email = normalize_email(email);
        if email.is_empty() {
            return;
        }
        let entry = self.entries.entry(email.clone()).or_insert_with(|| IdentityEntry {
            email,
            names: BTreeSet::new(),
            repos: BTreeSet::new(),
        });
        if !name.trim().is_empty() {
            entry.names.insert(name.trim().to_string());
        }
        entry.repos.insert(repo.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &IdentityEntry> {
        self.entries.values()
    }

    pub fn into_entries(self) -> Vec<IdentityEntry> {
        self.entries.into_values().collect()
    }

    /// Split the registry into owner-attributable, contributor-attributable,
    /// and unknown identities. Heuristic, advisory only:
    /// 1. an email mentioning the login (including the
    ///    `users.noreply.github.com` form), or carrying a name equal to the
    ///    login, is the owner's;
    /// 2. names seen on owner emails are owner names, and any email using
    ///    an owner name is pulled in too;
    /// 3. remaining emails naming a known contributor go to that bucket;
    /// 4. everything else is unknown, which is the identity-rotation signal.
    pub fn categorize(&self, owner_login: &str, contributor_logins: &BTreeSet<String>) -> EmailCategories {
        let login = owner_login.to_ascii_lowercase();
        let contributors: BTreeSet<String> = contributor_logins
            .iter()
            .map(|l| l.to_ascii_lowercase())
            .filter(|l| *l != login)
            .collect();

        let mut owner_names: BTreeSet<String> = BTreeSet::new();
        owner_names.insert(login.clone());
        for entry in self.entries.values() {
            if entry.email.contains(&login) {
                owner_names.extend(entry.names.iter().map(|n| n.to_ascii_lowercase()));
            }
        }

        let mut categories = EmailCategories::default();
        for entry in self.entries.values() {
            let names_lower: BTreeSet<String> =
                entry.names.iter().map(|n| n.to_ascii_lowercase()).collect();

            if entry.email.contains(&login) || !names_lower.is_disjoint(&owner_names) {
                categories.owner.push(entry.clone());
            } else if names_lower.iter().any(|n| contributors.contains(n))
                || contributors.iter().any(|c| entry.email.contains(c.as_str()))
            {
                categories.contributors.push(entry.clone());
            } else {
                categories.unknown.push(entry.clone());
            }
        }
        categories
    }
}

/// Advisory identity attribution. `unknown` is where rotated identities
/// surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailCategories {
    pub owner: Vec<IdentityEntry>,
    pub contributors: Vec<IdentityEntry>,
    pub unknown: Vec<IdentityEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn commit(repo: &str, author: (&str, &str), committer: (&str, &str)) -> CommitRecord {
        CommitRecord {
            repo: repo.to_string(),
            sha: "sha".to_string(),
            author_name: author.0.to_string(),
            author_email: author.1.to_string(),
            committer_name: committer.0.to_string(),
            committer_email: committer.1.to_string(),
            authored_at: Utc::now(),
            message: "m".to_string(),
        }
    }

    #[test]
    fn test_emails_normalized_and_merged() {
        let mut registry = IdentityRegistry::new();
        registry.fold(&commit("a", ("Alice", "Alice@Example.COM "), ("Alice", "alice@example.com")));
        registry.fold(&commit("b", ("Alice M", "alice@example.com"), ("GitHub", "noreply@github.com")));

        assert_eq!(registry.len(), 2);
        let entry = registry.entries().find(|e| e.email == "alice@example.com").unwrap();
        assert_eq!(entry.names.len(), 2);
        assert!(entry.names.contains("Alice M"));
        assert_eq!(entry.repos.len(), 2);
    }

    #[test]
    fn test_fold_is_order_independent() {
        let commits = vec![
            commit("a", ("Alice", "alice@example.com"), ("Bob", "bob@example.com")),
            commit("b", ("Alice M", "alice@example.com"), ("Alice", "alice@example.com")),
            commit("c", ("Carol", "carol@example.com"), ("Carol", "carol@example.com")),
        ];

        let mut forward = IdentityRegistry::new();
        for c in &commits {
            forward.fold(c);
        }
        let mut reverse = IdentityRegistry::new();
        for c in commits.iter().rev() {
            reverse.fold(c);
        }

        assert_eq!(forward.into_entries(), reverse.into_entries());
    }

    #[test]
    fn test_empty_emails_skipped() {
        let mut registry = IdentityRegistry::new();
        registry.fold(&commit("a", ("Ghost", ""), ("Ghost", "  ")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_categorize_owner_noreply_and_name_chain() {
        let mut registry = IdentityRegistry::new();
        // Noreply address ties the name "Alice Smith" to the owner...
        registry.fold(&commit(
            "a",
            ("Alice Smith", "1234+alice@users.noreply.github.com"),
            ("Alice Smith", "1234+alice@users.noreply.github.com"),
        ));
        // ...which pulls this personal address into the owner bucket.
        registry.fold(&commit("a", ("Alice Smith", "personal@example.com"), ("Alice Smith", "personal@example.com")));
        // A known contributor.
        registry.fold(&commit("a", ("bob", "bob@example.com"), ("bob", "bob@example.com")));
        // An unattributable identity.
        registry.fold(&commit("a", ("Mystery", "m@example.com"), ("Mystery", "m@example.com")));

        let contributors: BTreeSet<String> = ["bob".to_string()].into();
        let categories = registry.categorize("alice", &contributors);
        assert_eq!(categories.owner.len(), 2);
        assert_eq!(categories.contributors.len(), 1);
        assert_eq!(categories.unknown.len(), 1);
        assert_eq!(categories.unknown[0].email, "m@example.com");
    }
}
