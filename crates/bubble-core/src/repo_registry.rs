//! Learned repo name registry for short-name resolution.
//!
//! Repos are learned on first use and stored in `repos.json`. A short
//! name used by two different owners becomes ambiguous and stops
//! resolving until the user spells out the full form.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fsutil::atomic_write;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoEntry {
    pub owner: String,
    pub repo: String,
    pub last_used: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RepoDocument {
    #[serde(default)]
    repos: BTreeMap<String, RepoEntry>,
    #[serde(default)]
    ambiguous: BTreeMap<String, Vec<String>>,
}

/// Maps short repo names to full `owner/repo` pairs.
#[derive(Debug)]
pub struct RepoRegistry {
    path: PathBuf,
    doc: RepoDocument,
}

impl RepoRegistry {
    /// Load the registry from `path`. A missing or corrupt file is
    /// treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "corrupt repos file, starting empty");
                RepoDocument::default()
            }),
            Err(_) => RepoDocument::default(),
        };
        Self { path, doc }
    }

    /// Resolve a short name to `owner/repo`. Returns `None` when the
    /// name is unknown or ambiguous.
    pub fn resolve(&self, short_name: &str) -> Option<String> {
        let lower = short_name.to_lowercase();
        if self.doc.ambiguous.contains_key(&lower) {
            return None;
        }
        self.doc
            .repos
            .get(&lower)
            .map(|e| format!("{}/{}", e.owner, e.repo))
    }

    pub fn is_ambiguous(&self, short_name: &str) -> bool {
        self.doc.ambiguous.contains_key(&short_name.to_lowercase())
    }

    pub fn ambiguous_options(&self, short_name: &str) -> Vec<String> {
        self.doc
            .ambiguous
            .get(&short_name.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Record a repo usage, learning or updating the short-name
    /// mapping. A second owner for the same short name moves the entry
    /// to the ambiguous set.
    pub fn register(&mut self, owner: &str, repo: &str) -> Result<()> {
        let short = repo.to_lowercase();
        let org_repo = format!("{owner}/{repo}");
        let now = Utc::now().to_rfc3339();

        if let Some(existing) = self.doc.repos.get_mut(&short) {
            let existing_org_repo = format!("{}/{}", existing.owner, existing.repo);
            if existing_org_repo == org_repo {
                existing.last_used = now;
            } else {
                let options = self
                    .doc
                    .ambiguous
                    .entry(short.clone())
                    .or_insert_with(|| vec![existing_org_repo]);
                if !options.contains(&org_repo) {
                    options.push(org_repo);
                }
                self.doc.repos.remove(&short);
            }
            return self.save();
        }

        if let Some(options) = self.doc.ambiguous.get_mut(&short) {
            if !options.contains(&org_repo) {
                options.push(org_repo);
            }
            return self.save();
        }

        self.doc.repos.insert(
            short,
            RepoEntry {
                owner: owner.to_owned(),
                repo: repo.to_owned(),
                last_used: now,
            },
        );
        self.save()
    }

    /// All known unambiguous `short → owner/repo` mappings.
    pub fn list_all(&self) -> BTreeMap<String, String> {
        self.doc
            .repos
            .iter()
            .map(|(k, e)| (k.clone(), format!("{}/{}", e.owner, e.repo)))
            .collect()
    }

    fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.doc).map_err(|e| Error::StateParse {
            path: self.path.clone(),
            source: e,
        })?;
        atomic_write(&self.path, &(content + "\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, RepoRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let reg = RepoRegistry::load(dir.path().join("repos.json"));
        (dir, reg)
    }

    #[test]
    fn learns_short_name_on_first_use() {
        let (_dir, mut reg) = registry();
        reg.register("leanprover-community", "mathlib4").unwrap();
        assert_eq!(
            reg.resolve("mathlib4").as_deref(),
            Some("leanprover-community/mathlib4")
        );
    }

    #[test]
    fn resolution_is_case_insensitive() {
        let (_dir, mut reg) = registry();
        reg.register("leanprover", "Lean4").unwrap();
        assert_eq!(reg.resolve("lean4").as_deref(), Some("leanprover/Lean4"));
        assert_eq!(reg.resolve("LEAN4").as_deref(), Some("leanprover/Lean4"));
    }

    #[test]
    fn second_owner_marks_ambiguous() {
        let (_dir, mut reg) = registry();
        reg.register("alice", "utils").unwrap();
        reg.register("bob", "utils").unwrap();

        assert_eq!(reg.resolve("utils"), None);
        assert!(reg.is_ambiguous("utils"));
        let options = reg.ambiguous_options("utils");
        assert!(options.contains(&"alice/utils".to_owned()));
        assert!(options.contains(&"bob/utils".to_owned()));
    }

    #[test]
    fn reregistering_same_repo_stays_unambiguous() {
        let (_dir, mut reg) = registry();
        reg.register("alice", "utils").unwrap();
        reg.register("alice", "utils").unwrap();
        assert_eq!(reg.resolve("utils").as_deref(), Some("alice/utils"));
        assert!(!reg.is_ambiguous("utils"));
    }

    #[test]
    fn third_owner_appends_to_ambiguous() {
        let (_dir, mut reg) = registry();
        reg.register("alice", "utils").unwrap();
        reg.register("bob", "utils").unwrap();
        reg.register("carol", "utils").unwrap();
        assert_eq!(reg.ambiguous_options("utils").len(), 3);
    }

    #[test]
    fn never_in_both_maps() {
        let (_dir, mut reg) = registry();
        reg.register("alice", "utils").unwrap();
        reg.register("bob", "utils").unwrap();
        assert!(reg.resolve("utils").is_none());
        assert!(reg.list_all().get("utils").is_none());
    }

    #[test]
    fn persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repos.json");
        {
            let mut reg = RepoRegistry::load(&path);
            reg.register("leanprover", "lean4").unwrap();
        }
        let reg = RepoRegistry::load(&path);
        assert_eq!(reg.resolve("lean4").as_deref(), Some("leanprover/lean4"));
    }

    #[test]
    fn corrupt_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repos.json");
        std::fs::write(&path, "not json").unwrap();
        let reg = RepoRegistry::load(&path);
        assert!(reg.resolve("anything").is_none());
    }
}
