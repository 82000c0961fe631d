//! Persistent bubble registry.
//!
//! Registration is the final step of a create: a container without a
//! registry entry is recoverable by `doctor`, a registry entry without
//! a container is not.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fsutil::atomic_write;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BubbleInfo {
    pub org_repo: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub commit: String,
    #[serde(default)]
    pub pr: u64,
    #[serde(default)]
    pub base_image: String,
    #[serde(default)]
    pub created_at: String,
    /// Set when the bubble lives on a remote SSH host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    bubbles: BTreeMap<String, BubbleInfo>,
}

/// The `registry.json` store of per-bubble metadata.
#[derive(Debug)]
pub struct BubbleRegistry {
    path: PathBuf,
    doc: RegistryDocument,
}

impl BubbleRegistry {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "corrupt registry file, starting empty");
                RegistryDocument::default()
            }),
            Err(_) => RegistryDocument::default(),
        };
        Self { path, doc }
    }

    pub fn register(&mut self, name: &str, mut info: BubbleInfo) -> Result<()> {
        if info.created_at.is_empty() {
            info.created_at = Utc::now().to_rfc3339();
        }
        self.doc.bubbles.insert(name.to_owned(), info);
        self.save()
    }

    pub fn get(&self, name: &str) -> Option<&BubbleInfo> {
        self.doc.bubbles.get(name)
    }

    pub fn unregister(&mut self, name: &str) -> Result<()> {
        self.doc.bubbles.remove(name);
        self.save()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BubbleInfo)> {
        self.doc.bubbles.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.doc.bubbles.keys().cloned().collect()
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

    fn info(org_repo: &str) -> BubbleInfo {
        BubbleInfo {
            org_repo: org_repo.to_owned(),
            branch: "main".to_owned(),
            commit: "abc123".to_owned(),
            pr: 0,
            base_image: "base".to_owned(),
            created_at: String::new(),
            remote_host: None,
        }
    }

    #[test]
    fn register_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = BubbleRegistry::load(dir.path().join("registry.json"));
        reg.register("lean4-main-20260101", info("leanprover/lean4"))
            .unwrap();

        let entry = reg.get("lean4-main-20260101").unwrap();
        assert_eq!(entry.org_repo, "leanprover/lean4");
        assert!(!entry.created_at.is_empty());
    }

    #[test]
    fn unregister_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = BubbleRegistry::load(dir.path().join("registry.json"));
        reg.register("x", info("a/b")).unwrap();
        reg.unregister("x").unwrap();
        assert!(reg.get("x").is_none());
    }

    #[test]
    fn persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        {
            let mut reg = BubbleRegistry::load(&path);
            reg.register("x", info("a/b")).unwrap();
        }
        let reg = BubbleRegistry::load(&path);
        assert_eq!(reg.get("x").unwrap().org_repo, "a/b");
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reg = BubbleRegistry::load(dir.path().join("registry.json"));
        assert!(reg.names().is_empty());
    }
}
