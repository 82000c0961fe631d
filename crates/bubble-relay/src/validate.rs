//! Relay target validation.
//!
//! Everything in a relay request is adversarial: the target is
//! length-capped, rejected on any path-like or option-like shape,
//! stripped of any chance to smuggle shell metacharacters, and then
//! still has to parse as a known GitHub target whose repo is already
//! mirrored locally.

use std::sync::LazyLock;

use bubble_core::target::parse_target;
use bubble_core::{DataDir, RepoRegistry};
use bubble_git::GitStore;
use regex::Regex;
use serde::Serialize;

/// Maximum target string length.
pub const MAX_TARGET_LENGTH: usize = 500;

static GITHUB_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._-]+$").unwrap());

const SHELL_METACHARACTERS: &str = ";|&$`\\(){}[]!#";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayStatus {
    Ok,
    Error,
    RateLimited,
    UnknownRepo,
}

impl std::fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RelayStatus::Ok => "ok",
            RelayStatus::Error => "error",
            RelayStatus::RateLimited => "rate_limited",
            RelayStatus::UnknownRepo => "unknown_repo",
        };
        f.write_str(s)
    }
}

/// Validate a target string from a relay request. Returns
/// `(status, message)`; `Ok` means the target may be opened.
pub async fn validate_relay_target(data_dir: &DataDir, target: &str) -> (RelayStatus, String) {
    if target.is_empty() {
        return (RelayStatus::Error, "Empty target.".to_owned());
    }

    if target.len() > MAX_TARGET_LENGTH {
        return (RelayStatus::Error, "Target too long.".to_owned());
    }

    // Local paths: containers must not reach the host filesystem.
    if target.starts_with('.') || target.starts_with('/') || target.starts_with('~') {
        return (
            RelayStatus::Error,
            "Local paths are not allowed via relay.".to_owned(),
        );
    }

    // A leading '-' could become a CLI option.
    if target.starts_with('-') {
        return (RelayStatus::Error, "Invalid target.".to_owned());
    }

    if target.contains("--path") {
        return (
            RelayStatus::Error,
            "The --path flag is not allowed via relay.".to_owned(),
        );
    }

    if target.chars().any(|c| SHELL_METACHARACTERS.contains(c)) {
        return (
            RelayStatus::Error,
            "Invalid characters in target.".to_owned(),
        );
    }

    if target.contains("..") {
        return (
            RelayStatus::Error,
            "Path traversal is not allowed.".to_owned(),
        );
    }

    let mut registry = RepoRegistry::load(data_dir.repos_file());
    let parsed = match parse_target(target, &mut registry).await {
        Ok(parsed) => parsed,
        Err(e) => return (RelayStatus::Error, e.to_string()),
    };

    if !GITHUB_NAME_RE.is_match(&parsed.owner) {
        return (
            RelayStatus::Error,
            format!("Invalid owner name: {:?}", parsed.owner),
        );
    }
    if !GITHUB_NAME_RE.is_match(&parsed.repo) {
        return (
            RelayStatus::Error,
            format!("Invalid repo name: {:?}", parsed.repo),
        );
    }

    // Only repos that already have a mirror; the relay never triggers
    // a new clone.
    let store = GitStore::new(data_dir.git_dir());
    if !store.repo_is_known(&parsed.org_repo()) {
        return (
            RelayStatus::UnknownRepo,
            format!(
                "Repo '{}' is not available. Open it outside of a bubble first.",
                parsed.org_repo()
            ),
        );
    }

    (RelayStatus::Ok, String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_dir() -> (tempfile::TempDir, DataDir) {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        data.ensure().unwrap();
        (dir, data)
    }

    fn known(data: &DataDir, org_repo: &str) {
        let store = GitStore::new(data.git_dir());
        std::fs::create_dir_all(store.bare_repo_path(org_repo)).unwrap();
    }

    #[tokio::test]
    async fn accepts_known_repo() {
        let (_d, data) = data_dir();
        known(&data, "leanprover/lean4");
        let (status, _) = validate_relay_target(&data, "leanprover/lean4").await;
        assert_eq!(status, RelayStatus::Ok);
    }

    #[tokio::test]
    async fn rejects_unknown_repo() {
        let (_d, data) = data_dir();
        let (status, message) = validate_relay_target(&data, "someorg/somerepo").await;
        assert_eq!(status, RelayStatus::UnknownRepo);
        assert!(message.contains("someorg/somerepo"));
    }

    #[tokio::test]
    async fn rejects_local_paths() {
        let (_d, data) = data_dir();
        for target in ["./local", "/etc/passwd", "~/repo", "../up"] {
            let (status, message) = validate_relay_target(&data, target).await;
            assert_eq!(status, RelayStatus::Error, "target {target:?}");
            assert!(message.contains("not allowed"), "target {target:?}");
        }
    }

    #[tokio::test]
    async fn rejects_option_injection() {
        let (_d, data) = data_dir();
        let (status, _) = validate_relay_target(&data, "--name evil").await;
        assert_eq!(status, RelayStatus::Error);

        let (status, message) = validate_relay_target(&data, "o/r --path x").await;
        assert_eq!(status, RelayStatus::Error);
        assert!(message.contains("--path"));
    }

    #[tokio::test]
    async fn rejects_shell_metacharacters() {
        let (_d, data) = data_dir();
        for target in [
            "o/r;rm", "o/r|x", "o/r&x", "o/r$x", "o/r`x", "o/r(x", "o/r{x", "o/r[x", "o/r!x",
            "o/r#x",
        ] {
            let (status, _) = validate_relay_target(&data, target).await;
            assert_eq!(status, RelayStatus::Error, "target {target:?}");
        }
    }

    #[tokio::test]
    async fn rejects_traversal_anywhere() {
        let (_d, data) = data_dir();
        let (status, message) = validate_relay_target(&data, "o/r/tree/a..b").await;
        assert_eq!(status, RelayStatus::Error);
        assert!(message.contains("traversal"));
    }

    #[tokio::test]
    async fn rejects_empty_and_oversize() {
        let (_d, data) = data_dir();
        let (status, _) = validate_relay_target(&data, "").await;
        assert_eq!(status, RelayStatus::Error);

        let long = format!("o/{}", "r".repeat(MAX_TARGET_LENGTH));
        let (status, message) = validate_relay_target(&data, &long).await;
        assert_eq!(status, RelayStatus::Error);
        assert!(message.contains("too long"));
    }

    #[tokio::test]
    async fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RelayStatus::RateLimited).unwrap(),
            "\"rate_limited\""
        );
        assert_eq!(
            serde_json::to_string(&RelayStatus::UnknownRepo).unwrap(),
            "\"unknown_repo\""
        );
    }
}
