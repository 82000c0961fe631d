//! GitHub PR head metadata lookup.
//!
//! Best effort: PR checkout works without it (the `pull/<N>/head` ref
//! fallback), but knowing the head branch and fork lets the clone use
//! real branch names and a proper fork remote.

use std::time::Duration;

use serde::Deserialize;

const API_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("bubble/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("GitHub API request failed")]
    Request { source: reqwest::Error },

    #[error("GitHub API returned {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },
}

/// Head branch info for a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrHead {
    /// Branch name on the head repo.
    pub head_ref: String,
    /// `owner/repo` of the head repo.
    pub head_repo: String,
    /// Clone URL of the head repo.
    pub clone_url: String,
}

impl PrHead {
    /// Whether the PR comes from a fork of `base_org_repo`.
    pub fn is_fork_of(&self, base_org_repo: &str) -> bool {
        self.head_repo != base_org_repo
    }
}

#[derive(Deserialize)]
struct PrResponse {
    head: HeadResponse,
}

#[derive(Deserialize)]
struct HeadResponse {
    #[serde(rename = "ref")]
    ref_name: String,
    repo: Option<RepoResponse>,
}

#[derive(Deserialize)]
struct RepoResponse {
    full_name: String,
    clone_url: String,
}

/// Look up the head of `org_repo#number`. Returns `None` when the head
/// repo has been deleted.
pub async fn pr_head(org_repo: &str, number: u64) -> Result<Option<PrHead>, GitHubError> {
    let url = format!("https://api.github.com/repos/{org_repo}/pulls/{number}");
    let client = reqwest::Client::builder()
        .timeout(API_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| GitHubError::Request { source: e })?;

    let response = client
        .get(&url)
        .header("Accept", "application/vnd.github+json")
        .send()
        .await
        .map_err(|e| GitHubError::Request { source: e })?;

    if !response.status().is_success() {
        return Err(GitHubError::Status {
            status: response.status(),
            url,
        });
    }

    let pr: PrResponse = response
        .json()
        .await
        .map_err(|e| GitHubError::Request { source: e })?;

    Ok(pr.head.repo.map(|repo| PrHead {
        head_ref: pr.head.ref_name,
        head_repo: repo.full_name,
        clone_url: repo.clone_url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_detection() {
        let head = PrHead {
            head_ref: "fix-grind".to_owned(),
            head_repo: "alice/lean4".to_owned(),
            clone_url: "https://github.com/alice/lean4.git".to_owned(),
        };
        assert!(head.is_fork_of("leanprover/lean4"));
        assert!(!head.is_fork_of("alice/lean4"));
    }

    #[test]
    fn parses_pr_response() {
        let raw = r#"{
            "head": {
                "ref": "feature-x",
                "repo": {
                    "full_name": "alice/lean4",
                    "clone_url": "https://github.com/alice/lean4.git"
                }
            }
        }"#;
        let pr: PrResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(pr.head.ref_name, "feature-x");
        assert_eq!(pr.head.repo.unwrap().full_name, "alice/lean4");
    }

    #[test]
    fn parses_deleted_head_repo() {
        let raw = r#"{"head": {"ref": "gone", "repo": null}}"#;
        let pr: PrResponse = serde_json::from_str(raw).unwrap();
        assert!(pr.head.repo.is_none());
    }
}
