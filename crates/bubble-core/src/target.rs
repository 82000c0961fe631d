//! GitHub URL and target string parsing.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::repo_registry::RepoRegistry;

static SSH_REMOTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^git@github\.com:([^/]+)/(.+?)(?:\.git)?$").unwrap());
static HTTPS_REMOTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://github\.com/([^/]+)/(.+?)(?:\.git)?$").unwrap());
static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum TargetParseError {
    #[error("Empty target: {0:?}")]
    Empty(String),

    #[error("Path does not exist: {0}")]
    PathDoesNotExist(String),

    #[error("{0} is not a git repository.")]
    NotAGitRepo(String),

    #[error("No remote 'origin' found. bubble needs a GitHub remote to clone from.")]
    NoOriginRemote,

    #[error("Remote URL is not a GitHub repository: {0}")]
    NotGitHubRemote(String),

    #[error("HEAD is detached. Check out a branch first.")]
    DetachedHead,

    #[error("Working tree has uncommitted changes. Commit or stash them first.")]
    DirtyWorkTree,

    #[error(
        "'{0}' looks like a PR number, but the current directory is not a git repository \
         with a GitHub remote."
    )]
    BareNumberOutsideRepo(String),

    #[error("Invalid PR number: {0:?}")]
    InvalidPrNumber(String),

    #[error("Empty branch name in: {0:?}")]
    EmptyBranch(String),

    #[error("Invalid owner or repo name: {0:?}")]
    InvalidName(String),

    #[error("'{short}' is ambiguous. Did you mean: {}?", options.join(", "))]
    Ambiguous { short: String, options: Vec<String> },

    #[error("Unknown repo '{0}'. Use the full owner/repo form first.")]
    UnknownShort(String),

    #[error(
        "Unknown repo '{0}'. Use the full owner/repo form first. \
         If this is a local path, use ./{0} or --path."
    )]
    UnknownShortOrPath(String),

    #[error(
        "Cannot parse target: {0:?}. Use a GitHub URL or owner/repo format. \
         For a local path, use ./{0} or --path."
    )]
    Unparseable(String),

    #[error("git failed: {0}")]
    Git(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Repo,
    Pr,
    Branch,
    Commit,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TargetKind::Repo => "repo",
            TargetKind::Pr => "pr",
            TargetKind::Branch => "branch",
            TargetKind::Commit => "commit",
        };
        f.write_str(s)
    }
}

/// Parsed target specification for a bubble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub owner: String,
    pub repo: String,
    pub kind: TargetKind,
    /// PR number, branch name, commit SHA, or empty for `repo`.
    pub ref_name: String,
    /// Raw input string.
    pub original: String,
    /// Set when the target came from a local filesystem path; always a
    /// `branch`-kind target rooted at the checkout.
    pub local_path: Option<PathBuf>,
}

impl Target {
    pub fn org_repo(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub fn short_name(&self) -> String {
        self.repo.to_lowercase()
    }

    /// The canonical GitHub URL for this target. Re-parsing it yields
    /// an equal `{owner, repo, kind, ref}`.
    pub fn canonical_url(&self) -> String {
        let base = format!("https://github.com/{}/{}", self.owner, self.repo);
        match self.kind {
            TargetKind::Repo => base,
            TargetKind::Pr => format!("{base}/pull/{}", self.ref_name),
            TargetKind::Branch => format!("{base}/tree/{}", self.ref_name),
            TargetKind::Commit => format!("{base}/commit/{}", self.ref_name),
        }
    }
}

/// Extract `(owner, repo)` from a GitHub remote URL.
///
/// Handles `https://github.com/owner/repo[.git]` and
/// `git@github.com:owner/repo[.git]`.
fn parse_github_remote(url: &str) -> Result<(String, String), TargetParseError> {
    for re in [&*SSH_REMOTE_RE, &*HTTPS_REMOTE_RE] {
        if let Some(caps) = re.captures(url) {
            let owner = caps[1].to_owned();
            let repo = caps[2].to_owned();
            if !repo.contains('/') {
                return Ok((owner, repo));
            }
        }
    }
    Err(TargetParseError::NotGitHubRemote(url.to_owned()))
}

async fn git_in(dir: &Path, args: &[&str]) -> Result<Option<String>, TargetParseError> {
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map_err(|e| TargetParseError::Git(e.to_string()))?;
    if output.status.success() {
        Ok(Some(
            String::from_utf8_lossy(&output.stdout).trim().to_owned(),
        ))
    } else {
        Ok(None)
    }
}

/// Extract `(owner, repo, repo_root)` from a local git checkout.
async fn git_repo_info(path: &Path) -> Result<(String, String, PathBuf), TargetParseError> {
    let display = path.display().to_string();
    let repo_root = git_in(path, &["rev-parse", "--show-toplevel"])
        .await?
        .ok_or(TargetParseError::NotAGitRepo(display))?;
    let repo_root = PathBuf::from(repo_root);

    let remote_url = git_in(&repo_root, &["remote", "get-url", "origin"])
        .await?
        .filter(|url| !url.is_empty())
        .ok_or(TargetParseError::NoOriginRemote)?;

    let (owner, repo) = parse_github_remote(&remote_url)?;
    Ok((owner, repo, repo_root))
}

/// Parse a local filesystem path into a branch target.
///
/// Verifies the path is a git repo with a GitHub `origin`, a
/// checked-out branch, and a clean working tree. The branch does NOT
/// need to be pushed — local objects are shared via `--reference`.
async fn parse_local_path(raw: &str) -> Result<Target, TargetParseError> {
    let path = PathBuf::from(raw);
    if !path.exists() {
        return Err(TargetParseError::PathDoesNotExist(raw.to_owned()));
    }

    let (owner, repo, repo_root) = git_repo_info(&path).await?;

    let branch = git_in(&repo_root, &["symbolic-ref", "--short", "HEAD"])
        .await?
        .filter(|b| !b.is_empty())
        .ok_or(TargetParseError::DetachedHead)?;

    let status = git_in(&repo_root, &["status", "--porcelain"])
        .await?
        .unwrap_or_default();
    if !status.is_empty() {
        return Err(TargetParseError::DirtyWorkTree);
    }

    Ok(Target {
        owner,
        repo,
        kind: TargetKind::Branch,
        ref_name: branch,
        original: raw.to_owned(),
        local_path: Some(repo_root),
    })
}

fn check_names(owner: &str, repo: &str) -> Result<(), TargetParseError> {
    for name in [owner, repo] {
        if !NAME_RE.is_match(name) {
            return Err(TargetParseError::InvalidName(name.to_owned()));
        }
    }
    Ok(())
}

fn parse_pr_number(s: &str) -> Result<String, TargetParseError> {
    s.parse::<u64>()
        .map(|n| n.to_string())
        .map_err(|_| TargetParseError::InvalidPrNumber(s.to_owned()))
}

fn short_name_error(registry: &RepoRegistry, short: &str, with_path_hint: bool) -> TargetParseError {
    if registry.is_ambiguous(short) {
        TargetParseError::Ambiguous {
            short: short.to_owned(),
            options: registry.ambiguous_options(short),
        }
    } else if with_path_hint {
        TargetParseError::UnknownShortOrPath(short.to_owned())
    } else {
        TargetParseError::UnknownShort(short.to_owned())
    }
}

/// Parse a target string into a [`Target`], learning the short name on
/// success.
///
/// Accepted forms:
///
/// ```text
/// .  ./path  ../path  /path          local filesystem path
/// 123                               PR number in the CWD's repo
/// https://github.com/o/r/pull/123
/// github.com/o/r/pull/123
/// o/r/pull/123  o/r/tree/branch  o/r/commit/sha  o/r
/// short/pull/123  short/tree/branch  short       via the registry
/// ```
pub async fn parse_target(
    raw: &str,
    registry: &mut RepoRegistry,
) -> Result<Target, TargetParseError> {
    let original = raw.trim().to_owned();
    let mut s = original.clone();

    // Local filesystem paths.
    if s.starts_with('/') || s.starts_with('.') {
        let target = parse_local_path(&s).await?;
        check_names(&target.owner, &target.repo)?;
        let _ = registry.register(&target.owner, &target.repo);
        return Ok(target);
    }

    // Strip URL scheme, host prefix, and trailing slashes.
    for prefix in ["https://", "http://"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.to_owned();
            break;
        }
    }
    if let Some(rest) = s.strip_prefix("github.com/") {
        s = rest.to_owned();
    }
    let s = s.trim_end_matches('/').to_owned();

    if s.is_empty() {
        return Err(TargetParseError::Empty(raw.to_owned()));
    }

    // Bare number: PR in the current directory's repo.
    if s.chars().all(|c| c.is_ascii_digit()) {
        let (owner, repo, _) = git_repo_info(Path::new("."))
            .await
            .map_err(|_| TargetParseError::BareNumberOutsideRepo(s.clone()))?;
        check_names(&owner, &repo)?;
        let _ = registry.register(&owner, &repo);
        return Ok(Target {
            owner,
            repo,
            kind: TargetKind::Pr,
            ref_name: s,
            original,
            local_path: None,
        });
    }

    let parts: Vec<&str> = s.split('/').collect();

    fn finish(
        registry: &mut RepoRegistry,
        original: &str,
        owner: String,
        repo: String,
        kind: TargetKind,
        ref_name: String,
    ) -> Result<Target, TargetParseError> {
        check_names(&owner, &repo)?;
        let _ = registry.register(&owner, &repo);
        Ok(Target {
            owner,
            repo,
            kind,
            ref_name,
            original: original.to_owned(),
            local_path: None,
        })
    }

    // owner/repo/... forms.
    if parts.len() >= 4 && parts[2] == "pull" {
        let pr = parse_pr_number(parts[3])?;
        return finish(
            registry,
            &original,
            parts[0].to_owned(),
            parts[1].to_owned(),
            TargetKind::Pr,
            pr,
        );
    }

    if parts.len() >= 4 && parts[2] == "tree" {
        let branch = parts[3..].join("/");
        if branch.is_empty() {
            return Err(TargetParseError::EmptyBranch(raw.to_owned()));
        }
        return finish(
            registry,
            &original,
            parts[0].to_owned(),
            parts[1].to_owned(),
            TargetKind::Branch,
            branch,
        );
    }

    if parts.len() >= 4 && parts[2] == "commit" {
        return finish(
            registry,
            &original,
            parts[0].to_owned(),
            parts[1].to_owned(),
            TargetKind::Commit,
            parts[3].to_owned(),
        );
    }

    if parts.len() == 2 {
        return finish(
            registry,
            &original,
            parts[0].to_owned(),
            parts[1].to_owned(),
            TargetKind::Repo,
            String::new(),
        );
    }

    // Short-name forms, resolved via the registry.
    if parts.len() >= 3 && parts[1] == "pull" {
        let short = parts[0];
        let Some(resolved) = registry.resolve(short) else {
            return Err(short_name_error(registry, short, false));
        };
        let (owner, repo) = resolved.split_once('/').expect("registry stores owner/repo");
        let pr = parse_pr_number(parts[2])?;
        return finish(registry, &original, owner.to_owned(), repo.to_owned(), TargetKind::Pr, pr);
    }

    if parts.len() >= 3 && parts[1] == "tree" {
        let short = parts[0];
        let Some(resolved) = registry.resolve(short) else {
            return Err(short_name_error(registry, short, false));
        };
        let (owner, repo) = resolved.split_once('/').expect("registry stores owner/repo");
        let branch = parts[2..].join("/");
        return finish(
            registry,
            &original,
            owner.to_owned(),
            repo.to_owned(),
            TargetKind::Branch,
            branch,
        );
    }

    if parts.len() == 1 {
        let short = parts[0];
        let Some(resolved) = registry.resolve(short) else {
            return Err(short_name_error(registry, short, true));
        };
        let (owner, repo) = resolved.split_once('/').expect("registry stores owner/repo");
        return finish(
            registry,
            &original,
            owner.to_owned(),
            repo.to_owned(),
            TargetKind::Repo,
            String::new(),
        );
    }

    Err(TargetParseError::Unparseable(raw.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, RepoRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = RepoRegistry::load(dir.path().join("repos.json"));
        reg.register("leanprover-community", "mathlib4").unwrap();
        reg.register("leanprover", "lean4").unwrap();
        (dir, reg)
    }

    #[tokio::test]
    async fn pr_url() {
        let (_d, mut reg) = registry();
        let t = parse_target(
            "https://github.com/leanprover-community/mathlib4/pull/35219",
            &mut reg,
        )
        .await
        .unwrap();
        assert_eq!(t.owner, "leanprover-community");
        assert_eq!(t.repo, "mathlib4");
        assert_eq!(t.kind, TargetKind::Pr);
        assert_eq!(t.ref_name, "35219");
    }

    #[tokio::test]
    async fn pr_url_with_extra_path() {
        let (_d, mut reg) = registry();
        let t = parse_target(
            "https://github.com/leanprover-community/mathlib4/pull/35219/files",
            &mut reg,
        )
        .await
        .unwrap();
        assert_eq!(t.kind, TargetKind::Pr);
        assert_eq!(t.ref_name, "35219");
    }

    #[tokio::test]
    async fn branch_url_with_slashes() {
        let (_d, mut reg) = registry();
        let t = parse_target(
            "https://github.com/leanprover/lean4/tree/feat/some-feature",
            &mut reg,
        )
        .await
        .unwrap();
        assert_eq!(t.kind, TargetKind::Branch);
        assert_eq!(t.ref_name, "feat/some-feature");
    }

    #[tokio::test]
    async fn commit_url() {
        let (_d, mut reg) = registry();
        let t = parse_target(
            "https://github.com/leanprover/lean4/commit/abc123def456",
            &mut reg,
        )
        .await
        .unwrap();
        assert_eq!(t.kind, TargetKind::Commit);
        assert_eq!(t.ref_name, "abc123def456");
    }

    #[tokio::test]
    async fn repo_url_trailing_slash() {
        let (_d, mut reg) = registry();
        let t = parse_target("https://github.com/leanprover/lean4/", &mut reg)
            .await
            .unwrap();
        assert_eq!(t.kind, TargetKind::Repo);
        assert_eq!(t.ref_name, "");
    }

    #[tokio::test]
    async fn no_scheme_no_host() {
        let (_d, mut reg) = registry();
        let t = parse_target("github.com/leanprover/lean4/pull/123", &mut reg)
            .await
            .unwrap();
        assert_eq!(t.kind, TargetKind::Pr);
        let t = parse_target("leanprover-community/mathlib4/pull/35219", &mut reg)
            .await
            .unwrap();
        assert_eq!(t.ref_name, "35219");
    }

    #[tokio::test]
    async fn short_name_forms() {
        let (_d, mut reg) = registry();
        let t = parse_target("mathlib4", &mut reg).await.unwrap();
        assert_eq!(t.owner, "leanprover-community");
        assert_eq!(t.kind, TargetKind::Repo);

        let t = parse_target("mathlib4/pull/123", &mut reg).await.unwrap();
        assert_eq!(t.kind, TargetKind::Pr);
        assert_eq!(t.ref_name, "123");

        let t = parse_target("lean4/tree/some-branch", &mut reg).await.unwrap();
        assert_eq!(t.kind, TargetKind::Branch);
        assert_eq!(t.ref_name, "some-branch");
    }

    #[tokio::test]
    async fn unknown_short_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = RepoRegistry::load(dir.path().join("repos.json"));
        let err = parse_target("unknown", &mut reg).await.unwrap_err();
        assert!(err.to_string().contains("Unknown repo"));
    }

    #[tokio::test]
    async fn ambiguous_short_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = RepoRegistry::load(dir.path().join("repos.json"));
        reg.register("alice", "utils").unwrap();
        reg.register("bob", "utils").unwrap();
        let err = parse_target("utils", &mut reg).await.unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
        assert!(err.to_string().contains("alice/utils"));
    }

    #[tokio::test]
    async fn empty_target() {
        let (_d, mut reg) = registry();
        let err = parse_target("", &mut reg).await.unwrap_err();
        assert!(matches!(err, TargetParseError::Empty(_)));
    }

    #[tokio::test]
    async fn invalid_pr_number() {
        let (_d, mut reg) = registry();
        let err = parse_target("leanprover/lean4/pull/notanumber", &mut reg)
            .await
            .unwrap_err();
        assert!(matches!(err, TargetParseError::InvalidPrNumber(_)));
    }

    #[tokio::test]
    async fn successful_parse_registers_short_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = RepoRegistry::load(dir.path().join("repos.json"));
        parse_target("someorg/newrepo", &mut reg).await.unwrap();
        assert_eq!(reg.resolve("newrepo").as_deref(), Some("someorg/newrepo"));
    }

    #[tokio::test]
    async fn original_preserved() {
        let (_d, mut reg) = registry();
        let raw = "https://github.com/leanprover/lean4/pull/123";
        let t = parse_target(raw, &mut reg).await.unwrap();
        assert_eq!(t.original, raw);
    }

    #[tokio::test]
    async fn canonical_url_round_trips() {
        let (_d, mut reg) = registry();
        for raw in [
            "leanprover/lean4",
            "leanprover/lean4/pull/42",
            "leanprover/lean4/tree/releases/v4.27.0",
            "leanprover/lean4/commit/0123abc",
        ] {
            let t = parse_target(raw, &mut reg).await.unwrap();
            let t2 = parse_target(&t.canonical_url(), &mut reg).await.unwrap();
            assert_eq!((t.owner, t.repo, t.kind, t.ref_name),
                       (t2.owner.clone(), t2.repo.clone(), t2.kind, t2.ref_name.clone()));
        }
    }

    #[test]
    fn github_remote_formats() {
        assert_eq!(
            parse_github_remote("git@github.com:leanprover/lean4.git").unwrap(),
            ("leanprover".to_owned(), "lean4".to_owned())
        );
        assert_eq!(
            parse_github_remote("https://github.com/leanprover/lean4").unwrap(),
            ("leanprover".to_owned(), "lean4".to_owned())
        );
        assert!(parse_github_remote("https://gitlab.com/x/y.git").is_err());
    }

    #[tokio::test]
    async fn local_path_that_does_not_exist() {
        let (_d, mut reg) = registry();
        let err = parse_target("./definitely-not-a-real-path-xyz", &mut reg)
            .await
            .unwrap_err();
        assert!(matches!(err, TargetParseError::PathDoesNotExist(_)));
    }

    proptest::proptest! {
        #[test]
        fn parsed_names_always_match_the_name_regex(
            owner in "[A-Za-z0-9._-]{1,20}",
            repo in "[A-Za-z0-9._-]{1,20}",
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let mut reg = RepoRegistry::load(dir.path().join("repos.json"));
                let raw = format!("{owner}/{repo}");
                if let Ok(t) = parse_target(&raw, &mut reg).await {
                    assert!(NAME_RE.is_match(&t.owner));
                    assert!(NAME_RE.is_match(&t.repo));
                }
            });
        }
    }
}
