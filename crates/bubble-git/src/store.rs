use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git failed: {args:?}\n{detail}")]
    CommandFailed { args: Vec<String>, detail: String },

    #[error("could not run git")]
    Spawn { source: std::io::Error },

    #[error("could not lock {path}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not read git store at {path}")]
    ReadStore {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The clone URL for an `owner/repo` pair.
pub fn github_url(org_repo: &str) -> String {
    format!("https://github.com/{org_repo}.git")
}

/// The per-repo bare mirror store.
///
/// Mirrors are named `<repo>.git` (owner-less): two owners' forks of
/// the same repo share one mirror, which is exactly what `--reference`
/// wants.
#[derive(Debug, Clone)]
pub struct GitStore {
    git_dir: PathBuf,
}

impl GitStore {
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_dir: git_dir.into(),
        }
    }

    /// Path of the bare mirror for `org_repo`, e.g.
    /// `leanprover/lean4` → `<git-dir>/lean4.git`.
    pub fn bare_repo_path(&self, org_repo: &str) -> PathBuf {
        let repo_name = org_repo.rsplit('/').next().unwrap_or(org_repo);
        self.git_dir.join(format!("{repo_name}.git"))
    }

    fn lock_path(&self, org_repo: &str) -> PathBuf {
        let mut path = self.bare_repo_path(org_repo).into_os_string();
        path.push(".lock");
        PathBuf::from(path)
    }

    /// Whether a mirror for this repo already exists.
    pub fn repo_is_known(&self, org_repo: &str) -> bool {
        self.bare_repo_path(org_repo).exists()
    }

    /// Take the exclusive per-repo lock. The lock file is empty and
    /// persists between runs; state never goes through it.
    fn lock(&self, org_repo: &str) -> Result<fd_lock::RwLock<std::fs::File>, GitError> {
        let path = self.lock_path(org_repo);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GitError::Lock {
                path: path.clone(),
                source: e,
            })?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| GitError::Lock { path, source: e })?;
        Ok(fd_lock::RwLock::new(file))
    }

    /// Create the bare mirror if it doesn't exist. Safe to race: the
    /// clone happens at most once.
    pub async fn init_bare_repo(&self, org_repo: &str) -> Result<PathBuf, GitError> {
        let path = self.bare_repo_path(org_repo);
        if path.exists() {
            return Ok(path);
        }

        let mut lock = self.lock(org_repo)?;
        let _guard = lock.write().map_err(|e| GitError::Lock {
            path: self.lock_path(org_repo),
            source: e,
        })?;
        // Re-check under the lock: another process may have cloned
        // while we waited.
        if path.exists() {
            return Ok(path);
        }

        info!(repo = org_repo, "cloning bare mirror");
        let url = github_url(org_repo);
        git(None, &["clone", "--bare", &url, &path.to_string_lossy()]).await?;

        // Fetch all branch, tag, and PR head refs on update.
        let path_str = path.to_string_lossy();
        git(
            None,
            &[
                "-C",
                &path_str,
                "config",
                "remote.origin.fetch",
                "+refs/heads/*:refs/heads/*",
            ],
        )
        .await?;
        for refspec in ["+refs/tags/*:refs/tags/*", "+refs/pull/*/head:refs/pull/*/head"] {
            git(
                None,
                &["-C", &path_str, "config", "--add", "remote.origin.fetch", refspec],
            )
            .await?;
        }
        Ok(path)
    }

    /// Make sure `rev` resolves to a commit in the mirror, fetching if
    /// necessary. Returns whether it does.
    pub async fn ensure_rev_available(&self, org_repo: &str, rev: &str) -> Result<bool, GitError> {
        let path = self.init_bare_repo(org_repo).await?;

        // Quick positive check without the lock.
        if rev_is_commit(&path, rev).await? {
            return Ok(true);
        }

        let mut lock = self.lock(org_repo)?;
        let _guard = lock.write().map_err(|e| GitError::Lock {
            path: self.lock_path(org_repo),
            source: e,
        })?;
        if rev_is_commit(&path, rev).await? {
            return Ok(true);
        }

        info!(repo = org_repo, rev, "fetching to resolve revision");
        git(Some(&path), &["fetch", "--all"]).await?;
        rev_is_commit(&path, rev).await
    }

    /// Fetch a specific refspec into the mirror.
    pub async fn fetch_ref(&self, org_repo: &str, refspec: &str) -> Result<(), GitError> {
        let path = self.init_bare_repo(org_repo).await?;
        let mut lock = self.lock(org_repo)?;
        let _guard = lock.write().map_err(|e| GitError::Lock {
            path: self.lock_path(org_repo),
            source: e,
        })?;
        git(Some(&path), &["fetch", "origin", refspec]).await.map(|_| ())
    }

    /// Fetch every mirror in the store. Per-repo failures are logged
    /// and skipped; returns the number of repos updated.
    pub async fn update_all_repos(&self) -> Result<usize, GitError> {
        if !self.git_dir.exists() {
            return Ok(0);
        }
        let entries = std::fs::read_dir(&self.git_dir).map_err(|e| GitError::ReadStore {
            path: self.git_dir.clone(),
            source: e,
        })?;

        let mut updated = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() || path.extension().is_none_or(|e| e != "git") {
                continue;
            }
            let repo = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();

            let mut lock = self.lock(&repo)?;
            let guard = lock.write().map_err(|e| GitError::Lock {
                path: self.lock_path(&repo),
                source: e,
            });
            let Ok(_guard) = guard else {
                warn!(repo = %repo, "could not lock mirror, skipping");
                continue;
            };

            info!(repo = %repo, "updating mirror");
            match git(Some(&path), &["fetch", "--all", "--prune"]).await {
                Ok(_) => updated += 1,
                Err(e) => warn!(repo = %repo, error = %e, "update failed"),
            }
        }
        Ok(updated)
    }
}

/// Read a file's contents at a ref in a (bare) repo, without a
/// checkout. Returns `None` when the ref or path doesn't exist.
pub async fn show_file(
    repo: &Path,
    ref_name: &str,
    file_path: &str,
) -> Result<Option<String>, GitError> {
    let spec = format!("{ref_name}:{file_path}");
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(["show", &spec])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| GitError::Spawn { source: e })?;
    if output.status.success() {
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    } else {
        Ok(None)
    }
}

/// Whether `rev` names a commit in the repo at `path`. Uses `--`
/// before the rev so a hostile rev can't become an option.
async fn rev_is_commit(path: &Path, rev: &str) -> Result<bool, GitError> {
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(path)
        .args(["cat-file", "-t", "--", rev])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| GitError::Spawn { source: e })?;
    Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "commit")
}

async fn git(cwd: Option<&Path>, args: &[&str]) -> Result<String, GitError> {
    let mut cmd = tokio::process::Command::new("git");
    if let Some(cwd) = cwd {
        cmd.arg("-C").arg(cwd);
    }
    let output = cmd
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| GitError::Spawn { source: e })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    } else {
        Err(GitError::CommandFailed {
            args: args.iter().map(|s| (*s).to_owned()).collect(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_repo_path_uses_repo_name() {
        let store = GitStore::new("/data/git");
        assert_eq!(
            store.bare_repo_path("leanprover/lean4"),
            PathBuf::from("/data/git/lean4.git")
        );
    }

    #[test]
    fn lock_path_is_sibling_of_mirror() {
        let store = GitStore::new("/data/git");
        assert_eq!(
            store.lock_path("leanprover/lean4"),
            PathBuf::from("/data/git/lean4.git.lock")
        );
    }

    #[test]
    fn github_url_format() {
        assert_eq!(
            github_url("leanprover/lean4"),
            "https://github.com/leanprover/lean4.git"
        );
    }

    #[test]
    fn unknown_repo_is_not_known() {
        let dir = tempfile::tempdir().unwrap();
        let store = GitStore::new(dir.path());
        assert!(!store.repo_is_known("a/b"));
    }

    #[tokio::test]
    async fn update_all_repos_with_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = GitStore::new(dir.path().join("git"));
        assert_eq!(store.update_all_repos().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn init_is_idempotent_for_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = GitStore::new(dir.path());
        // Simulate an existing mirror: init must not try to clone.
        std::fs::create_dir_all(dir.path().join("lean4.git")).unwrap();
        let path = store.init_bare_repo("leanprover/lean4").await.unwrap();
        assert_eq!(path, dir.path().join("lean4.git"));
    }
}
