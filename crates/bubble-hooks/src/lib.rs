//! Language/framework hooks.
//!
//! A hook inspects a repo ref in the bare mirror (no container needed)
//! and, when it matches, decides the image, post-clone behavior, extra
//! allowlist domains, git dependencies to pre-mirror, and writable
//! shared mounts for the bubble. Hooks are tagged variants behind a
//! fixed-priority registry, not an open class hierarchy.

pub mod lean;

use std::path::Path;

use bubble_runtime::{ContainerRuntime, RuntimeError};

pub use lean::LeanHook;

/// A git dependency reported by a hook, to be pre-mirrored and mounted
/// into the bubble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitDependency {
    pub name: String,
    pub url: String,
    /// Pinned 40-hex commit.
    pub rev: String,
    /// `owner/repo` when the URL points at GitHub.
    pub org_repo: String,
    pub sub_dir: Option<String>,
}

/// A writable host directory a hook wants shared into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedMount {
    /// Directory name under the data dir, created mode 0777.
    pub host_dir_name: &'static str,
    pub container_path: &'static str,
    /// Exported from `/etc/profile.d/bubble-shared.sh`.
    pub env_var: &'static str,
}

/// A detected language hook, carrying its per-detection state.
#[derive(Debug, Clone)]
pub enum Hook {
    Lean(LeanHook),
}

impl Hook {
    /// Run detection over all hooks in priority order against a ref in
    /// the bare repo. Returns the first match.
    pub async fn select(bare_repo: &Path, ref_name: &str) -> Option<Hook> {
        // Priority order; new hooks slot in here.
        if let Some(lean) = LeanHook::detect(bare_repo, ref_name).await {
            return Some(Hook::Lean(lean));
        }
        None
    }

    pub fn name(&self) -> &'static str {
        match self {
            Hook::Lean(_) => "Lean 4",
        }
    }

    /// The image this hook wants the bubble launched from.
    pub fn image_name(&self) -> String {
        match self {
            Hook::Lean(lean) => lean.image_name(),
        }
    }

    /// Extra domains for the network allowlist.
    pub fn network_domains(&self) -> Vec<String> {
        match self {
            Hook::Lean(lean) => lean.network_domains(),
        }
    }

    /// Writable shared mounts to attach.
    pub fn shared_mounts(&self) -> Vec<SharedMount> {
        match self {
            Hook::Lean(lean) => lean.shared_mounts(),
        }
    }

    /// Pinned git dependencies parsed from the project manifest.
    pub fn git_dependencies(&self) -> &[GitDependency] {
        match self {
            Hook::Lean(lean) => lean.git_dependencies(),
        }
    }

    /// A workspace file for the editor to open instead of the project
    /// root, when the hook has one.
    pub fn workspace_file(&self) -> Option<String> {
        match self {
            Hook::Lean(_) => None,
        }
    }

    /// Run after the repo is cloned inside the container.
    pub async fn post_clone<R: ContainerRuntime>(
        &self,
        runtime: &R,
        container: &str,
        project_dir: &str,
    ) -> Result<(), RuntimeError> {
        match self {
            Hook::Lean(lean) => lean.post_clone(runtime, container, project_dir).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "t@t")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "t@t")
            .output()
            .unwrap()
            .status;
        assert!(status.success(), "git {args:?} failed");
    }

    /// Bare repo with the given files committed on `main`.
    pub(crate) fn bare_repo_with(files: &[(&str, &str)]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let bare = dir.path().join("test.git");
        let work = dir.path().join("work");
        let out = Command::new("git")
            .args(["init", "--bare", "-b", "main"])
            .arg(&bare)
            .output()
            .unwrap();
        assert!(out.status.success());
        let out = Command::new("git")
            .arg("clone")
            .arg(&bare)
            .arg(&work)
            .output()
            .unwrap();
        assert!(out.status.success());
        for (path, contents) in files {
            let full = work.join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, contents).unwrap();
        }
        git(&work, &["add", "."]);
        git(&work, &["commit", "-m", "init"]);
        git(&work, &["push", "origin", "main"]);
        (dir, bare)
    }

    #[tokio::test]
    async fn selects_lean_for_lean_repo() {
        let (_dir, bare) = bare_repo_with(&[("lean-toolchain", "leanprover/lean4:v4.27.0\n")]);
        let hook = Hook::select(&bare, "main").await.unwrap();
        assert_eq!(hook.name(), "Lean 4");
        assert_eq!(hook.image_name(), "lean-v4.27.0");
    }

    #[tokio::test]
    async fn selects_nothing_for_plain_repo() {
        let (_dir, bare) = bare_repo_with(&[("README.md", "# hi\n")]);
        assert!(Hook::select(&bare, "main").await.is_none());
    }
}
