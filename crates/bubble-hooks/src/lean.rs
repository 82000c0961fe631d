//! Lean 4 hook.
//!
//! Detected by a `lean-toolchain` file at the ref. Pinned release
//! toolchains get a variant image with the toolchain pre-installed;
//! nightlies and branch toolchains fall back to the base `lean` image
//! and let elan install on first build. `lake-manifest.json` supplies
//! the pinned git dependencies so their mirrors can be mounted as
//! reference sources.

use std::path::Path;
use std::sync::LazyLock;

use bubble_core::sh_quote;
use bubble_git::show_file;
use bubble_runtime::{ContainerRuntime, RuntimeError};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v\d+\.\d+\.\d+(?:-rc\d+)?$").unwrap());
static REV_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-f]{40}$").unwrap());
static GITHUB_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://github\.com/|git@github\.com:)([^/]+)/([^/]+?)(?:\.git)?/?$").unwrap()
});

#[derive(Debug, Clone)]
pub struct LeanHook {
    /// The raw lean-toolchain contents, e.g. `leanprover/lean4:v4.27.0`.
    toolchain: String,
    /// The repo's short name (from the mirror path).
    repo_short: String,
    deps: Vec<super::GitDependency>,
}

/// Extract a pinned release version from a toolchain string.
///
/// `leanprover/lean4:v4.27.0` and bare `v4.27.0` forms pin a release
/// (rc suffixes included); nightlies and branch toolchains do not.
pub fn parse_lean_version(toolchain: &str) -> Option<&str> {
    let version = toolchain.rsplit(':').next().unwrap_or(toolchain).trim();
    VERSION_RE.is_match(version).then_some(version)
}

#[derive(Deserialize)]
struct LakeManifest {
    #[serde(default)]
    packages: Vec<LakePackage>,
}

#[derive(Deserialize)]
struct LakePackage {
    #[serde(default, rename = "type")]
    package_type: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    rev: String,
    #[serde(default, rename = "subDir")]
    sub_dir: Option<String>,
}

fn parse_manifest(contents: &str) -> Vec<super::GitDependency> {
    let Ok(manifest) = serde_json::from_str::<LakeManifest>(contents) else {
        debug!("unparseable lake-manifest.json, skipping dependencies");
        return Vec::new();
    };
    manifest
        .packages
        .into_iter()
        .filter(|p| p.package_type == "git")
        .filter_map(|p| {
            if !REV_RE.is_match(&p.rev) {
                debug!(package = %p.name, rev = %p.rev, "skipping dependency with unpinned rev");
                return None;
            }
            let caps = GITHUB_URL_RE.captures(&p.url)?;
            let org_repo = format!("{}/{}", &caps[1], &caps[2]);
            Some(super::GitDependency {
                name: p.name,
                url: p.url.clone(),
                rev: p.rev,
                org_repo,
                sub_dir: p.sub_dir,
            })
        })
        .collect()
}

impl LeanHook {
    /// Check for a `lean-toolchain` file at the ref; on a match, read
    /// the dependency manifest too.
    pub async fn detect(bare_repo: &Path, ref_name: &str) -> Option<Self> {
        let toolchain = show_file(bare_repo, ref_name, "lean-toolchain")
            .await
            .ok()
            .flatten()?
            .trim()
            .to_owned();

        let repo_short = bare_repo
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let deps = match show_file(bare_repo, ref_name, "lake-manifest.json").await {
            Ok(Some(contents)) => parse_manifest(&contents),
            _ => Vec::new(),
        };

        Some(Self {
            toolchain,
            repo_short,
            deps,
        })
    }

    pub fn toolchain(&self) -> &str {
        &self.toolchain
    }

    pub fn image_name(&self) -> String {
        match parse_lean_version(&self.toolchain) {
            Some(version) => format!("lean-{version}"),
            None => "lean".to_owned(),
        }
    }

    fn uses_mathlib(&self) -> bool {
        self.repo_short == "mathlib4" || self.deps.iter().any(|d| d.name == "mathlib")
    }

    pub fn network_domains(&self) -> Vec<String> {
        let mut domains = vec!["releases.lean-lang.org".to_owned()];
        if self.uses_mathlib() {
            // Mathlib's olean cache.
            domains.push("lakecache.blob.core.windows.net".to_owned());
        }
        domains
    }

    pub fn shared_mounts(&self) -> Vec<super::SharedMount> {
        if self.uses_mathlib() {
            vec![super::SharedMount {
                host_dir_name: "mathlib-cache",
                container_path: "/shared/mathlib-cache",
                env_var: "MATHLIB_CACHE_DIR",
            }]
        } else {
            Vec::new()
        }
    }

    pub fn git_dependencies(&self) -> &[super::GitDependency] {
        &self.deps
    }

    /// Write the fetch-cache sentinel the container-side editor
    /// extension runs on first attach. Mathlib users fetch the olean
    /// cache; the lean4 repo itself builds instead (it has no cache to
    /// fetch).
    pub async fn post_clone<R: ContainerRuntime>(
        &self,
        runtime: &R,
        container: &str,
        project_dir: &str,
    ) -> Result<(), RuntimeError> {
        let sentinel_cmd = if self.repo_short == "lean4" {
            "lake build"
        } else if self.uses_mathlib() {
            "lake exe cache get"
        } else {
            return Ok(());
        };

        let script = format!(
            "cd {dir} && printf '%s\\n' {cmd} > ~/.bubble-fetch-cache && chmod 600 ~/.bubble-fetch-cache",
            dir = sh_quote(project_dir),
            cmd = sh_quote(sentinel_cmd),
        );
        runtime
            .exec(container, &["su", "-", "user", "-c", &script])
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stable_version() {
        assert_eq!(
            parse_lean_version("leanprover/lean4:v4.16.0"),
            Some("v4.16.0")
        );
    }

    #[test]
    fn parses_rc_version() {
        assert_eq!(
            parse_lean_version("leanprover/lean4:v4.17.0-rc2"),
            Some("v4.17.0-rc2")
        );
    }

    #[test]
    fn nightly_has_no_pinned_version() {
        assert_eq!(parse_lean_version("leanprover/lean4:nightly-2025-01-15"), None);
    }

    #[test]
    fn custom_branch_has_no_pinned_version() {
        assert_eq!(parse_lean_version("leanprover/lean4:my-branch"), None);
    }

    #[test]
    fn bare_version_parses() {
        assert_eq!(parse_lean_version("v4.16.0"), Some("v4.16.0"));
    }

    #[test]
    fn manifest_yields_pinned_github_deps() {
        let manifest = r#"{
            "version": "1.1.0",
            "packages": [
                {
                    "type": "git",
                    "name": "batteries",
                    "url": "https://github.com/leanprover-community/batteries",
                    "rev": "0123456789abcdef0123456789abcdef01234567",
                    "subDir": null
                },
                {
                    "type": "git",
                    "name": "local-dep",
                    "url": "https://example.com/dep.git",
                    "rev": "0123456789abcdef0123456789abcdef01234567"
                },
                {
                    "type": "path",
                    "name": "vendored"
                }
            ]
        }"#;
        let deps = parse_manifest(manifest);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "batteries");
        assert_eq!(deps[0].org_repo, "leanprover-community/batteries");
        assert_eq!(deps[0].sub_dir, None);
    }

    #[test]
    fn manifest_rejects_unpinned_rev() {
        let manifest = r#"{
            "packages": [{
                "type": "git",
                "name": "x",
                "url": "https://github.com/a/b",
                "rev": "main"
            }]
        }"#;
        assert!(parse_manifest(manifest).is_empty());
    }

    #[test]
    fn garbage_manifest_is_empty() {
        assert!(parse_manifest("not json").is_empty());
    }

    fn hook(toolchain: &str, repo_short: &str, deps: Vec<crate::GitDependency>) -> LeanHook {
        LeanHook {
            toolchain: toolchain.to_owned(),
            repo_short: repo_short.to_owned(),
            deps,
        }
    }

    #[test]
    fn image_name_for_pinned_and_unpinned() {
        assert_eq!(
            hook("leanprover/lean4:v4.27.0", "batteries", vec![]).image_name(),
            "lean-v4.27.0"
        );
        assert_eq!(
            hook("leanprover/lean4:nightly-2025-01-15", "x", vec![]).image_name(),
            "lean"
        );
    }

    #[test]
    fn mathlib_repo_gets_cache_mount() {
        let h = hook("leanprover/lean4:v4.27.0", "mathlib4", vec![]);
        let mounts = h.shared_mounts();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].container_path, "/shared/mathlib-cache");
        assert!(h
            .network_domains()
            .contains(&"lakecache.blob.core.windows.net".to_owned()));
    }

    #[test]
    fn mathlib_dependent_gets_cache_mount() {
        let dep = crate::GitDependency {
            name: "mathlib".to_owned(),
            url: "https://github.com/leanprover-community/mathlib4".to_owned(),
            rev: "0".repeat(40),
            org_repo: "leanprover-community/mathlib4".to_owned(),
            sub_dir: None,
        };
        let h = hook("leanprover/lean4:v4.27.0", "myproject", vec![dep]);
        assert_eq!(h.shared_mounts().len(), 1);
    }

    #[test]
    fn plain_lean_project_has_no_mounts() {
        let h = hook("leanprover/lean4:v4.27.0", "batteries", vec![]);
        assert!(h.shared_mounts().is_empty());
        assert_eq!(h.network_domains(), vec!["releases.lean-lang.org"]);
    }
}
