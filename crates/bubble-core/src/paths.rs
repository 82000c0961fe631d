use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// The bubble data directory (`$BUBBLE_HOME`, default `~/.bubble`).
///
/// All persistent state lives under this root:
///
/// ```text
/// config.toml         hand-editable configuration
/// registry.json       bubble name → metadata
/// repos.json          learned short-name registry
/// git/<repo>.git/     bare mirrors (+ .lock companions)
/// relay.sock          relay daemon socket (Linux)
/// relay.port          relay daemon port file (macOS)
/// relay.log           relay request log
/// relay-tokens.json   relay token table
/// cloud.json          cloud server state
/// cloud_key(.pub)     cloud SSH keypair
/// known_hosts         cloud known_hosts file
/// ```
///
/// Constructed explicitly so tests can point it at a tempdir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve from `$BUBBLE_HOME`, falling back to `~/.bubble`.
    pub fn from_env() -> Self {
        let root = std::env::var_os("BUBBLE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".bubble")
            });
        Self { root }
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the data directory and the git store directory.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.root, &self.git_dir()] {
            std::fs::create_dir_all(dir).map_err(|e| Error::CreateDir {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn registry_file(&self) -> PathBuf {
        self.root.join("registry.json")
    }

    pub fn repos_file(&self) -> PathBuf {
        self.root.join("repos.json")
    }

    pub fn git_dir(&self) -> PathBuf {
        self.root.join("git")
    }

    pub fn images_file(&self) -> PathBuf {
        self.root.join("images.json")
    }

    pub fn relay_sock(&self) -> PathBuf {
        self.root.join("relay.sock")
    }

    pub fn relay_port_file(&self) -> PathBuf {
        self.root.join("relay.port")
    }

    pub fn relay_log(&self) -> PathBuf {
        self.root.join("relay.log")
    }

    pub fn relay_tokens_file(&self) -> PathBuf {
        self.root.join("relay-tokens.json")
    }

    pub fn cloud_state_file(&self) -> PathBuf {
        self.root.join("cloud.json")
    }

    pub fn cloud_key_file(&self) -> PathBuf {
        self.root.join("cloud_key")
    }

    pub fn cloud_known_hosts(&self) -> PathBuf {
        self.root.join("known_hosts")
    }

    /// Host directory backing a hook's shared writable mount.
    pub fn shared_mount_dir(&self, host_dir_name: &str) -> PathBuf {
        self.root.join(host_dir_name)
    }

    /// Log file for a detached background image build.
    pub fn build_log(&self, image: &str) -> PathBuf {
        self.root.join(format!("build-{image}.log"))
    }
}
