//! SSH config entries for bubbles.
//!
//! Each bubble gets a `Host bubble-<name>` entry in a dedicated file
//! under `~/.ssh/config.d/`, with a one-time `Include` directive
//! prepended to the user's main config. The ProxyCommand goes through
//! `incus exec`, which works identically on Linux and through Colima.

use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::{bail, Context};
use regex::Regex;

static BUBBLE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]*$").unwrap());

pub struct SshConfig {
    config_dir: PathBuf,
    config_file: PathBuf,
    main_config: PathBuf,
}

impl SshConfig {
    pub fn for_user() -> anyhow::Result<Self> {
        let home = dirs_home()?;
        let ssh = home.join(".ssh");
        Ok(Self::at(ssh.join("config.d"), ssh.join("config")))
    }

    pub fn at(config_dir: PathBuf, main_config: PathBuf) -> Self {
        let config_file = config_dir.join("bubble");
        Self {
            config_dir,
            config_file,
            main_config,
        }
    }

    /// Add an entry for a bubble. Idempotent: an existing entry for
    /// the same name is replaced, not duplicated.
    pub fn add(&self, bubble_name: &str, user: &str) -> anyhow::Result<()> {
        if !BUBBLE_NAME_RE.is_match(bubble_name) {
            bail!("invalid bubble name for SSH config: {bubble_name:?}");
        }
        std::fs::create_dir_all(&self.config_dir)
            .with_context(|| format!("creating {}", self.config_dir.display()))?;

        self.remove(bubble_name)?;

        let entry = format!(
            "\nHost bubble-{bubble_name}\n\
             \x20 User {user}\n\
             \x20 ProxyCommand incus exec {bubble_name} -- su - {user} -c \"nc localhost 22\"\n\
             \x20 StrictHostKeyChecking no\n\
             \x20 UserKnownHostsFile /dev/null\n\
             \x20 LogLevel ERROR\n"
        );
        let mut contents = std::fs::read_to_string(&self.config_file).unwrap_or_default();
        contents.push_str(&entry);
        std::fs::write(&self.config_file, contents)
            .with_context(|| format!("writing {}", self.config_file.display()))?;

        self.ensure_include_directive()?;
        Ok(())
    }

    /// Remove a bubble's entry, if present.
    pub fn remove(&self, bubble_name: &str) -> anyhow::Result<()> {
        let Ok(contents) = std::fs::read_to_string(&self.config_file) else {
            return Ok(());
        };

        let mut result: Vec<&str> = Vec::new();
        let mut skipping = false;
        for line in contents.lines() {
            let trimmed = line.trim();
            if trimmed == format!("Host bubble-{bubble_name}") {
                skipping = true;
                continue;
            }
            if skipping && trimmed.starts_with("Host ") {
                skipping = false;
            }
            if !skipping {
                result.push(line);
            }
        }

        let new_contents = if result.iter().all(|l| l.trim().is_empty()) {
            String::new()
        } else {
            result.join("\n") + "\n"
        };
        std::fs::write(&self.config_file, new_contents)
            .with_context(|| format!("writing {}", self.config_file.display()))?;
        Ok(())
    }

    /// Whether an entry for this bubble exists.
    pub fn has(&self, bubble_name: &str) -> bool {
        std::fs::read_to_string(&self.config_file)
            .map(|c| {
                c.lines()
                    .any(|l| l.trim() == format!("Host bubble-{bubble_name}"))
            })
            .unwrap_or(false)
    }

    /// Make sure the user's main `~/.ssh/config` includes our
    /// directory. The Include must sit at the top of the file.
    fn ensure_include_directive(&self) -> anyhow::Result<()> {
        let include_line = format!("Include {}/*", self.config_dir.display());

        if self.main_config.exists() {
            let contents = std::fs::read_to_string(&self.main_config)
                .with_context(|| format!("reading {}", self.main_config.display()))?;
            if contents.contains(&include_line) {
                return Ok(());
            }
            std::fs::write(&self.main_config, format!("{include_line}\n\n{contents}"))
                .with_context(|| format!("writing {}", self.main_config.display()))?;
        } else {
            if let Some(parent) = self.main_config.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&self.main_config, format!("{include_line}\n"))
                .with_context(|| format!("writing {}", self.main_config.display()))?;
        }
        Ok(())
    }
}

fn dirs_home() -> anyhow::Result<PathBuf> {
    dirs::home_dir().context("could not determine the home directory")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> (tempfile::TempDir, SshConfig) {
        let dir = tempfile::tempdir().unwrap();
        let ssh = SshConfig::at(
            dir.path().join(".ssh/config.d"),
            dir.path().join(".ssh/config"),
        );
        (dir, ssh)
    }

    #[test]
    fn add_creates_entry_and_include() {
        let (_dir, ssh) = config();
        ssh.add("mathlib4-pr-1", "user").unwrap();

        assert!(ssh.has("mathlib4-pr-1"));
        let main = std::fs::read_to_string(&ssh.main_config).unwrap();
        assert!(main.starts_with("Include "));

        let entries = std::fs::read_to_string(&ssh.config_file).unwrap();
        assert!(entries.contains("Host bubble-mathlib4-pr-1"));
        assert!(entries.contains("ProxyCommand incus exec mathlib4-pr-1"));
    }

    #[test]
    fn add_is_idempotent() {
        let (_dir, ssh) = config();
        ssh.add("x-1", "user").unwrap();
        ssh.add("x-1", "user").unwrap();
        let entries = std::fs::read_to_string(&ssh.config_file).unwrap();
        assert_eq!(entries.matches("Host bubble-x-1").count(), 1);
    }

    #[test]
    fn remove_keeps_other_entries() {
        let (_dir, ssh) = config();
        ssh.add("one", "user").unwrap();
        ssh.add("two", "user").unwrap();
        ssh.remove("one").unwrap();

        assert!(!ssh.has("one"));
        assert!(ssh.has("two"));
    }

    #[test]
    fn rejects_hostile_names() {
        let (_dir, ssh) = config();
        assert!(ssh.add("Evil;Name", "user").is_err());
        assert!(ssh.add("-leading", "user").is_err());
    }

    #[test]
    fn include_directive_prepended_once() {
        let (_dir, ssh) = config();
        std::fs::create_dir_all(ssh.main_config.parent().unwrap()).unwrap();
        std::fs::write(&ssh.main_config, "Host other\n  User me\n").unwrap();

        ssh.add("x-1", "user").unwrap();
        ssh.add("x-2", "user").unwrap();

        let main = std::fs::read_to_string(&ssh.main_config).unwrap();
        assert_eq!(main.matches("Include ").count(), 1);
        assert!(main.starts_with("Include "));
        assert!(main.contains("Host other"));
    }
}
