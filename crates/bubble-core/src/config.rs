use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fsutil::atomic_write;
use crate::paths::DataDir;

/// Top-level `config.toml` configuration.
///
/// All sections are optional — sensible defaults are provided, and a
/// partial user file is merged over them field by field.
///
/// # Example
///
/// ```toml
/// editor = "neovim"
///
/// [network]
/// allowlist = ["github.com", "crates.io"]
///
/// [relay]
/// enabled = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_editor")]
    pub editor: String,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Container backend (only "incus" is supported).
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Colima VM sizing (macOS only).
    #[serde(default = "default_colima_cpu")]
    pub colima_cpu: u32,
    #[serde(default = "default_colima_memory")]
    pub colima_memory: u32,
    #[serde(default = "default_colima_disk")]
    pub colima_disk: u32,
    #[serde(default = "default_colima_vm_type")]
    pub colima_vm_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// Base image refresh cadence ("weekly" or "never").
    #[serde(default = "default_refresh")]
    pub refresh: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Egress allowlist domains. Entries may use a `*.` wildcard
    /// prefix.
    #[serde(default = "default_allowlist")]
    pub allowlist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Whether new bubbles get a relay device and token.
    #[serde(default)]
    pub enabled: bool,
    /// Fixed TCP port hint for macOS (0 picks an ephemeral port).
    #[serde(default = "default_relay_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Default `[user@]host[:port]` for `open --ssh`.
    #[serde(default)]
    pub default_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default = "default_cloud_provider")]
    pub provider: String,
    /// Hetzner server type (e.g. "cx43"). Empty means ask on provision.
    #[serde(default)]
    pub server_type: String,
    #[serde(default = "default_cloud_location")]
    pub location: String,
    #[serde(default = "default_cloud_server_name")]
    pub server_name: String,
    /// When true, `open` targets the cloud server by default.
    #[serde(default)]
    pub default: bool,
    /// Idle auto-shutdown timeout in seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            editor: default_editor(),
            runtime: RuntimeConfig::default(),
            images: ImagesConfig::default(),
            network: NetworkConfig::default(),
            relay: RelayConfig::default(),
            remote: RemoteConfig::default(),
            cloud: CloudConfig::default(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            colima_cpu: default_colima_cpu(),
            colima_memory: default_colima_memory(),
            colima_disk: default_colima_disk(),
            colima_vm_type: default_colima_vm_type(),
        }
    }
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            refresh: default_refresh(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            allowlist: default_allowlist(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_relay_port(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            provider: default_cloud_provider(),
            server_type: String::new(),
            location: default_cloud_location(),
            server_name: default_cloud_server_name(),
            default: false,
            idle_timeout: default_idle_timeout(),
        }
    }
}

impl Config {
    /// Load from `config.toml` under the data directory, writing the
    /// default file on first run.
    pub fn load(data_dir: &DataDir) -> Result<Self> {
        data_dir.ensure()?;
        let path = data_dir.config_file();
        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| Error::ConfigLoad {
                path: path.clone(),
                source: e,
            })?;
            toml::from_str(&content).map_err(|e| Error::ConfigParse { path, source: e })
        } else {
            let config = Self::default();
            config.save(data_dir)?;
            Ok(config)
        }
    }

    pub fn save(&self, data_dir: &DataDir) -> Result<()> {
        data_dir.ensure()?;
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::ConfigSerialize { source: e })?;
        atomic_write(&data_dir.config_file(), &content)
    }
}

/// The short (owner-less, lowercase) name of an `owner/repo` pair.
pub fn repo_short_name(org_repo: &str) -> String {
    org_repo
        .rsplit('/')
        .next()
        .unwrap_or(org_repo)
        .to_lowercase()
}

fn default_editor() -> String {
    "vscode".to_owned()
}

fn default_backend() -> String {
    "incus".to_owned()
}

fn default_colima_cpu() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4)
}

fn default_colima_memory() -> u32 {
    16
}

fn default_colima_disk() -> u32 {
    60
}

fn default_colima_vm_type() -> String {
    "vz".to_owned()
}

fn default_refresh() -> String {
    "weekly".to_owned()
}

fn default_allowlist() -> Vec<String> {
    [
        "github.com",
        "raw.githubusercontent.com",
        "release-assets.githubusercontent.com",
        "objects.githubusercontent.com",
        "codeload.githubusercontent.com",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

fn default_relay_port() -> u16 {
    7653
}

fn default_cloud_provider() -> String {
    "hetzner".to_owned()
}

fn default_cloud_location() -> String {
    "fsn1".to_owned()
}

fn default_cloud_server_name() -> String {
    "bubble-cloud".to_owned()
}

fn default_idle_timeout() -> u32 {
    900
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_load_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        let config = Config::load(&data).unwrap();
        assert!(data.config_file().exists());
        assert_eq!(config.editor, "vscode");
        assert_eq!(config.runtime.backend, "incus");
        assert!(config.network.allowlist.contains(&"github.com".to_owned()));
        assert!(!config.relay.enabled);
    }

    #[test]
    fn partial_user_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        data.ensure().unwrap();
        std::fs::write(
            data.config_file(),
            "editor = \"emacs\"\n\n[relay]\nenabled = true\n",
        )
        .unwrap();

        let config = Config::load(&data).unwrap();
        assert_eq!(config.editor, "emacs");
        assert!(config.relay.enabled);
        // Unset sections and fields keep their defaults.
        assert_eq!(config.relay.port, 7653);
        assert_eq!(config.runtime.colima_memory, 16);
        assert_eq!(config.cloud.location, "fsn1");
    }

    #[test]
    fn save_load_round_trip_preserves_user_keys() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        let mut config = Config::default();
        config.editor = "neovim".to_owned();
        config.network.allowlist = vec!["example.com".to_owned()];
        config.remote.default_host = "dev@build-box".to_owned();
        config.save(&data).unwrap();

        let loaded = Config::load(&data).unwrap();
        assert_eq!(loaded.editor, "neovim");
        assert_eq!(loaded.network.allowlist, vec!["example.com".to_owned()]);
        assert_eq!(loaded.remote.default_host, "dev@build-box");
    }

    #[test]
    fn short_name_lowercases_repo() {
        assert_eq!(repo_short_name("leanprover/Lean4"), "lean4");
        assert_eq!(repo_short_name("mathlib4"), "mathlib4");
    }
}
