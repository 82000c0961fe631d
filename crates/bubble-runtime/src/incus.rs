//! Incus container runtime implementation.

use std::collections::HashMap;
use std::process::Stdio;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::RuntimeError;
use crate::runtime::{ContainerInfo, ContainerRuntime, ContainerState, ImageInfo};

/// Container runtime backed by the `incus` CLI.
#[derive(Debug, Default, Clone)]
pub struct IncusRuntime;

impl IncusRuntime {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, args: &[&str]) -> Result<String, RuntimeError> {
        let output = tokio::process::Command::new("incus")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RuntimeError::NotFound { source: e })?;

        if output.status.success() {
            String::from_utf8(output.stdout)
                .map(|s| s.trim().to_owned())
                .map_err(|e| RuntimeError::InvalidUtf8 { source: e })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_owned()
            } else {
                stderr.trim().to_owned()
            };
            Err(RuntimeError::CommandFailed {
                args: args.iter().map(|s| (*s).to_owned()).collect(),
                detail,
            })
        }
    }

    async fn run_json<T: serde::de::DeserializeOwned>(
        &self,
        args: &[&str],
    ) -> Result<T, RuntimeError> {
        let mut full = args.to_vec();
        full.push("--format=json");
        let output = self.run(&full).await?;
        serde_json::from_str(&output).map_err(|e| RuntimeError::Parse {
            detail: e.to_string(),
        })
    }

    async fn get_info(&self, name: &str) -> Result<ContainerInfo, RuntimeError> {
        let containers: Vec<IncusContainer> = self.run_json(&["list", name]).await?;
        containers
            .into_iter()
            .find(|c| c.name == name)
            .map(|c| c.into_info())
            .ok_or_else(|| RuntimeError::ContainerNotFound {
                name: name.to_owned(),
            })
    }
}

impl ContainerRuntime for IncusRuntime {
    async fn is_available(&self) -> bool {
        self.run(&["version"]).await.is_ok()
    }

    async fn launch(&self, name: &str, image: &str) -> Result<ContainerInfo, RuntimeError> {
        self.run(&["launch", image, name]).await?;
        self.get_info(name).await
    }

    async fn list_containers(&self, fast: bool) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let containers: Vec<IncusContainer> = if fast {
            self.run_json(&["list", "--fast"]).await?
        } else {
            self.run_json(&["list"]).await?
        };
        Ok(containers.into_iter().map(|c| c.into_info()).collect())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.run(&["start", name]).await.map(|_| ())
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        self.run(&["stop", name]).await.map(|_| ())
    }

    async fn freeze(&self, name: &str) -> Result<(), RuntimeError> {
        self.run(&["pause", name]).await.map(|_| ())
    }

    async fn unfreeze(&self, name: &str) -> Result<(), RuntimeError> {
        // `start` unpauses a frozen container.
        self.run(&["start", name]).await.map(|_| ())
    }

    async fn delete(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        if force {
            self.run(&["delete", name, "--force"]).await.map(|_| ())
        } else {
            self.run(&["delete", name]).await.map(|_| ())
        }
    }

    async fn exec(&self, name: &str, command: &[&str]) -> Result<String, RuntimeError> {
        let mut args = vec!["exec", name, "--"];
        args.extend_from_slice(command);
        self.run(&args).await
    }

    async fn add_device(
        &self,
        name: &str,
        device_name: &str,
        device_type: &str,
        props: &[(&str, &str)],
    ) -> Result<(), RuntimeError> {
        let mut args = vec![
            "config".to_owned(),
            "device".to_owned(),
            "add".to_owned(),
            name.to_owned(),
            device_name.to_owned(),
            device_type.to_owned(),
        ];
        for (k, v) in props {
            args.push(format!("{k}={v}"));
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&arg_refs).await.map(|_| ())
    }

    async fn add_disk(
        &self,
        name: &str,
        device_name: &str,
        source: &str,
        path: &str,
        readonly: bool,
    ) -> Result<(), RuntimeError> {
        let mut props = vec![("source", source), ("path", path)];
        if readonly {
            props.push(("readonly", "true"));
        }
        self.add_device(name, device_name, "disk", &props).await
    }

    async fn publish(&self, name: &str, alias: &str) -> Result<(), RuntimeError> {
        if let Ok(info) = self.get_info(name).await {
            if info.state == ContainerState::Running {
                self.stop(name).await?;
            }
        }
        if self.image_exists(alias).await? {
            self.image_delete(alias).await?;
        }
        self.run(&["publish", name, "--alias", alias]).await.map(|_| ())
    }

    async fn image_exists(&self, alias: &str) -> Result<bool, RuntimeError> {
        match self.run(&["image", "show", alias]).await {
            Ok(_) => Ok(true),
            Err(RuntimeError::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn image_delete(&self, alias: &str) -> Result<(), RuntimeError> {
        self.run(&["image", "delete", alias]).await.map(|_| ())
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>, RuntimeError> {
        let images: Vec<IncusImage> = self.run_json(&["image", "list"]).await?;
        Ok(images
            .into_iter()
            .map(|img| ImageInfo {
                aliases: img.aliases.into_iter().map(|a| a.name).collect(),
                size: img.size,
                created_at: img.created_at.as_deref().and_then(parse_timestamp),
            })
            .collect())
    }

    async fn push_file(
        &self,
        name: &str,
        local_path: &str,
        remote_path: &str,
    ) -> Result<(), RuntimeError> {
        let dest = format!("{name}{remote_path}");
        self.run(&["file", "push", local_path, &dest]).await.map(|_| ())
    }

    async fn bridge_address(&self) -> Result<Option<String>, RuntimeError> {
        match self.run(&["network", "get", "incusbr0", "ipv4.address"]).await {
            Ok(addr) if !addr.is_empty() => Ok(Some(addr)),
            Ok(_) => Ok(None),
            Err(RuntimeError::CommandFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ── Incus JSON shapes ──

#[derive(Debug, Deserialize)]
struct IncusContainer {
    name: String,
    status: String,
    #[serde(default)]
    state: Option<IncusState>,
    #[serde(default)]
    config: HashMap<String, String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    last_used_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IncusState {
    #[serde(default)]
    network: Option<HashMap<String, IncusNetwork>>,
    #[serde(default)]
    disk: Option<HashMap<String, IncusDisk>>,
}

#[derive(Debug, Deserialize)]
struct IncusNetwork {
    #[serde(default)]
    addresses: Vec<IncusAddress>,
}

#[derive(Debug, Deserialize)]
struct IncusAddress {
    family: String,
    address: String,
}

#[derive(Debug, Deserialize)]
struct IncusDisk {
    #[serde(default)]
    usage: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct IncusImage {
    #[serde(default)]
    aliases: Vec<IncusAlias>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IncusAlias {
    name: String,
}

impl IncusContainer {
    fn into_info(self) -> ContainerInfo {
        let state = match self.status.as_str() {
            "Running" => ContainerState::Running,
            "Stopped" => ContainerState::Stopped,
            "Frozen" => ContainerState::Frozen,
            _ => ContainerState::Unknown,
        };

        let ipv4 = self.state.as_ref().and_then(|s| {
            s.network
                .as_ref()
                .and_then(|n| n.get("eth0"))
                .and_then(|eth0| {
                    eth0.addresses
                        .iter()
                        .find(|a| a.family == "inet")
                        .map(|a| a.address.clone())
                })
        });

        let disk_usage = self
            .state
            .as_ref()
            .and_then(|s| s.disk.as_ref())
            .and_then(|d| d.get("root"))
            .and_then(|root| root.usage);

        ContainerInfo {
            name: self.name,
            state,
            ipv4,
            image: self.config.get("image.description").cloned(),
            disk_usage,
            created_at: self.created_at.as_deref().and_then(parse_timestamp),
            last_used_at: self.last_used_at.as_deref().and_then(parse_timestamp),
        }
    }
}

/// Parse an Incus RFC 3339 timestamp. Incus reports the epoch as
/// `0001-01-01T00:00:00Z` for "never".
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.starts_with("0001-") {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_container_json() {
        let raw = r#"{
            "name": "mathlib4-pr-123",
            "status": "Running",
            "created_at": "2026-02-13T10:00:00.123456789Z",
            "last_used_at": "0001-01-01T00:00:00Z",
            "state": {
                "network": {
                    "eth0": {
                        "addresses": [
                            {"family": "inet6", "address": "fd42::1"},
                            {"family": "inet", "address": "10.158.0.42"}
                        ]
                    }
                },
                "disk": {"root": {"usage": 1048576}}
            }
        }"#;
        let container: IncusContainer = serde_json::from_str(raw).unwrap();
        let info = container.into_info();
        assert_eq!(info.name, "mathlib4-pr-123");
        assert_eq!(info.state, ContainerState::Running);
        assert_eq!(info.ipv4.as_deref(), Some("10.158.0.42"));
        assert_eq!(info.disk_usage, Some(1048576));
        assert!(info.created_at.is_some());
        assert!(info.last_used_at.is_none());
    }

    #[test]
    fn parses_fast_listing_without_state() {
        let raw = r#"[{"name": "x", "status": "Frozen"}]"#;
        let containers: Vec<IncusContainer> = serde_json::from_str(raw).unwrap();
        let info = containers.into_iter().next().unwrap().into_info();
        assert_eq!(info.state, ContainerState::Frozen);
        assert!(info.ipv4.is_none());
    }

    #[test]
    fn never_timestamp_is_none() {
        assert!(parse_timestamp("0001-01-01T00:00:00Z").is_none());
        assert!(parse_timestamp("2026-02-13T10:00:00Z").is_some());
    }
}
