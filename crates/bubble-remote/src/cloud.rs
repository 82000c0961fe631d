//! Hetzner Cloud support for auto-provisioned remote bubble hosts.
//!
//! The server is created from a cloud-init script that installs Incus
//! and an idle auto-shutdown timer, so a forgotten cloud host powers
//! itself off. Server identity lives in `cloud.json`; the SSH keypair
//! and known_hosts file are private to bubble under the data dir.

use std::process::Stdio;
use std::time::Duration;

use bubble_core::config::CloudConfig;
use bubble_core::fsutil::atomic_write;
use bubble_core::DataDir;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::host::RemoteHost;

const API_BASE: &str = "https://api.hetzner.cloud/v1";
const SERVER_IMAGE: &str = "ubuntu-24.04";

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error(
        "HETZNER_TOKEN environment variable is required.\n\
         Get one from: https://console.hetzner.cloud/projects → API tokens"
    )]
    MissingToken,

    #[error("Hetzner API request failed")]
    Api { source: reqwest::Error },

    #[error("Hetzner API returned {status}: {message}")]
    ApiStatus { status: u16, message: String },

    #[error("no cloud server provisioned. Run: bubble cloud provision")]
    NoServer,

    #[error("cloud server has no public IPv4 address")]
    NoAddress,

    #[error("ssh-keygen failed: {detail}")]
    KeyGen { detail: String },

    #[error(transparent)]
    State(#[from] bubble_core::Error),

    #[error(transparent)]
    Host(#[from] crate::host::HostParseError),

    #[error("timed out waiting for the server to become {state}")]
    WaitTimeout { state: String },
}

/// Persisted identity of the provisioned server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudState {
    pub provider: String,
    pub server_id: u64,
    pub server_name: String,
    pub ipv4: String,
    pub server_type: String,
    pub location: String,
    pub ssh_key_id: u64,
}

impl CloudState {
    pub fn load(data_dir: &DataDir) -> Option<Self> {
        std::fs::read_to_string(data_dir.cloud_state_file())
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
    }

    pub fn save(&self, data_dir: &DataDir) -> Result<(), CloudError> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            bubble_core::Error::StateParse {
                path: data_dir.cloud_state_file(),
                source: e,
            }
        })?;
        atomic_write(&data_dir.cloud_state_file(), &(content + "\n"))?;
        Ok(())
    }

    pub fn clear(data_dir: &DataDir) {
        let _ = std::fs::remove_file(data_dir.cloud_state_file());
    }
}

#[derive(Debug, Deserialize)]
pub struct ServerStatus {
    pub id: u64,
    pub status: String,
    pub ipv4: Option<String>,
}

// ── API response shapes ──

#[derive(Deserialize)]
struct ServerEnvelope {
    server: ApiServer,
}

#[derive(Deserialize)]
struct ServersEnvelope {
    servers: Vec<ApiServer>,
}

#[derive(Deserialize)]
struct ApiServer {
    id: u64,
    status: String,
    public_net: Option<ApiPublicNet>,
}

#[derive(Deserialize)]
struct ApiPublicNet {
    ipv4: Option<ApiIpv4>,
}

#[derive(Deserialize)]
struct ApiIpv4 {
    ip: String,
}

#[derive(Deserialize)]
struct SshKeysEnvelope {
    ssh_keys: Vec<ApiSshKey>,
}

#[derive(Deserialize)]
struct SshKeyEnvelope {
    ssh_key: ApiSshKey,
}

#[derive(Deserialize)]
struct ApiSshKey {
    id: u64,
    name: String,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

impl From<ApiServer> for ServerStatus {
    fn from(s: ApiServer) -> Self {
        ServerStatus {
            id: s.id,
            status: s.status,
            ipv4: s.public_net.and_then(|n| n.ipv4).map(|v| v.ip),
        }
    }
}

/// Minimal Hetzner Cloud API client.
pub struct HetznerClient {
    token: String,
    http: reqwest::Client,
}

impl HetznerClient {
    /// Build a client from `HETZNER_TOKEN`.
    pub fn from_env() -> Result<Self, CloudError> {
        let token = std::env::var("HETZNER_TOKEN").unwrap_or_default();
        if token.is_empty() {
            return Err(CloudError::MissingToken);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CloudError::Api { source: e })?;
        Ok(Self { token, http })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, CloudError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ApiErrorEnvelope>()
            .await
            .map(|e| e.error.message)
            .unwrap_or_else(|_| "unknown error".to_owned());
        Err(CloudError::ApiStatus {
            status: status.as_u16(),
            message,
        })
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, CloudError> {
        let response = self
            .http
            .get(format!("{API_BASE}{path}"))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| CloudError::Api { source: e })?;
        Self::check(response).await
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, CloudError> {
        let response = self
            .http
            .post(format!("{API_BASE}{path}"))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| CloudError::Api { source: e })?;
        Self::check(response).await
    }

    /// Find or upload the bubble SSH key. Keys are matched by name.
    pub async fn ensure_ssh_key(&self, name: &str, public_key: &str) -> Result<u64, CloudError> {
        let keys: SshKeysEnvelope = self
            .get("/ssh_keys")
            .await?
            .json()
            .await
            .map_err(|e| CloudError::Api { source: e })?;
        if let Some(key) = keys.ssh_keys.into_iter().find(|k| k.name == name) {
            return Ok(key.id);
        }

        let body = serde_json::json!({"name": name, "public_key": public_key});
        let created: SshKeyEnvelope = self
            .post("/ssh_keys", &body)
            .await?
            .json()
            .await
            .map_err(|e| CloudError::Api { source: e })?;
        Ok(created.ssh_key.id)
    }

    pub async fn create_server(
        &self,
        config: &CloudConfig,
        server_type: &str,
        ssh_key_id: u64,
        user_data: &str,
    ) -> Result<ServerStatus, CloudError> {
        let body = serde_json::json!({
            "name": config.server_name,
            "server_type": server_type,
            "image": SERVER_IMAGE,
            "location": config.location,
            "ssh_keys": [ssh_key_id],
            "user_data": user_data,
        });
        let created: ServerEnvelope = self
            .post("/servers", &body)
            .await?
            .json()
            .await
            .map_err(|e| CloudError::Api { source: e })?;
        Ok(created.server.into())
    }

    pub async fn get_server(&self, id: u64) -> Result<ServerStatus, CloudError> {
        let server: ServerEnvelope = self
            .get(&format!("/servers/{id}"))
            .await?
            .json()
            .await
            .map_err(|e| CloudError::Api { source: e })?;
        Ok(server.server.into())
    }

    pub async fn find_server_by_name(&self, name: &str) -> Result<Option<ServerStatus>, CloudError> {
        let servers: ServersEnvelope = self
            .get(&format!("/servers?name={name}"))
            .await?
            .json()
            .await
            .map_err(|e| CloudError::Api { source: e })?;
        Ok(servers.servers.into_iter().next().map(Into::into))
    }

    pub async fn delete_server(&self, id: u64) -> Result<(), CloudError> {
        let response = self
            .http
            .delete(format!("{API_BASE}/servers/{id}"))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| CloudError::Api { source: e })?;
        Self::check(response).await.map(|_| ())
    }

    pub async fn power_on(&self, id: u64) -> Result<(), CloudError> {
        self.post(&format!("/servers/{id}/actions/poweron"), &serde_json::json!({}))
            .await
            .map(|_| ())
    }

    pub async fn power_off(&self, id: u64) -> Result<(), CloudError> {
        self.post(&format!("/servers/{id}/actions/poweroff"), &serde_json::json!({}))
            .await
            .map(|_| ())
    }

    /// Poll until the server reports `state` (up to ~2 minutes).
    pub async fn wait_for_status(&self, id: u64, state: &str) -> Result<ServerStatus, CloudError> {
        for _ in 0..60 {
            let server = self.get_server(id).await?;
            if server.status == state {
                return Ok(server);
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        Err(CloudError::WaitTimeout {
            state: state.to_owned(),
        })
    }
}

/// Cloud-init: install Incus from the Zabbly repo, initialize it, and
/// arm the idle auto-shutdown timer.
pub fn cloud_init_script(idle_timeout: u32) -> String {
    format!(
        r#"#!/bin/bash
set -euo pipefail

apt-get update
apt-get install -y curl ca-certificates

mkdir -p /etc/apt/keyrings/
curl -fsSL https://pkgs.zabbly.com/key.asc > /etc/apt/keyrings/zabbly.asc

CODENAME=$(. /etc/os-release && echo "$VERSION_CODENAME")
ARCH=$(dpkg --print-architecture)

cat > /etc/apt/sources.list.d/zabbly-incus-stable.sources <<SOURCES
Enabled: yes
Types: deb
URIs: https://pkgs.zabbly.com/incus/stable
Suites: $CODENAME
Components: main
Architectures: $ARCH
Signed-By: /etc/apt/keyrings/zabbly.asc
SOURCES

apt-get update
apt-get install -y incus
incus admin init --auto

mkdir -p /var/lib/bubble
echo "IDLE_TIMEOUT={idle_timeout}" > /etc/bubble-idle.conf

cat > /usr/local/bin/bubble-idle-check <<'IDLESCRIPT'
#!/bin/bash
set -euo pipefail

CONF_FILE="/etc/bubble-idle.conf"
ACTIVITY_FILE="/var/lib/bubble/last-activity"
BOOT_GRACE=900

IDLE_TIMEOUT=900
if [ -f "$CONF_FILE" ]; then
    source "$CONF_FILE"
fi

NOW=$(date +%s)

BOOT_TIME=$(date -d "$(uptime -s)" +%s 2>/dev/null || echo 0)
if [ $((NOW - BOOT_TIME)) -lt $BOOT_GRACE ]; then
    echo "$NOW" > "$ACTIVITY_FILE"
    exit 0
fi

ACTIVE=false

# Established SSH connections from outside count as activity.
if ss -tnp state established dport = :22 2>/dev/null | grep -q .; then
    ACTIVE=true
fi

# So does meaningful CPU load (load1/nproc > 0.5).
if [ "$ACTIVE" = false ]; then
    LOAD1=$(awk '{{print $1}}' /proc/loadavg)
    NPROC=$(nproc)
    if awk "BEGIN{{exit !(${{LOAD1}}/${{NPROC}} > 0.5)}}"; then
        ACTIVE=true
    fi
fi

if [ "$ACTIVE" = true ]; then
    echo "$NOW" > "$ACTIVITY_FILE"
    exit 0
fi

if [ -f "$ACTIVITY_FILE" ]; then
    LAST_ACTIVE=$(cat "$ACTIVITY_FILE")
else
    echo "$NOW" > "$ACTIVITY_FILE"
    exit 0
fi

IDLE_SECONDS=$((NOW - LAST_ACTIVE))
if [ "$IDLE_SECONDS" -ge "$IDLE_TIMEOUT" ]; then
    logger -t bubble-idle "Shutting down after ${{IDLE_SECONDS}}s idle"
    shutdown -h now
fi
IDLESCRIPT
chmod +x /usr/local/bin/bubble-idle-check

cat > /etc/systemd/system/bubble-idle.service <<'UNIT'
[Unit]
Description=Bubble idle shutdown check

[Service]
Type=oneshot
ExecStart=/usr/local/bin/bubble-idle-check
UNIT

cat > /etc/systemd/system/bubble-idle.timer <<'TIMER'
[Unit]
Description=Bubble idle shutdown check timer

[Timer]
OnBootSec=5min
OnUnitActiveSec=5min

[Install]
WantedBy=timers.target
TIMER

systemctl daemon-reload
systemctl enable --now bubble-idle.timer

echo "$(date +%s)" > /var/lib/bubble/last-activity
touch /var/run/bubble-cloud-ready
"#
    )
}

/// Make sure the bubble cloud keypair exists; returns the public key.
pub async fn ensure_ssh_key_files(data_dir: &DataDir) -> Result<String, CloudError> {
    let priv_path = data_dir.cloud_key_file();
    let pub_path = priv_path.with_extension("pub");

    let pub_contents = std::fs::read_to_string(&pub_path).unwrap_or_default();
    if priv_path.exists() && !pub_contents.trim().is_empty() {
        return Ok(pub_contents.trim().to_owned());
    }

    // Regenerate when either file is missing or empty.
    let _ = std::fs::remove_file(&priv_path);
    let _ = std::fs::remove_file(&pub_path);
    data_dir.ensure()?;

    let output = tokio::process::Command::new("ssh-keygen")
        .args(["-t", "ed25519", "-f"])
        .arg(&priv_path)
        .args(["-N", "", "-C", "bubble-cloud"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| CloudError::KeyGen {
            detail: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(CloudError::KeyGen {
            detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&priv_path, std::fs::Permissions::from_mode(0o600));
    }

    let pub_contents = std::fs::read_to_string(&pub_path).map_err(|e| {
        bubble_core::Error::StateRead {
            path: pub_path,
            source: e,
        }
    })?;
    Ok(pub_contents.trim().to_owned())
}

/// Refresh `known_hosts` with the server's current host keys.
pub async fn update_known_hosts(data_dir: &DataDir, ip: &str) {
    let output = tokio::process::Command::new("ssh-keyscan")
        .args(["-H", ip])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await;
    if let Ok(output) = output {
        if output.status.success() {
            let keys = String::from_utf8_lossy(&output.stdout);
            let _ = atomic_write(&data_dir.cloud_known_hosts(), &keys);
        }
    }
}

/// The SSH options a cloud [`RemoteHost`] carries: bubble's own key
/// and known_hosts, nothing from the user's SSH setup.
fn cloud_ssh_options(data_dir: &DataDir) -> Vec<String> {
    vec![
        "-i".to_owned(),
        data_dir.cloud_key_file().to_string_lossy().into_owned(),
        "-o".to_owned(),
        "IdentitiesOnly=yes".to_owned(),
        "-o".to_owned(),
        format!(
            "UserKnownHostsFile={}",
            data_dir.cloud_known_hosts().display()
        ),
    ]
}

/// Resolve the cloud server into a ready [`RemoteHost`], powering it
/// on when necessary.
pub async fn cloud_remote_host(data_dir: &DataDir) -> Result<RemoteHost, CloudError> {
    let mut state = CloudState::load(data_dir).ok_or(CloudError::NoServer)?;
    let client = HetznerClient::from_env()?;

    let server = client.get_server(state.server_id).await?;
    let server = if server.status == "off" {
        info!(server = %state.server_name, "powering on cloud server");
        eprintln!("Powering on cloud server '{}'...", state.server_name);
        client.power_on(state.server_id).await?;
        let server = client.wait_for_status(state.server_id, "running").await?;
        // The address can change across power cycles.
        if let Some(ip) = &server.ipv4 {
            if *ip != state.ipv4 {
                state.ipv4 = ip.clone();
                state.save(data_dir)?;
            }
            update_known_hosts(data_dir, ip).await;
        }
        server
    } else {
        server
    };

    let ip = server.ipv4.or(Some(state.ipv4).filter(|s| !s.is_empty()));
    let ip = ip.ok_or(CloudError::NoAddress)?;

    let mut host = RemoteHost::parse(&ip)?;
    host.user = Some("root".to_owned());
    host.ssh_options = cloud_ssh_options(data_dir);
    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        let state = CloudState {
            provider: "hetzner".to_owned(),
            server_id: 42,
            server_name: "bubble-cloud".to_owned(),
            ipv4: "1.2.3.4".to_owned(),
            server_type: "cx43".to_owned(),
            location: "fsn1".to_owned(),
            ssh_key_id: 7,
        };
        state.save(&data).unwrap();

        let loaded = CloudState::load(&data).unwrap();
        assert_eq!(loaded.server_id, 42);
        assert_eq!(loaded.ipv4, "1.2.3.4");

        CloudState::clear(&data);
        assert!(CloudState::load(&data).is_none());
    }

    #[test]
    fn cloud_init_embeds_idle_timeout() {
        let script = cloud_init_script(1800);
        assert!(script.contains("IDLE_TIMEOUT=1800"));
        assert!(script.contains("apt-get install -y incus"));
        assert!(script.contains("bubble-idle.timer"));
        assert!(script.contains("touch /var/run/bubble-cloud-ready"));
    }

    #[test]
    fn parses_server_envelope() {
        let raw = r#"{
            "server": {
                "id": 99,
                "status": "running",
                "public_net": {"ipv4": {"ip": "5.6.7.8"}}
            }
        }"#;
        let envelope: ServerEnvelope = serde_json::from_str(raw).unwrap();
        let status: ServerStatus = envelope.server.into();
        assert_eq!(status.id, 99);
        assert_eq!(status.status, "running");
        assert_eq!(status.ipv4.as_deref(), Some("5.6.7.8"));
    }

    #[test]
    fn missing_token_is_an_error() {
        // The error message tells the user where to get a token.
        let err = CloudError::MissingToken;
        assert!(err.to_string().contains("HETZNER_TOKEN"));
    }

    #[test]
    fn ssh_options_reference_bubble_files() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        let options = cloud_ssh_options(&data);
        assert_eq!(options[0], "-i");
        assert!(options[1].ends_with("cloud_key"));
        assert!(options.iter().any(|o| o.contains("UserKnownHostsFile=")));
    }
}
