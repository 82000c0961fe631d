use chrono::{DateTime, Utc};

use crate::error::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
    Frozen,
    Unknown,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerState::Running => "running",
            ContainerState::Stopped => "stopped",
            ContainerState::Frozen => "frozen",
            ContainerState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub name: String,
    pub state: ContainerState,
    pub ipv4: Option<String>,
    pub image: Option<String>,
    pub disk_usage: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub aliases: Vec<String>,
    pub size: u64,
    pub created_at: Option<DateTime<Utc>>,
}

/// Abstract interface for container operations.
///
/// One implementation per backend; no state is shared between
/// implementations. Errors always include the failing argv and
/// combined stderr/stdout.
#[allow(async_fn_in_trait)]
pub trait ContainerRuntime: Send + Sync {
    /// Check whether the backend is installed and responsive.
    async fn is_available(&self) -> bool;

    /// Launch a new container from an image.
    async fn launch(&self, name: &str, image: &str) -> Result<ContainerInfo, RuntimeError>;

    /// List all containers. With `fast`, expensive state queries
    /// (disk, network) are skipped.
    async fn list_containers(&self, fast: bool) -> Result<Vec<ContainerInfo>, RuntimeError>;

    async fn start(&self, name: &str) -> Result<(), RuntimeError>;

    async fn stop(&self, name: &str) -> Result<(), RuntimeError>;

    async fn freeze(&self, name: &str) -> Result<(), RuntimeError>;

    async fn unfreeze(&self, name: &str) -> Result<(), RuntimeError>;

    async fn delete(&self, name: &str, force: bool) -> Result<(), RuntimeError>;

    /// Execute a command (argv, never a shell string) inside a
    /// container and return its stdout.
    async fn exec(&self, name: &str, command: &[&str]) -> Result<String, RuntimeError>;

    /// Add a device (proxy, disk, …) to a container.
    async fn add_device(
        &self,
        name: &str,
        device_name: &str,
        device_type: &str,
        props: &[(&str, &str)],
    ) -> Result<(), RuntimeError>;

    /// Mount a host path into the container.
    async fn add_disk(
        &self,
        name: &str,
        device_name: &str,
        source: &str,
        path: &str,
        readonly: bool,
    ) -> Result<(), RuntimeError>;

    /// Publish a container as a reusable image, replacing any image
    /// with the same alias.
    async fn publish(&self, name: &str, alias: &str) -> Result<(), RuntimeError>;

    async fn image_exists(&self, alias: &str) -> Result<bool, RuntimeError>;

    async fn image_delete(&self, alias: &str) -> Result<(), RuntimeError>;

    async fn list_images(&self) -> Result<Vec<ImageInfo>, RuntimeError>;

    /// Push a local file into a container.
    async fn push_file(
        &self,
        name: &str,
        local_path: &str,
        remote_path: &str,
    ) -> Result<(), RuntimeError>;

    /// The host-side IPv4 address (CIDR) of the runtime's bridge, when
    /// one exists. Used by the readiness DNS workarounds and the relay
    /// proxy device on macOS.
    async fn bridge_address(&self) -> Result<Option<String>, RuntimeError>;
}
