//! Remote SSH host support.
//!
//! Bubbles can live on any SSH-reachable Linux host: the local binary
//! deploys itself to the remote and dispatches subcommands to it over
//! SSH. The cloud module provisions such a host on demand (Hetzner)
//! with Incus and an idle auto-shutdown baked in via cloud-init.

pub mod cloud;
pub mod host;
pub mod shim;

pub use cloud::{cloud_remote_host, CloudError, CloudState, HetznerClient};
pub use host::{HostParseError, RemoteHost};
pub use shim::{ensure_remote_bubble, remote_command, remote_open, strip_ansi, RemoteError};
