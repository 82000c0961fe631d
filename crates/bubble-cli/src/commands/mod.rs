mod automation;
mod cleanup;
mod cloud;
mod destroy;
mod doctor;
mod editor;
mod git;
mod images;
mod list;
mod network;
mod open;
mod pause;
mod relay;
mod remote;

pub use automation::{automation_install, automation_remove, automation_status};
pub use cleanup::cleanup;
pub use cloud::{
    cloud_default, cloud_destroy, cloud_provision, cloud_ssh, cloud_start, cloud_status, cloud_stop,
};
pub use destroy::destroy;
pub use doctor::doctor;
pub use editor::editor;
pub use git::git_update;
pub use images::{images_build, images_build_toolchain, images_delete, images_list};
pub use list::list;
pub use network::{network_apply, network_remove};
pub use open::{open, resolve_editor, OpenArgs};
pub use pause::pause;
pub use relay::{relay_daemon, relay_disable, relay_enable, relay_status};
pub use remote::{remote_clear_default, remote_set_default, remote_status};

use std::io::Write;

use anyhow::bail;
use bubble_core::{Config, DataDir};
use bubble_runtime::{colima, ContainerInfo, ContainerRuntime, ContainerState, IncusRuntime};

/// Loaded CLI context: data dir, config, and the configured runtime.
pub(crate) struct Context {
    pub data_dir: DataDir,
    pub config: Config,
    pub runtime: IncusRuntime,
}

/// Load config and construct the runtime, bootstrapping the Colima VM
/// on macOS when needed.
pub(crate) async fn context() -> anyhow::Result<Context> {
    let data_dir = DataDir::from_env();
    let config = Config::load(&data_dir)?;

    if cfg!(target_os = "macos") {
        let rt = &config.runtime;
        colima::ensure_colima(&colima::ColimaSizing {
            cpu: rt.colima_cpu,
            memory: rt.colima_memory,
            disk: rt.colima_disk,
            vm_type: rt.colima_vm_type.clone(),
        })
        .await?;
    }

    if config.runtime.backend != "incus" {
        bail!("unknown runtime backend: {}", config.runtime.backend);
    }

    Ok(Context {
        data_dir,
        config,
        runtime: IncusRuntime::new(),
    })
}

/// Ask the user a yes/no question. Declining exits the command with
/// code 1 (via the caller returning an error).
pub(crate) fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim(), "y" | "Y" | "yes" | "YES"))
}

/// Find a container by name, or fail with a user-visible message.
pub(crate) async fn find_container<R: ContainerRuntime>(
    runtime: &R,
    name: &str,
) -> anyhow::Result<ContainerInfo> {
    let containers = runtime.list_containers(true).await?;
    containers
        .into_iter()
        .find(|c| c.name == name)
        .ok_or_else(|| anyhow::anyhow!("Bubble '{name}' not found."))
}

/// Make sure a container is running (unpause/start if needed).
pub(crate) async fn ensure_running<R: ContainerRuntime>(
    runtime: &R,
    name: &str,
) -> anyhow::Result<ContainerInfo> {
    let info = find_container(runtime, name).await?;
    match info.state {
        ContainerState::Frozen => {
            println!("Unpausing '{name}'...");
            runtime.unfreeze(name).await?;
        }
        ContainerState::Stopped => {
            println!("Starting '{name}'...");
            runtime.start(name).await?;
        }
        _ => {}
    }
    Ok(info)
}
