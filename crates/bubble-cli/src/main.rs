mod attach;
mod automation;
mod clean;
mod commands;
mod provision;
mod ssh_config;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bubble", about = "Containerized development environments")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a bubble for a GitHub target (URL, owner/repo, shorthand,
    /// PR number, or local path)
    Open {
        /// Target to open
        target: String,
        /// Editor to attach with
        #[arg(long)]
        editor: Option<String>,
        /// Attach with an SSH shell instead of an editor
        #[arg(long)]
        shell: bool,
        /// Attach with emacs
        #[arg(long)]
        emacs: bool,
        /// Attach with neovim
        #[arg(long)]
        neovim: bool,
        /// Create the bubble on a remote SSH host
        #[arg(long, value_name = "HOST")]
        ssh: Option<String>,
        /// Create the bubble on the provisioned cloud server
        #[arg(long)]
        cloud: bool,
        /// Force local creation even when a remote default is set
        #[arg(long)]
        local: bool,
        /// Just create, don't attach
        #[arg(long)]
        no_interactive: bool,
        /// Apply the network allowlist
        #[arg(long = "network", overrides_with = "no_network")]
        network: bool,
        #[arg(long = "no-network", overrides_with = "network")]
        no_network: bool,
        /// Custom container name
        #[arg(long, value_name = "NAME")]
        name: Option<String>,
        /// Treat the target as a local path
        #[arg(long)]
        path: bool,
        /// Emit a final machine-readable JSON line
        #[arg(long)]
        machine_readable: bool,
        /// Fail instead of cloning a missing bare mirror
        #[arg(long)]
        no_clone: bool,
    },
    /// List all bubbles
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Show disk usage and creation time
        #[arg(short, long)]
        verbose: bool,
        /// Also run the clean-state check
        #[arg(short = 'c', long)]
        clean: bool,
    },
    /// Pause (freeze) a bubble
    Pause {
        name: String,
    },
    /// Destroy a bubble permanently
    Destroy {
        name: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Destroy bubbles that are safe to discard
    Cleanup {
        /// Show what would be destroyed without doing it
        #[arg(short = 'n', long)]
        dry_run: bool,
        /// Skip confirmation prompts
        #[arg(short, long)]
        force: bool,
        /// Destroy all bubbles, clean or not
        #[arg(short, long)]
        all: bool,
        /// Only consider bubbles older than this many days
        #[arg(long, value_name = "DAYS")]
        age: Option<u32>,
    },
    /// Check runtime, registry, and store health
    Doctor,
    /// Show or set the default editor
    Editor {
        /// vscode, shell, emacs, or neovim
        choice: Option<String>,
    },
    /// Manage base images
    Images {
        #[command(subcommand)]
        action: ImagesAction,
    },
    /// Manage the shared git object store
    Git {
        #[command(subcommand)]
        action: GitAction,
    },
    /// Manage network allowlisting
    Network {
        #[command(subcommand)]
        action: NetworkAction,
    },
    /// Manage automated tasks (git update, image refresh)
    Automation {
        #[command(subcommand)]
        action: AutomationAction,
    },
    /// Manage the bubble-in-bubble relay
    Relay {
        #[command(subcommand)]
        action: RelayAction,
    },
    /// Manage the default remote host
    Remote {
        #[command(subcommand)]
        action: RemoteAction,
    },
    /// Manage the cloud bubble host
    Cloud {
        #[command(subcommand)]
        action: CloudAction,
    },
}

#[derive(Subcommand)]
enum ImagesAction {
    /// List available images
    List,
    /// Build an image (base, lean)
    Build {
        #[arg(default_value = "base")]
        name: String,
    },
    /// Build a Lean toolchain variant image (used by background builds)
    #[command(hide = true)]
    BuildToolchain {
        version: String,
    },
    /// Delete an image
    Delete {
        name: Option<String>,
        /// Delete all bubble-built images
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
enum GitAction {
    /// Fetch all bare mirrors
    Update,
}

#[derive(Subcommand)]
enum NetworkAction {
    /// Apply the network allowlist to a bubble
    Apply {
        name: String,
    },
    /// Remove network restrictions from a bubble
    Remove {
        name: String,
    },
}

#[derive(Subcommand)]
enum AutomationAction {
    /// Install automation jobs (systemd on Linux, launchd on macOS)
    Install,
    /// Remove all automation jobs
    Remove,
    /// Show automation status
    Status,
}

#[derive(Subcommand)]
enum RelayAction {
    /// Enable the relay and start its daemon
    Enable,
    /// Disable the relay and stop its daemon
    Disable,
    /// Show relay status
    Status,
    /// Run the relay daemon in the foreground
    Daemon,
}

#[derive(Subcommand)]
enum RemoteAction {
    /// Set the default remote host ([user@]host[:port])
    SetDefault {
        host: String,
    },
    /// Clear the default remote host
    ClearDefault,
    /// Show the default remote host and its deployment state
    Status,
}

#[derive(Subcommand)]
enum CloudAction {
    /// Create the cloud server
    Provision {
        /// Hetzner server type (e.g. cx43)
        #[arg(long, value_name = "TYPE")]
        server_type: Option<String>,
        /// Hetzner location (e.g. fsn1)
        #[arg(long)]
        location: Option<String>,
    },
    /// Delete the cloud server
    Destroy {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Power the cloud server off
    Stop,
    /// Power the cloud server on
    Start,
    /// Show cloud server status
    Status,
    /// Open an SSH session on the cloud server
    Ssh,
    /// Route new bubbles to the cloud by default
    Default {
        /// on or off
        state: Option<String>,
    },
}

const KNOWN_SUBCOMMANDS: &[&str] = &[
    "open",
    "list",
    "pause",
    "destroy",
    "cleanup",
    "doctor",
    "editor",
    "images",
    "git",
    "network",
    "automation",
    "relay",
    "remote",
    "cloud",
    "help",
];

/// Route a bare target to the implicit `open` subcommand:
/// `bubble leanprover/lean4` behaves as `bubble open leanprover/lean4`.
fn normalize_args(mut args: Vec<String>) -> Vec<String> {
    if let Some(first) = args.get(1) {
        if !first.starts_with('-') && !KNOWN_SUBCOMMANDS.contains(&first.as_str()) {
            args.insert(1, "open".to_owned());
        }
    }
    args
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = normalize_args(std::env::args().collect());
    let cli = Cli::parse_from(args);

    let result = match cli.command {
        Commands::Open {
            target,
            editor,
            shell,
            emacs,
            neovim,
            ssh,
            cloud,
            local,
            no_interactive,
            network,
            no_network,
            name,
            path,
            machine_readable,
            no_clone,
        } => {
            let editor = commands::resolve_editor(editor, shell, emacs, neovim);
            let network = network || !no_network;
            commands::open(commands::OpenArgs {
                target,
                editor,
                ssh,
                cloud,
                local,
                no_interactive,
                network,
                custom_name: name,
                path,
                machine_readable,
                no_clone,
            })
            .await
        }
        Commands::List {
            json,
            verbose,
            clean,
        } => commands::list(json, verbose, clean).await,
        Commands::Pause { name } => commands::pause(&name).await,
        Commands::Destroy { name, force } => commands::destroy(&name, force).await,
        Commands::Cleanup {
            dry_run,
            force,
            all,
            age,
        } => commands::cleanup(dry_run, force, all, age).await,
        Commands::Doctor => commands::doctor().await,
        Commands::Editor { choice } => commands::editor(choice.as_deref()).await,
        Commands::Images { action } => match action {
            ImagesAction::List => commands::images_list().await,
            ImagesAction::Build { name } => commands::images_build(&name).await,
            ImagesAction::BuildToolchain { version } => {
                commands::images_build_toolchain(&version).await
            }
            ImagesAction::Delete { name, all } => {
                commands::images_delete(name.as_deref(), all).await
            }
        },
        Commands::Git { action } => match action {
            GitAction::Update => commands::git_update().await,
        },
        Commands::Network { action } => match action {
            NetworkAction::Apply { name } => commands::network_apply(&name).await,
            NetworkAction::Remove { name } => commands::network_remove(&name).await,
        },
        Commands::Automation { action } => match action {
            AutomationAction::Install => commands::automation_install().await,
            AutomationAction::Remove => commands::automation_remove().await,
            AutomationAction::Status => commands::automation_status().await,
        },
        Commands::Relay { action } => match action {
            RelayAction::Enable => commands::relay_enable().await,
            RelayAction::Disable => commands::relay_disable().await,
            RelayAction::Status => commands::relay_status().await,
            RelayAction::Daemon => commands::relay_daemon().await,
        },
        Commands::Remote { action } => match action {
            RemoteAction::SetDefault { host } => commands::remote_set_default(&host).await,
            RemoteAction::ClearDefault => commands::remote_clear_default().await,
            RemoteAction::Status => commands::remote_status().await,
        },
        Commands::Cloud { action } => match action {
            CloudAction::Provision {
                server_type,
                location,
            } => commands::cloud_provision(server_type.as_deref(), location.as_deref()).await,
            CloudAction::Destroy { force } => commands::cloud_destroy(force).await,
            CloudAction::Stop => commands::cloud_stop().await,
            CloudAction::Start => commands::cloud_start().await,
            CloudAction::Status => commands::cloud_status().await,
            CloudAction::Ssh => commands::cloud_ssh().await,
            CloudAction::Default { state } => commands::cloud_default(state.as_deref()).await,
        },
    };

    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn bare_target_routes_to_open() {
        let args = normalize_args(argv(&["bubble", "leanprover/lean4"]));
        assert_eq!(args, argv(&["bubble", "open", "leanprover/lean4"]));
    }

    #[test]
    fn known_subcommands_pass_through() {
        let args = normalize_args(argv(&["bubble", "list", "--json"]));
        assert_eq!(args, argv(&["bubble", "list", "--json"]));
    }

    #[test]
    fn flags_pass_through() {
        let args = normalize_args(argv(&["bubble", "--version"]));
        assert_eq!(args, argv(&["bubble", "--version"]));
    }

    #[test]
    fn pr_number_routes_to_open() {
        let args = normalize_args(argv(&["bubble", "12345"]));
        assert_eq!(args, argv(&["bubble", "open", "12345"]));
    }
}
