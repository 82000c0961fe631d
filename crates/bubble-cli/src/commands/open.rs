use anyhow::Context as _;
use bubble_remote::{cloud_remote_host, remote_open, RemoteHost};

use crate::attach::{attach, EditorChoice};
use crate::provision::{OpenFlags, Provisioner};

pub struct OpenArgs {
    pub target: String,
    pub editor: Option<String>,
    pub ssh: Option<String>,
    pub cloud: bool,
    pub local: bool,
    pub no_interactive: bool,
    pub network: bool,
    pub custom_name: Option<String>,
    pub path: bool,
    pub machine_readable: bool,
    pub no_clone: bool,
}

/// Collapse the editor shortcut flags and `--editor` into one choice.
pub fn resolve_editor(
    editor: Option<String>,
    shell: bool,
    emacs: bool,
    neovim: bool,
) -> Option<String> {
    if shell {
        Some("shell".to_owned())
    } else if emacs {
        Some("emacs".to_owned())
    } else if neovim {
        Some("neovim".to_owned())
    } else {
        editor
    }
}

pub async fn open(args: OpenArgs) -> anyhow::Result<()> {
    let ctx = super::context().await?;

    // `--path` forces local-path interpretation of bare names.
    let target = if args.path && !args.target.starts_with(['/', '.']) {
        format!("./{}", args.target)
    } else {
        args.target.clone()
    };

    // Remote routing: an explicit --ssh/--cloud wins, then the
    // configured defaults, unless --local overrides them.
    let remote = if args.local {
        None
    } else if let Some(spec) = &args.ssh {
        Some(RemoteHost::parse(spec)?)
    } else if args.cloud || ctx.config.cloud.default {
        Some(cloud_remote_host(&ctx.data_dir).await?)
    } else if !ctx.config.remote.default_host.is_empty() {
        Some(RemoteHost::parse(&ctx.config.remote.default_host)?)
    } else {
        None
    };

    if let Some(host) = remote {
        let value = remote_open(&host, &target, args.network, args.custom_name.as_deref()).await?;
        let name = value
            .get("name")
            .and_then(|n| n.as_str())
            .context("remote open returned no bubble name")?;

        // Track the remote bubble locally so list/destroy can route to
        // its host.
        let field = |key: &str| {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned()
        };
        let mut registry = bubble_core::BubbleRegistry::load(ctx.data_dir.registry_file());
        registry.register(
            name,
            bubble_core::BubbleInfo {
                org_repo: field("org_repo"),
                branch: field("branch"),
                commit: String::new(),
                pr: 0,
                base_image: field("image"),
                created_at: String::new(),
                remote_host: Some(host.spec_string()),
            },
        )?;

        println!("Bubble '{name}' ready on {}.", host.ssh_destination());
        println!("  Connect: ssh {} then ssh bubble-{name}", host.spec_string());
        // The machine-readable trailer is always the last stdout line.
        if args.machine_readable {
            println!("{value}");
        }
        return Ok(());
    }

    let provisioner = Provisioner {
        runtime: &ctx.runtime,
        data_dir: &ctx.data_dir,
        config: &ctx.config,
        ssh: crate::ssh_config::SshConfig::for_user()?,
    };
    let flags = OpenFlags {
        no_interactive: args.no_interactive,
        network: args.network,
        custom_name: args.custom_name.clone(),
        no_clone: args.no_clone,
        machine_readable: args.machine_readable,
    };

    let outcome = match provisioner.open(&target, &flags).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if args.machine_readable {
                let error = serde_json::json!({
                    "status": "error",
                    "name": "",
                    "message": e.to_string(),
                });
                println!("{error}");
            }
            return Err(e);
        }
    };

    // First successful create installs the periodic automation; never
    // fatal.
    if outcome.status == "created" {
        if let Ok(status) = crate::automation::automation_status() {
            if !status.is_empty() && status.values().all(|installed| !installed) {
                if let Ok(installed) = crate::automation::install_automation().await {
                    if !installed.is_empty() {
                        println!(
                            "  Automation installed (hourly git update, weekly image refresh)."
                        );
                    }
                }
            }
        }
    }

    if !args.no_interactive {
        let choice = match &args.editor {
            Some(name) => EditorChoice::parse(name)?,
            None => EditorChoice::parse(&ctx.config.editor).unwrap_or(EditorChoice::Vscode),
        };
        let project_dir = match &outcome.project_dir {
            Some(dir) => dir.clone(),
            None => provisioner.detect_project_dir(&outcome.name).await,
        };
        println!("Opening {choice} for '{}'...", outcome.name);
        attach(choice, &outcome.name, &project_dir).await?;
    }

    // The machine-readable trailer is always the last stdout line.
    if args.machine_readable {
        println!("{}", serde_json::to_string(&outcome)?);
    }

    Ok(())
}
