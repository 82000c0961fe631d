use bubble_core::BubbleRegistry;
use bubble_runtime::ContainerRuntime;

/// Check runtime, config, and store health, and reconcile the bubble
/// registry against the containers that actually exist. A create
/// killed mid-pipeline leaves a container without an entry (fine); a
/// stale entry without a container is what needs cleaning up here.
pub async fn doctor() -> anyhow::Result<()> {
    let ctx = super::context().await?;
    let mut failed = false;

    // Runtime
    if ctx.runtime.is_available().await {
        println!("  runtime: ok (incus)");
    } else {
        println!("  runtime: FAIL — incus not available");
        failed = true;
    }

    // Config and data dir
    if ctx.data_dir.config_file().exists() {
        println!("  config: ok ({})", ctx.data_dir.config_file().display());
    } else {
        println!("  config: will be created on first use");
    }

    // Git store
    let mirrors = std::fs::read_dir(ctx.data_dir.git_dir())
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "git"))
                .count()
        })
        .unwrap_or(0);
    println!("  git store: {mirrors} mirror(s)");

    // Relay
    if ctx.config.relay.enabled {
        let reachable = if cfg!(target_os = "macos") {
            ctx.data_dir.relay_port_file().exists()
        } else {
            ctx.data_dir.relay_sock().exists()
        };
        if reachable {
            println!("  relay: enabled, daemon endpoint present");
        } else {
            println!("  relay: enabled but the daemon endpoint is missing — run: bubble relay daemon");
            failed = true;
        }
    } else {
        println!("  relay: disabled");
    }

    // Registry reconciliation
    let containers: std::collections::HashSet<String> = ctx
        .runtime
        .list_containers(true)
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect();
    let mut registry = BubbleRegistry::load(ctx.data_dir.registry_file());
    let stale: Vec<String> = registry
        .iter()
        .filter(|(name, info)| info.remote_host.is_none() && !containers.contains(name.as_str()))
        .map(|(name, _)| name.clone())
        .collect();

    if stale.is_empty() {
        println!("  registry: ok ({} entries)", registry.names().len());
    } else {
        println!("  registry: {} stale entr(ies) without a container", stale.len());
        for name in stale {
            if super::confirm(&format!("  Remove stale registry entry '{name}'?"))? {
                registry.unregister(&name)?;
                println!("  Removed '{name}'.");
            }
        }
    }

    let unregistered: Vec<&String> = containers
        .iter()
        .filter(|name| registry.get(name).is_none())
        .collect();
    if !unregistered.is_empty() {
        println!(
            "  note: {} container(s) not in the registry: {}",
            unregistered.len(),
            unregistered
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    if failed {
        anyhow::bail!("some checks failed — see above for details");
    }
    println!("All checks passed.");
    Ok(())
}
