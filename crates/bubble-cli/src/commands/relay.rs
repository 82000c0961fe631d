use bubble_relay::run_daemon;

use crate::automation;

pub async fn relay_enable() -> anyhow::Result<()> {
    let ctx = super::context().await?;
    let mut config = ctx.config;
    config.relay.enabled = true;
    config.save(&ctx.data_dir)?;

    match automation::install_relay_daemon().await? {
        Some(installed) => println!("  Installed: {installed}"),
        None => println!("  Run the daemon manually: bubble relay daemon"),
    }
    println!("Relay enabled. New bubbles get a relay device and token.");
    Ok(())
}

pub async fn relay_disable() -> anyhow::Result<()> {
    let ctx = super::context().await?;
    let mut config = ctx.config;
    config.relay.enabled = false;
    config.save(&ctx.data_dir)?;

    if let Some(removed) = automation::remove_relay_daemon().await? {
        println!("  Removed: {removed}");
    }
    println!("Relay disabled.");
    Ok(())
}

pub async fn relay_status() -> anyhow::Result<()> {
    let ctx = super::context().await?;
    let enabled = if ctx.config.relay.enabled { "enabled" } else { "disabled" };
    println!("Relay: {enabled}");

    if cfg!(target_os = "macos") {
        match std::fs::read_to_string(ctx.data_dir.relay_port_file()) {
            Ok(port) => println!("  Daemon: listening on 127.0.0.1:{}", port.trim()),
            Err(_) => println!("  Daemon: not running (no port file)"),
        }
    } else {
        let sock = ctx.data_dir.relay_sock();
        if sock.exists() {
            println!("  Daemon: listening on {}", sock.display());
        } else {
            println!("  Daemon: not running (no socket)");
        }
    }

    let log = ctx.data_dir.relay_log();
    if let Ok(contents) = std::fs::read_to_string(&log) {
        let recent: Vec<&str> = contents.lines().rev().take(5).collect();
        if !recent.is_empty() {
            println!("  Recent requests:");
            for line in recent.into_iter().rev() {
                println!("    {line}");
            }
        }
    }
    Ok(())
}

pub async fn relay_daemon() -> anyhow::Result<()> {
    let data_dir = bubble_core::DataDir::from_env();
    println!("Relay daemon starting...");
    run_daemon(data_dir).await?;
    Ok(())
}
