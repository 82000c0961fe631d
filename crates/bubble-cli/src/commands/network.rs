use anyhow::bail;
use bubble_net::{apply_allowlist, remove_allowlist};

use crate::attach::VSCODE_NETWORK_DOMAINS;

pub async fn network_apply(name: &str) -> anyhow::Result<()> {
    let ctx = super::context().await?;
    super::ensure_running(&ctx.runtime, name).await?;

    let mut domains = ctx.config.network.allowlist.clone();
    if domains.is_empty() {
        bail!(
            "No domains in allowlist. Edit {}",
            ctx.data_dir.config_file().display()
        );
    }
    for domain in VSCODE_NETWORK_DOMAINS {
        if !domains.iter().any(|d| d == domain) {
            domains.push((*domain).to_owned());
        }
    }

    apply_allowlist(&ctx.runtime, name, &domains).await?;
    println!("Network allowlist applied to '{name}' ({} domains).", domains.len());
    Ok(())
}

pub async fn network_remove(name: &str) -> anyhow::Result<()> {
    let ctx = super::context().await?;
    super::ensure_running(&ctx.runtime, name).await?;
    remove_allowlist(&ctx.runtime, name).await?;
    println!("Network restrictions removed from '{name}'.");
    Ok(())
}
