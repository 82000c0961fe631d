use anyhow::bail;
use bubble_core::BubbleRegistry;
use bubble_runtime::ContainerRuntime;

use crate::ssh_config::SshConfig;

pub async fn destroy(name: &str, force: bool) -> anyhow::Result<()> {
    let ctx = super::context().await?;

    if !force && !super::confirm(&format!("Permanently destroy bubble '{name}'?"))? {
        bail!("Aborted.");
    }

    // Bubbles living on a remote host are destroyed there.
    let mut registry = BubbleRegistry::load(ctx.data_dir.registry_file());
    if let Some(spec) = registry.get(name).and_then(|i| i.remote_host.clone()) {
        let host = bubble_remote::RemoteHost::parse(&spec)?;
        bubble_remote::remote_command(
            &host,
            &[
                "destroy".to_owned(),
                name.to_owned(),
                "--force".to_owned(),
            ],
        )
        .await?;
        registry.unregister(name)?;
        println!("Bubble '{name}' destroyed on {spec}.");
        return Ok(());
    }

    ctx.runtime.delete(name, true).await?;

    // The container is gone; the rest is bookkeeping and must not
    // leave stale entries behind.
    if let Ok(ssh) = SshConfig::for_user() {
        let _ = ssh.remove(name);
    }
    let _ = bubble_relay::remove_relay_token(&ctx.data_dir, name);
    registry.unregister(name)?;

    println!("Bubble '{name}' destroyed.");
    Ok(())
}
