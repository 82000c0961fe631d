use bubble_core::BubbleRegistry;
use bubble_runtime::{ContainerRuntime, ContainerState};
use chrono::{DateTime, Utc};

use crate::clean::check_clean;
use crate::ssh_config::SshConfig;

/// Destroy bubbles that are safe to discard: clean working tree, no
/// stashes, nothing unpushed. `--all` skips the safety check entirely.
pub async fn cleanup(
    dry_run: bool,
    force: bool,
    all: bool,
    age_days: Option<u32>,
) -> anyhow::Result<()> {
    let ctx = super::context().await?;
    let containers = ctx.runtime.list_containers(true).await?;
    let mut registry = BubbleRegistry::load(ctx.data_dir.registry_file());

    let cutoff = age_days.map(|days| Utc::now() - chrono::Duration::days(i64::from(days)));

    let mut destroyed = 0;
    let mut skipped = 0;
    for container in &containers {
        let name = &container.name;
        let info = registry.get(name).cloned();

        if let (Some(cutoff), Some(info)) = (cutoff, &info) {
            let created = DateTime::parse_from_rfc3339(&info.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .ok();
            if created.is_none_or(|created| created > cutoff) {
                skipped += 1;
                continue;
            }
        }

        let reason = if all {
            "forced".to_owned()
        } else {
            if container.state != ContainerState::Running {
                println!("  {name}: {} — skipping (can't verify)", container.state);
                skipped += 1;
                continue;
            }
            let status = check_clean(&ctx.runtime, name, info.as_ref()).await;
            if !status.clean {
                println!("  {name}: {} — keeping", status.summary());
                skipped += 1;
                continue;
            }
            "clean".to_owned()
        };

        if dry_run {
            println!("  {name}: {reason} — would destroy");
            destroyed += 1;
            continue;
        }
        if !force && !super::confirm(&format!("Destroy '{name}' ({reason})?"))? {
            skipped += 1;
            continue;
        }

        ctx.runtime.delete(name, true).await?;
        if let Ok(ssh) = SshConfig::for_user() {
            let _ = ssh.remove(name);
        }
        let _ = bubble_relay::remove_relay_token(&ctx.data_dir, name);
        registry.unregister(name)?;
        println!("  {name}: destroyed");
        destroyed += 1;
    }

    let verb = if dry_run { "would destroy" } else { "destroyed" };
    println!("Cleanup: {verb} {destroyed}, kept {skipped}.");
    Ok(())
}
