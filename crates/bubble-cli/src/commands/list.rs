use bubble_core::BubbleRegistry;
use bubble_runtime::{ContainerRuntime, ContainerState};

use crate::clean::check_clean;

pub async fn list(as_json: bool, verbose: bool, with_clean: bool) -> anyhow::Result<()> {
    let ctx = super::context().await?;
    let containers = ctx.runtime.list_containers(!verbose).await?;
    let registry = BubbleRegistry::load(ctx.data_dir.registry_file());

    if as_json {
        let mut entries = Vec::new();
        for c in &containers {
            let info = registry.get(&c.name);
            let mut entry = serde_json::json!({
                "name": c.name,
                "state": c.state.to_string(),
                "ipv4": c.ipv4,
                "org_repo": info.map(|i| i.org_repo.clone()),
                "branch": info.map(|i| i.branch.clone()),
            });
            if verbose {
                entry["disk_usage"] = serde_json::json!(c.disk_usage);
                entry["created_at"] = serde_json::json!(info.map(|i| i.created_at.clone()));
            }
            if with_clean && c.state == ContainerState::Running {
                let status = check_clean(&ctx.runtime, &c.name, info).await;
                entry["clean"] = serde_json::json!(status.clean);
                entry["clean_summary"] = serde_json::json!(status.summary());
            }
            entries.push(entry);
        }
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if containers.is_empty() {
        println!("No bubbles. Create one with: bubble owner/repo");
        return Ok(());
    }

    let clean_header = if with_clean { " CLEAN" } else { "" };
    println!("{:<30} {:<10} {:<16} {:<30}{clean_header}", "NAME", "STATE", "IPv4", "REPO");
    println!("{}", "-".repeat(if with_clean { 94 } else { 88 }));
    for c in &containers {
        let info = registry.get(&c.name);
        let repo = info.map(|i| i.org_repo.as_str()).unwrap_or("-");
        let ipv4 = c.ipv4.as_deref().unwrap_or("-");
        let mut line = format!("{:<30} {:<10} {:<16} {:<30}", c.name, c.state.to_string(), ipv4, repo);
        if with_clean {
            let summary = if c.state == ContainerState::Running {
                check_clean(&ctx.runtime, &c.name, info).await.summary()
            } else {
                c.state.to_string()
            };
            line.push(' ');
            line.push_str(&summary);
        }
        println!("{line}");
        if verbose {
            let disk = c
                .disk_usage
                .map(|b| format!("{:.1} MB", b as f64 / (1024.0 * 1024.0)))
                .unwrap_or_else(|| "-".to_owned());
            let created = info.map(|i| i.created_at.as_str()).unwrap_or("-");
            println!("{:<30}   disk {disk}, created {created}", "");
        }
    }
    Ok(())
}
