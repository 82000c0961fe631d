use crate::automation;

pub async fn automation_install() -> anyhow::Result<()> {
    let installed = automation::install_automation().await?;
    if installed.is_empty() {
        anyhow::bail!("No automation installed (unsupported platform?).");
    }
    for item in &installed {
        println!("  Installed: {item}");
    }
    println!("Automation installed.");
    Ok(())
}

pub async fn automation_remove() -> anyhow::Result<()> {
    let removed = automation::remove_automation().await?;
    if removed.is_empty() {
        println!("No automation jobs found to remove.");
        return Ok(());
    }
    for item in &removed {
        println!("  Removed: {item}");
    }
    println!("Automation removed.");
    Ok(())
}

pub async fn automation_status() -> anyhow::Result<()> {
    let status = automation::automation_status()?;
    if status.is_empty() {
        println!("Automation not supported on this platform.");
        return Ok(());
    }
    for (job, installed) in status {
        let state = if installed { "installed" } else { "not installed" };
        println!("  {job}: {state}");
    }
    Ok(())
}
