//! Periodic task installation.
//!
//! Linux gets systemd user timers, macOS gets launchd agents:
//! - hourly git store update
//! - weekly base image refresh (Sunday 3am)
//! - the relay daemon service (managed separately by `bubble relay`)
//!
//! Units invoke whatever `bubble` binary is running right now, so a
//! reinstall at a different path re-points them on the next install.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::Context;

const GIT_UPDATE: &str = "bubble-git-update";
const IMAGE_REFRESH: &str = "bubble-image-refresh";
const RELAY: &str = "bubble-relay";

const LAUNCHD_GIT_UPDATE: &str = "com.bubble.git-update";
const LAUNCHD_IMAGE_REFRESH: &str = "com.bubble.image-refresh";
const LAUNCHD_RELAY: &str = "com.bubble.relay-daemon";

fn bubble_path() -> String {
    std::env::current_exe()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "bubble".to_owned())
}

fn systemd_dir() -> anyhow::Result<PathBuf> {
    Ok(dirs::home_dir()
        .context("could not determine the home directory")?
        .join(".config/systemd/user"))
}

fn launch_agents_dir() -> anyhow::Result<PathBuf> {
    Ok(dirs::home_dir()
        .context("could not determine the home directory")?
        .join("Library/LaunchAgents"))
}

async fn systemctl_user(args: &[&str]) {
    let _ = tokio::process::Command::new("systemctl")
        .arg("--user")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
}

async fn launchctl(args: &[&str]) {
    let _ = tokio::process::Command::new("launchctl")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
}

fn service_unit(description: &str, exec: &str) -> String {
    format!(
        "[Unit]\nDescription={description}\n\n[Service]\nType=oneshot\nExecStart={exec}\n"
    )
}

fn timer_unit(description: &str, on_calendar: &str) -> String {
    format!(
        "[Unit]\nDescription={description}\n\n[Timer]\nOnCalendar={on_calendar}\nPersistent=true\n\n\
         [Install]\nWantedBy=timers.target\n"
    )
}

fn launchd_plist(label: &str, args: &[&str], interval_secs: Option<u32>) -> String {
    let arg_items: String = args
        .iter()
        .map(|a| format!("    <string>{a}</string>\n"))
        .collect();
    let schedule = match interval_secs {
        Some(secs) => format!("  <key>StartInterval</key>\n  <integer>{secs}</integer>\n"),
        None => "  <key>KeepAlive</key>\n  <true/>\n".to_owned(),
    };
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \
         \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n\
         <plist version=\"1.0\">\n<dict>\n\
         \x20 <key>Label</key>\n\x20 <string>{label}</string>\n\
         \x20 <key>ProgramArguments</key>\n\x20 <array>\n{arg_items}\x20 </array>\n\
         {schedule}\
         </dict>\n</plist>\n"
    )
}

/// Install the periodic jobs. Returns descriptions of what was
/// installed (empty on unsupported platforms).
pub async fn install_automation() -> anyhow::Result<Vec<String>> {
    if cfg!(target_os = "macos") {
        install_launchd().await
    } else if cfg!(target_os = "linux") {
        install_systemd().await
    } else {
        Ok(Vec::new())
    }
}

/// Remove the periodic jobs. Returns descriptions of what was removed.
pub async fn remove_automation() -> anyhow::Result<Vec<String>> {
    if cfg!(target_os = "macos") {
        remove_launchd().await
    } else if cfg!(target_os = "linux") {
        remove_systemd().await
    } else {
        Ok(Vec::new())
    }
}

/// Which jobs are currently installed.
pub fn automation_status() -> anyhow::Result<BTreeMap<String, bool>> {
    let mut status = BTreeMap::new();
    if cfg!(target_os = "macos") {
        let agents = launch_agents_dir()?;
        status.insert(
            "git-update".to_owned(),
            agents.join(format!("{LAUNCHD_GIT_UPDATE}.plist")).exists(),
        );
        status.insert(
            "image-refresh".to_owned(),
            agents
                .join(format!("{LAUNCHD_IMAGE_REFRESH}.plist"))
                .exists(),
        );
    } else if cfg!(target_os = "linux") {
        let dir = systemd_dir()?;
        status.insert(
            "git-update".to_owned(),
            dir.join(format!("{GIT_UPDATE}.timer")).exists(),
        );
        status.insert(
            "image-refresh".to_owned(),
            dir.join(format!("{IMAGE_REFRESH}.timer")).exists(),
        );
    }
    Ok(status)
}

async fn install_systemd() -> anyhow::Result<Vec<String>> {
    let dir = systemd_dir()?;
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let bubble = bubble_path();
    let mut installed = Vec::new();

    std::fs::write(
        dir.join(format!("{GIT_UPDATE}.service")),
        service_unit("bubble git store update", &format!("{bubble} git update")),
    )?;
    std::fs::write(
        dir.join(format!("{GIT_UPDATE}.timer")),
        timer_unit("Hourly bubble git store update", "hourly"),
    )?;
    installed.push(format!("systemd: {GIT_UPDATE}.timer"));

    std::fs::write(
        dir.join(format!("{IMAGE_REFRESH}.service")),
        service_unit(
            "bubble base image refresh",
            &format!("{bubble} images build base"),
        ),
    )?;
    std::fs::write(
        dir.join(format!("{IMAGE_REFRESH}.timer")),
        timer_unit("Weekly bubble base image refresh", "Sun *-*-* 03:00:00"),
    )?;
    installed.push(format!("systemd: {IMAGE_REFRESH}.timer"));

    systemctl_user(&["daemon-reload"]).await;
    systemctl_user(&["enable", "--now", &format!("{GIT_UPDATE}.timer")]).await;
    systemctl_user(&["enable", "--now", &format!("{IMAGE_REFRESH}.timer")]).await;

    Ok(installed)
}

async fn remove_systemd() -> anyhow::Result<Vec<String>> {
    let dir = systemd_dir()?;
    let mut removed = Vec::new();

    for name in [GIT_UPDATE, IMAGE_REFRESH] {
        let timer = dir.join(format!("{name}.timer"));
        let service = dir.join(format!("{name}.service"));
        if timer.exists() {
            systemctl_user(&["disable", "--now", &format!("{name}.timer")]).await;
            std::fs::remove_file(&timer)?;
            removed.push(format!("systemd: {name}.timer"));
        }
        if service.exists() {
            std::fs::remove_file(&service)?;
        }
    }

    systemctl_user(&["daemon-reload"]).await;
    Ok(removed)
}

async fn install_launchd() -> anyhow::Result<Vec<String>> {
    let agents = launch_agents_dir()?;
    std::fs::create_dir_all(&agents).with_context(|| format!("creating {}", agents.display()))?;
    let bubble = bubble_path();
    let mut installed = Vec::new();

    let jobs = [
        (
            LAUNCHD_GIT_UPDATE,
            vec![bubble.as_str(), "git", "update"],
            Some(3600),
        ),
        (
            LAUNCHD_IMAGE_REFRESH,
            vec![bubble.as_str(), "images", "build", "base"],
            Some(7 * 24 * 3600),
        ),
    ];
    for (label, args, interval) in jobs {
        let plist = agents.join(format!("{label}.plist"));
        if plist.exists() {
            launchctl(&["unload", &plist.to_string_lossy()]).await;
        }
        std::fs::write(&plist, launchd_plist(label, &args, interval))?;
        launchctl(&["load", &plist.to_string_lossy()]).await;
        installed.push(format!("launchd: {label}"));
    }

    Ok(installed)
}

async fn remove_launchd() -> anyhow::Result<Vec<String>> {
    let agents = launch_agents_dir()?;
    let mut removed = Vec::new();

    for label in [LAUNCHD_GIT_UPDATE, LAUNCHD_IMAGE_REFRESH] {
        let plist = agents.join(format!("{label}.plist"));
        if plist.exists() {
            launchctl(&["unload", &plist.to_string_lossy()]).await;
            std::fs::remove_file(&plist)?;
            removed.push(format!("launchd: {label}"));
        }
    }

    Ok(removed)
}

// ── Relay daemon (separate lifecycle from the periodic jobs) ──

/// Install and start the relay daemon service.
pub async fn install_relay_daemon() -> anyhow::Result<Option<String>> {
    if cfg!(target_os = "macos") {
        let agents = launch_agents_dir()?;
        std::fs::create_dir_all(&agents)?;
        let plist = agents.join(format!("{LAUNCHD_RELAY}.plist"));
        if plist.exists() {
            launchctl(&["unload", &plist.to_string_lossy()]).await;
        }
        let bubble = bubble_path();
        std::fs::write(
            &plist,
            launchd_plist(LAUNCHD_RELAY, &[bubble.as_str(), "relay", "daemon"], None),
        )?;
        launchctl(&["load", &plist.to_string_lossy()]).await;
        Ok(Some(format!("launchd: {LAUNCHD_RELAY}")))
    } else if cfg!(target_os = "linux") {
        let dir = systemd_dir()?;
        std::fs::create_dir_all(&dir)?;
        let bubble = bubble_path();
        std::fs::write(
            dir.join(format!("{RELAY}.service")),
            format!(
                "[Unit]\nDescription=bubble relay daemon\n\n[Service]\nType=simple\n\
                 ExecStart={bubble} relay daemon\nRestart=always\nRestartSec=5\n\n\
                 [Install]\nWantedBy=default.target\n"
            ),
        )?;
        systemctl_user(&["daemon-reload"]).await;
        systemctl_user(&["enable", "--now", &format!("{RELAY}.service")]).await;
        Ok(Some(format!("systemd: {RELAY}.service")))
    } else {
        Ok(None)
    }
}

/// Stop and remove the relay daemon service.
pub async fn remove_relay_daemon() -> anyhow::Result<Option<String>> {
    if cfg!(target_os = "macos") {
        let agents = launch_agents_dir()?;
        let plist = agents.join(format!("{LAUNCHD_RELAY}.plist"));
        if plist.exists() {
            launchctl(&["unload", &plist.to_string_lossy()]).await;
            std::fs::remove_file(&plist)?;
            return Ok(Some(format!("launchd: {LAUNCHD_RELAY}")));
        }
        Ok(None)
    } else if cfg!(target_os = "linux") {
        let dir = systemd_dir()?;
        let service = dir.join(format!("{RELAY}.service"));
        if service.exists() {
            systemctl_user(&["disable", "--now", &format!("{RELAY}.service")]).await;
            std::fs::remove_file(&service)?;
            systemctl_user(&["daemon-reload"]).await;
            return Ok(Some(format!("systemd: {RELAY}.service")));
        }
        Ok(None)
    } else {
        Ok(None)
    }
}
