//! Colima VM bootstrap (macOS).
//!
//! Incus runs inside a Colima VM on macOS. `ensure_colima` starts the
//! VM with the configured sizing when it is not already running; on
//! Linux it is never called.

use std::process::Stdio;

use tracing::info;

use crate::error::RuntimeError;

pub struct ColimaSizing {
    pub cpu: u32,
    pub memory: u32,
    pub disk: u32,
    pub vm_type: String,
}

async fn colima(args: &[&str]) -> Result<String, RuntimeError> {
    let output = tokio::process::Command::new("colima")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| RuntimeError::NotFound { source: e })?;
    if output.status.success() {
        String::from_utf8(output.stdout)
            .map(|s| s.trim().to_owned())
            .map_err(|e| RuntimeError::InvalidUtf8 { source: e })
    } else {
        Err(RuntimeError::CommandFailed {
            args: args.iter().map(|s| (*s).to_owned()).collect(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

pub async fn is_running() -> bool {
    colima(&["status"]).await.is_ok()
}

/// Start Colima with the configured sizing if it is not already up.
pub async fn ensure_colima(sizing: &ColimaSizing) -> Result<(), RuntimeError> {
    if is_running().await {
        return Ok(());
    }
    info!(
        cpu = sizing.cpu,
        memory = sizing.memory,
        disk = sizing.disk,
        "starting Colima VM"
    );
    let cpu = sizing.cpu.to_string();
    let memory = sizing.memory.to_string();
    let disk = sizing.disk.to_string();
    colima(&[
        "start",
        "--cpu",
        &cpu,
        "--memory",
        &memory,
        "--disk",
        &disk,
        "--vm-type",
        &sizing.vm_type,
    ])
    .await
    .map(|_| ())
}
