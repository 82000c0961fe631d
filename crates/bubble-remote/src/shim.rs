//! Deploy-self-and-invoke over SSH.
//!
//! The local binary is copied to `/tmp/bubble-remote/bubble` on the
//! remote host and subcommands are dispatched to it. Deployment is
//! skipped when the remote `.version` marker matches; the marker is
//! only written after a remote `--version` run succeeds, so a broken
//! upload never masquerades as deployed.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use bubble_core::shell::sh_join;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::info;

use crate::host::RemoteHost;

pub const REMOTE_DIR: &str = "/tmp/bubble-remote";
const REMOTE_BIN: &str = "/tmp/bubble-remote/bubble";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const OPEN_TIMEOUT: Duration = Duration::from_secs(600);

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]|\x1b[^\[]").unwrap());

// Platform probe results, cached per host spec for the process
// lifetime.
static PLATFORM_CACHE: LazyLock<Mutex<HashMap<String, String>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("could not run {program}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("remote command failed: {args:?}\n{stderr}")]
    CommandFailed { args: Vec<String>, stderr: String },

    #[error("remote command timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error(
        "remote platform '{remote}' does not match this machine ('{local}'); \
         bubble can only deploy itself to a matching OS and architecture"
    )]
    IncompatiblePlatform { remote: String, local: String },

    #[error("bubble deployment verification failed on {host}.\nstderr: {stderr}")]
    DeployVerification { host: String, stderr: String },

    #[error("empty output from remote bubble.\nstderr: {stderr}")]
    EmptyOutput { stderr: String },

    #[error("failed to parse remote bubble output.\nstdout: {stdout}\nstderr: {stderr}")]
    BadJson { stdout: String, stderr: String },

    #[error("remote bubble error: {message}")]
    RemoteFailed { message: String },
}

/// Strip ANSI escape sequences from remote output before echoing it.
pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}

struct RemoteOutput {
    status_ok: bool,
    stdout: String,
    stderr: String,
}

/// Run a command on the remote via SSH, each argv element individually
/// shell-quoted for transport through the remote shell.
async fn ssh_run(
    host: &RemoteHost,
    command: &[String],
    timeout: Duration,
) -> Result<RemoteOutput, RemoteError> {
    let quoted = sh_join(command);
    let argv = host.ssh_cmd(&[quoted]);

    let run = tokio::process::Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| RemoteError::Timeout {
            seconds: timeout.as_secs(),
        })?
        .map_err(|e| RemoteError::Spawn {
            program: argv[0].clone(),
            source: e,
        })?;

    Ok(RemoteOutput {
        status_ok: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn local_platform() -> String {
    let os = match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "Darwin",
        other => other,
    };
    format!("{os} {}", std::env::consts::ARCH)
}

/// Probe the remote's OS and architecture (`uname -sm`), cached per
/// host spec. The deployed binary must match both.
async fn check_remote_platform(host: &RemoteHost) -> Result<(), RemoteError> {
    let cache_key = host.spec_string();
    let cached = PLATFORM_CACHE
        .lock()
        .expect("platform cache poisoned")
        .get(&cache_key)
        .cloned();
    let remote = match cached {
        Some(remote) => remote,
        None => {
            let output = ssh_run(
                host,
                &["uname".to_owned(), "-sm".to_owned()],
                Duration::from_secs(15),
            )
            .await?;
            if !output.status_ok {
                return Err(RemoteError::CommandFailed {
                    args: vec!["uname".to_owned(), "-sm".to_owned()],
                    stderr: output.stderr,
                });
            }
            let remote = output.stdout.trim().to_owned();
            PLATFORM_CACHE
                .lock()
                .expect("platform cache poisoned")
                .insert(cache_key, remote.clone());
            remote
        }
    };

    let local = local_platform();
    if remote != local {
        return Err(RemoteError::IncompatiblePlatform { remote, local });
    }
    Ok(())
}

async fn remote_version_matches(host: &RemoteHost) -> bool {
    let output = ssh_run(
        host,
        &["cat".to_owned(), format!("{REMOTE_DIR}/.version")],
        Duration::from_secs(10),
    )
    .await;
    matches!(output, Ok(o) if o.status_ok && o.stdout.trim() == VERSION)
}

/// Deploy this binary to the remote host if needed.
pub async fn ensure_remote_bubble(host: &RemoteHost) -> Result<(), RemoteError> {
    if remote_version_matches(host).await {
        return Ok(());
    }

    info!(host = %host.ssh_destination(), version = VERSION, "deploying bubble");
    eprintln!("Deploying bubble {VERSION} to {}...", host.ssh_destination());

    check_remote_platform(host).await?;

    // Fresh deployment directory, owner-only.
    let _ = ssh_run(
        host,
        &["rm".to_owned(), "-rf".to_owned(), REMOTE_DIR.to_owned()],
        Duration::from_secs(15),
    )
    .await;
    for command in [
        vec!["mkdir".to_owned(), "-p".to_owned(), REMOTE_DIR.to_owned()],
        vec!["chmod".to_owned(), "700".to_owned(), REMOTE_DIR.to_owned()],
    ] {
        let output = ssh_run(host, &command, Duration::from_secs(10)).await?;
        if !output.status_ok {
            return Err(RemoteError::CommandFailed {
                args: command,
                stderr: output.stderr,
            });
        }
    }

    // Upload the executable itself.
    let exe = std::env::current_exe().map_err(|e| RemoteError::Spawn {
        program: "current_exe".to_owned(),
        source: e,
    })?;
    let scp = host.scp_cmd(&exe.to_string_lossy(), REMOTE_BIN);
    let output = tokio::time::timeout(
        Duration::from_secs(60),
        tokio::process::Command::new(&scp[0])
            .args(&scp[1..])
            .stdin(Stdio::null())
            .output(),
    )
    .await
    .map_err(|_| RemoteError::Timeout { seconds: 60 })?
    .map_err(|e| RemoteError::Spawn {
        program: "scp".to_owned(),
        source: e,
    })?;
    if !output.status.success() {
        return Err(RemoteError::CommandFailed {
            args: scp,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let chmod = vec!["chmod".to_owned(), "755".to_owned(), REMOTE_BIN.to_owned()];
    let output = ssh_run(host, &chmod, Duration::from_secs(10)).await?;
    if !output.status_ok {
        return Err(RemoteError::CommandFailed {
            args: chmod,
            stderr: output.stderr,
        });
    }

    // Verify before writing the version marker.
    let output = remote_bubble(host, &["--version".to_owned()], Duration::from_secs(15)).await?;
    if !output.status_ok {
        return Err(RemoteError::DeployVerification {
            host: host.ssh_destination(),
            stderr: strip_ansi(&output.stderr),
        });
    }

    let marker = vec![
        "sh".to_owned(),
        "-c".to_owned(),
        format!("echo '{VERSION}' > {REMOTE_DIR}/.version"),
    ];
    let output = ssh_run(host, &marker, Duration::from_secs(10)).await?;
    if !output.status_ok {
        return Err(RemoteError::CommandFailed {
            args: marker,
            stderr: output.stderr,
        });
    }

    eprintln!("Deployed bubble {VERSION} to {}.", host.ssh_destination());
    Ok(())
}

async fn remote_bubble(
    host: &RemoteHost,
    args: &[String],
    timeout: Duration,
) -> Result<RemoteOutput, RemoteError> {
    // The env assignment and binary path are fixed strings; everything
    // user-influenced comes after and is shell-quoted.
    let full = format!("BUBBLE_HOME=$HOME/.bubble {REMOTE_BIN} {}", sh_join(args));
    let argv = host.ssh_cmd(&[full]);

    let run = tokio::process::Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();
    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| RemoteError::Timeout {
            seconds: timeout.as_secs(),
        })?
        .map_err(|e| RemoteError::Spawn {
            program: argv[0].clone(),
            source: e,
        })?;

    Ok(RemoteOutput {
        status_ok: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run an arbitrary bubble subcommand on the remote (list, pause,
/// destroy, …), deploying first when needed. Returns the remote
/// stdout.
pub async fn remote_command(host: &RemoteHost, args: &[String]) -> Result<String, RemoteError> {
    ensure_remote_bubble(host).await?;
    let output = remote_bubble(host, args, Duration::from_secs(120)).await?;
    if output.status_ok {
        Ok(output.stdout)
    } else {
        Err(RemoteError::RemoteFailed {
            message: strip_ansi(output.stderr.trim()),
        })
    }
}

/// Open a bubble on a remote host.
///
/// Runs `bubble open --machine-readable` remotely, streaming progress
/// lines to the local terminal as they arrive, and returns the parsed
/// JSON trailer.
pub async fn remote_open(
    host: &RemoteHost,
    target: &str,
    network: bool,
    custom_name: Option<&str>,
) -> Result<serde_json::Value, RemoteError> {
    ensure_remote_bubble(host).await?;

    let mut args = vec![
        "open".to_owned(),
        "--no-interactive".to_owned(),
        "--machine-readable".to_owned(),
    ];
    if !network {
        args.push("--no-network".to_owned());
    }
    if let Some(name) = custom_name {
        args.push("--name".to_owned());
        args.push(name.to_owned());
    }
    args.push(target.to_owned());

    eprintln!("Creating bubble on {}...", host.ssh_destination());

    let full = format!("BUBBLE_HOME=$HOME/.bubble {REMOTE_BIN} {}", sh_join(&args));
    let argv = host.ssh_cmd(&[full]);

    let mut child = tokio::process::Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| RemoteError::Spawn {
            program: argv[0].clone(),
            source: e,
        })?;

    // Drain stderr concurrently so a full pipe can't deadlock the
    // stdout reader.
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");
    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        let _ = stderr_pipe.read_to_string(&mut buf).await;
        buf
    });

    let stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut lines = BufReader::new(stdout_pipe).lines();
    let mut collected: Vec<String> = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end().to_owned();
        if line.is_empty() {
            continue;
        }
        // The machine-readable trailer is not progress output.
        if !line.starts_with('{') {
            eprintln!("  {}", strip_ansi(&line));
        }
        collected.push(line);
    }

    let status = tokio::time::timeout(OPEN_TIMEOUT, child.wait())
        .await
        .map_err(|_| RemoteError::Timeout {
            seconds: OPEN_TIMEOUT.as_secs(),
        })?
        .map_err(|e| RemoteError::Spawn {
            program: "ssh".to_owned(),
            source: e,
        })?;
    let stderr = stderr_task.await.unwrap_or_default();

    if !status.success() {
        let message = if stderr.trim().is_empty() {
            strip_ansi(&collected.join("\n"))
        } else {
            strip_ansi(stderr.trim())
        };
        return Err(RemoteError::RemoteFailed {
            message: if message.is_empty() {
                "Unknown error".to_owned()
            } else {
                message
            },
        });
    }

    let Some(last) = collected.last() else {
        return Err(RemoteError::EmptyOutput {
            stderr: strip_ansi(&stderr),
        });
    };
    let value: serde_json::Value =
        serde_json::from_str(last).map_err(|_| RemoteError::BadJson {
            stdout: strip_ansi(&collected.join("\n")),
            stderr: strip_ansi(&stderr),
        })?;

    if value.get("status").and_then(|s| s.as_str()) == Some("error") {
        let message = value
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_owned();
        return Err(RemoteError::RemoteFailed { message });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ansi_sequences() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m text"), "red text");
        assert_eq!(strip_ansi("plain"), "plain");
        assert_eq!(strip_ansi("\x1b]0;title\x07rest"), "0;title\x07rest");
    }

    #[test]
    fn local_platform_shape() {
        let platform = local_platform();
        assert!(platform.contains(' '));
        assert!(platform.starts_with("Linux") || platform.starts_with("Darwin"));
    }
}
