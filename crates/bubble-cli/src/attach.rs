//! Attaching an editor (or shell) to a running bubble.
//!
//! Every editor goes through the `bubble-<name>` SSH config entry, so
//! attach behavior is identical for local and Colima-hosted runtimes.

use std::process::Stdio;

use anyhow::{bail, Context};

/// Domains VS Code Remote SSH needs to function (marketplace and
/// update endpoints). Always appended to the allowlist.
pub const VSCODE_NETWORK_DOMAINS: &[&str] = &[
    "marketplace.visualstudio.com",
    "*.gallery.vsassets.io",
    "update.code.visualstudio.com",
    "*.vo.msecnd.net",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorChoice {
    Vscode,
    Shell,
    Emacs,
    Neovim,
}

impl EditorChoice {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "vscode" | "code" => Ok(Self::Vscode),
            "shell" | "ssh" => Ok(Self::Shell),
            "emacs" => Ok(Self::Emacs),
            "neovim" | "nvim" => Ok(Self::Neovim),
            other => bail!("unknown editor {other:?} (expected vscode, shell, emacs, or neovim)"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vscode => "vscode",
            Self::Shell => "shell",
            Self::Emacs => "emacs",
            Self::Neovim => "neovim",
        }
    }
}

impl std::fmt::Display for EditorChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attach the chosen editor to a bubble. Blocks until the interactive
/// session ends (shell/terminal editors) or the launch command returns
/// (VS Code).
pub async fn attach(choice: EditorChoice, bubble_name: &str, project_dir: &str) -> anyhow::Result<()> {
    let ssh_host = format!("bubble-{bubble_name}");
    match choice {
        EditorChoice::Vscode => open_vscode(&ssh_host, project_dir).await,
        EditorChoice::Shell => interactive_ssh(&ssh_host, None).await,
        EditorChoice::Emacs => {
            interactive_ssh(&ssh_host, Some(format!("cd {project_dir} && emacs -nw ."))).await
        }
        EditorChoice::Neovim => {
            interactive_ssh(&ssh_host, Some(format!("cd {project_dir} && nvim ."))).await
        }
    }
}

async fn open_vscode(ssh_host: &str, project_dir: &str) -> anyhow::Result<()> {
    let uri = format!("vscode-remote://ssh-remote+{ssh_host}{project_dir}");
    let result = tokio::process::Command::new("code")
        .args(["--disable-workspace-trust", "--folder-uri", &uri])
        .stdin(Stdio::null())
        .status()
        .await;
    match result {
        Ok(status) if status.success() => Ok(()),
        Ok(_) | Err(_) => {
            eprintln!("VS Code CLI not found. Connect manually: Remote SSH → {ssh_host}");
            eprintln!("Or run: code --folder-uri {uri}");
            Ok(())
        }
    }
}

async fn interactive_ssh(ssh_host: &str, command: Option<String>) -> anyhow::Result<()> {
    let mut cmd = tokio::process::Command::new("ssh");
    cmd.arg("-t").arg(ssh_host);
    if let Some(command) = command {
        cmd.arg(command);
    }
    let status = cmd.status().await.context("could not run ssh")?;
    if !status.success() {
        bail!("ssh session to {ssh_host} exited with {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_choices_and_aliases() {
        assert_eq!(EditorChoice::parse("vscode").unwrap(), EditorChoice::Vscode);
        assert_eq!(EditorChoice::parse("code").unwrap(), EditorChoice::Vscode);
        assert_eq!(EditorChoice::parse("ssh").unwrap(), EditorChoice::Shell);
        assert_eq!(EditorChoice::parse("nvim").unwrap(), EditorChoice::Neovim);
        assert!(EditorChoice::parse("vim").is_err());
    }

    #[test]
    fn display_round_trips() {
        for choice in [
            EditorChoice::Vscode,
            EditorChoice::Shell,
            EditorChoice::Emacs,
            EditorChoice::Neovim,
        ] {
            assert_eq!(EditorChoice::parse(choice.as_str()).unwrap(), choice);
        }
    }
}
