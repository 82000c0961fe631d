//! The end-to-end bubble creation pipeline.
//!
//! launch → wait-for-network → mount alternates → clone → checkout →
//! language hook → SSH/allowlist → register. Registration is last on
//! purpose: a container without a registry entry is recoverable by
//! `doctor`, a registry entry without a container is not. Best-effort
//! steps (dependency mounts, PR metadata, automation install) warn and
//! continue; they never abort a create.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Context as _};
use bubble_core::config::repo_short_name;
use bubble_core::target::{parse_target, Target, TargetKind};
use bubble_core::{
    deduplicate_name, generate_name, sh_quote, BubbleInfo, BubbleRegistry, Config, DataDir,
    RepoRegistry,
};
use bubble_git::{github_url, GitStore};
use bubble_hooks::Hook;
use bubble_runtime::{wait_for_container, ContainerRuntime, ContainerState};
use serde::Serialize;
use tracing::warn;

use crate::attach::VSCODE_NETWORK_DOMAINS;
use crate::ssh_config::SshConfig;

const READY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct OpenFlags {
    pub no_interactive: bool,
    pub network: bool,
    pub custom_name: Option<String>,
    pub no_clone: bool,
    pub machine_readable: bool,
}

#[derive(Debug, Serialize)]
pub struct OpenOutcome {
    pub status: &'static str,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Generate the container name for a target: `<short>-<kind>-<id>`
/// for PRs, branches, and commits; `<short>-main-YYYYMMDD` for plain
/// repos.
pub fn name_for_target(target: &Target, custom_name: Option<&str>) -> String {
    if let Some(name) = custom_name {
        return name.to_owned();
    }
    let short = target.short_name();
    match target.kind {
        TargetKind::Pr => generate_name(&short, "pr", &target.ref_name),
        TargetKind::Branch => generate_name(&short, "branch", &target.ref_name),
        TargetKind::Commit => {
            let id: String = target.ref_name.chars().take(12).collect();
            generate_name(&short, "commit", &id)
        }
        TargetKind::Repo => generate_name(&short, "main", ""),
    }
}

/// Find an existing container matching the target: by raw name, by
/// generated name, or by a registry entry for the same repo and
/// PR/branch whose container still exists.
pub fn find_existing_container(
    containers: &HashSet<String>,
    registry: &BubbleRegistry,
    raw_target: &str,
    generated_name: Option<&str>,
    target: Option<&Target>,
) -> Option<String> {
    if containers.contains(raw_target) {
        return Some(raw_target.to_owned());
    }
    if let Some(name) = generated_name {
        if containers.contains(name) {
            return Some(name.to_owned());
        }
    }
    let target = target?;
    for (name, info) in registry.iter() {
        if info.org_repo != target.org_repo() || !containers.contains(name) {
            continue;
        }
        let matched = match target.kind {
            TargetKind::Pr => info.pr.to_string() == target.ref_name,
            TargetKind::Branch => info.branch == target.ref_name,
            _ => false,
        };
        if matched {
            return Some(name.clone());
        }
    }
    None
}

/// Device name for a dependency mount: `dep-<repo>`, sanitized to the
/// runtime's device-name rules (≤63 chars, dots/underscores become
/// hyphens).
pub fn dep_device_name(repo_short: &str) -> String {
    let mut name = format!("dep-{}", repo_short.to_lowercase());
    name = name.replace(['.', '_'], "-");
    name.truncate(63);
    name
}

pub struct Provisioner<'a, R> {
    pub runtime: &'a R,
    pub data_dir: &'a DataDir,
    pub config: &'a Config,
    pub ssh: SshConfig,
}

impl<'a, R: ContainerRuntime> Provisioner<'a, R> {
    /// Open (create or reattach) a bubble for a raw target string.
    pub async fn open(&self, raw_target: &str, flags: &OpenFlags) -> anyhow::Result<OpenOutcome> {
        let containers: HashSet<String> = self
            .runtime
            .list_containers(true)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();
        let mut bubbles = BubbleRegistry::load(self.data_dir.registry_file());

        // A raw target naming an existing container is a reattach,
        // no parsing needed.
        if let Some(existing) =
            find_existing_container(&containers, &bubbles, raw_target, None, None)
        {
            return self.reattach(&existing).await;
        }

        let mut repos = RepoRegistry::load(self.data_dir.repos_file());
        let target = parse_target(raw_target, &mut repos).await?;

        let name = name_for_target(&target, flags.custom_name.as_deref());
        if let Some(existing) =
            find_existing_container(&containers, &bubbles, raw_target, Some(&name), Some(&target))
        {
            return self.reattach(&existing).await;
        }

        self.data_dir.ensure()?;
        let store = GitStore::new(self.data_dir.git_dir());

        // Resolve the ref source: the local checkout's git dir, or the
        // shared bare mirror.
        let (ref_source, mount_name) = match &target.local_path {
            Some(local) => {
                let git_dir = local.join(".git");
                (
                    git_dir.to_string_lossy().into_owned(),
                    format!("{}.git", target.short_name()),
                )
            }
            None => {
                if flags.no_clone && !store.repo_is_known(&target.org_repo()) {
                    bail!(
                        "repo '{}' is not available in the git store and --no-clone is set",
                        target.org_repo()
                    );
                }
                let bare = store.init_bare_repo(&target.org_repo()).await?;
                let mount_name = bare
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("{}.git", target.short_name()));
                (bare.to_string_lossy().into_owned(), mount_name)
            }
        };

        // PR head refs may postdate the last mirror fetch; failure is
        // fine, the ref may already be there.
        if target.kind == TargetKind::Pr {
            println!("Fetching PR #{}...", target.ref_name);
            let refspec = format!(
                "refs/pull/{0}/head:refs/pull/{0}/head",
                target.ref_name
            );
            if let Err(e) = store.fetch_ref(&target.org_repo(), &refspec).await {
                warn!(error = %e, "PR ref fetch failed");
            }
        }

        // Hook detection runs against the ref source on the host.
        let hook_ref = match target.kind {
            TargetKind::Pr => format!("refs/pull/{}/head", target.ref_name),
            TargetKind::Branch | TargetKind::Commit => target.ref_name.clone(),
            TargetKind::Repo => "HEAD".to_owned(),
        };
        let hook = Hook::select(std::path::Path::new(&ref_source), &hook_ref).await;
        let mut image_name = match &hook {
            Some(hook) => {
                println!("  Detected: {}", hook.name());
                hook.image_name()
            }
            None => "base".to_owned(),
        };

        image_name = self.ensure_image(image_name).await?;

        // Pre-mirror pinned dependencies so their objects mount as
        // reference sources too. Per-dep failures are logged and
        // skipped.
        let mut dep_mounts: Vec<(String, String)> = Vec::new();
        if let Some(hook) = &hook {
            for dep in hook.git_dependencies() {
                match store.ensure_rev_available(&dep.org_repo, &dep.rev).await {
                    Ok(true) => {
                        let bare = store.bare_repo_path(&dep.org_repo);
                        dep_mounts.push((
                            repo_short_name(&dep.org_repo),
                            bare.to_string_lossy().into_owned(),
                        ));
                    }
                    Ok(false) => {
                        warn!(dep = %dep.org_repo, rev = %dep.rev, "dependency rev not found, skipping mount");
                    }
                    Err(e) => {
                        warn!(dep = %dep.org_repo, error = %e, "dependency prefetch failed, skipping");
                    }
                }
            }
        }

        let name = deduplicate_name(&name, &containers);
        println!("Creating bubble '{name}'...");

        self.runtime.launch(&name, &image_name).await?;
        wait_for_container(self.runtime, &name, READY_TIMEOUT).await?;

        // Mounts: the main ref source, dependency mirrors, and the
        // hook's writable shared caches.
        self.runtime
            .add_disk(
                &name,
                "shared-git",
                &ref_source,
                &format!("/shared/git/{mount_name}"),
                true,
            )
            .await?;
        for (repo, bare_path) in &dep_mounts {
            let device = dep_device_name(repo);
            if let Err(e) = self
                .runtime
                .add_disk(
                    &name,
                    &device,
                    bare_path,
                    &format!("/shared/git/{repo}.git"),
                    true,
                )
                .await
            {
                warn!(dep = %repo, error = %e, "dependency mount failed");
            }
        }
        if let Some(hook) = &hook {
            self.attach_shared_mounts(&name, hook).await?;
        }

        if self.config.relay.enabled {
            if let Err(e) = self.attach_relay(&name).await {
                warn!(error = %e, "relay device setup failed");
            }
        }

        // Reference clone: objects come from the mounted mirror, so
        // this transfers near nothing.
        let short = target.short_name();
        let project_dir = format!("/home/user/{short}");
        println!("Cloning {} (using shared objects)...", target.org_repo());
        let clone_cmd = format!(
            "git clone --reference /shared/git/{mount} {url} {dir}",
            mount = sh_quote(&mount_name),
            url = sh_quote(&github_url(&target.org_repo())),
            dir = sh_quote(&project_dir),
        );
        self.runtime
            .exec(&name, &["su", "-", "user", "-c", &clone_cmd])
            .await?;

        let checkout_branch = self
            .checkout(&name, &target, &project_dir, &mount_name)
            .await?;

        if let Some(hook) = &hook {
            if let Err(e) = hook.post_clone(self.runtime, &name, &project_dir).await {
                warn!(error = %e, "hook post-clone step failed");
            }
        }

        if flags.network {
            self.apply_network(&name, hook.as_ref()).await;
        }

        println!("Setting up SSH access...");
        self.setup_ssh(&name).await?;

        let commit = self
            .runtime
            .exec(
                &name,
                &[
                    "su",
                    "-",
                    "user",
                    "-c",
                    &format!("cd {} && git rev-parse HEAD", sh_quote(&project_dir)),
                ],
            )
            .await
            .unwrap_or_default();

        // Register last; see module docs.
        bubbles.register(
            &name,
            BubbleInfo {
                org_repo: target.org_repo(),
                branch: checkout_branch.clone(),
                commit,
                pr: match target.kind {
                    TargetKind::Pr => target.ref_name.parse().unwrap_or(0),
                    _ => 0,
                },
                base_image: image_name.clone(),
                created_at: String::new(),
                remote_host: None,
            },
        )?;

        println!("Bubble '{name}' created successfully.");
        println!("  SSH: ssh bubble-{name}");

        // Some hooks point the editor at a workspace file instead of
        // the project root.
        let attach_dir = match hook.as_ref().and_then(|h| h.workspace_file()) {
            Some(workspace) => format!("{project_dir}/{workspace}"),
            None => project_dir,
        };

        Ok(OpenOutcome {
            status: "created",
            name,
            project_dir: Some(attach_dir),
            org_repo: Some(target.org_repo()),
            image: Some(image_name),
            branch: (!checkout_branch.is_empty()).then_some(checkout_branch),
            message: None,
        })
    }

    /// Reattach to an existing container: unfreeze or start as needed
    /// and rediscover the project directory.
    pub async fn reattach(&self, name: &str) -> anyhow::Result<OpenOutcome> {
        let containers = self.runtime.list_containers(true).await?;
        let info = containers
            .iter()
            .find(|c| c.name == name)
            .with_context(|| format!("bubble '{name}' not found"))?;

        match info.state {
            ContainerState::Frozen => {
                println!("Unpausing '{name}'...");
                self.runtime.unfreeze(name).await?;
            }
            ContainerState::Stopped => {
                println!("Starting '{name}'...");
                self.runtime.start(name).await?;
            }
            _ => {}
        }

        let project_dir = self.detect_project_dir(name).await;
        let bubbles = BubbleRegistry::load(self.data_dir.registry_file());
        let info = bubbles.get(name);

        Ok(OpenOutcome {
            status: "reattached",
            name: name.to_owned(),
            project_dir: Some(project_dir),
            org_repo: info.map(|i| i.org_repo.clone()),
            image: info.map(|i| i.base_image.clone()),
            branch: info.map(|i| i.branch.clone()).filter(|b| !b.is_empty()),
            message: None,
        })
    }

    pub async fn detect_project_dir(&self, name: &str) -> String {
        self.runtime
            .exec(
                name,
                &["bash", "-c", "ls -d /home/user/*/ 2>/dev/null | head -1"],
            )
            .await
            .map(|out| out.trim().trim_end_matches('/').to_owned())
            .ok()
            .filter(|dir| !dir.is_empty())
            .unwrap_or_else(|| "/home/user".to_owned())
    }

    /// Make sure the chosen image exists, with the toolchain-variant
    /// special case: fall back to the base `lean` image and build the
    /// variant in the background rather than blocking the create.
    async fn ensure_image(&self, image_name: String) -> anyhow::Result<String> {
        if self.runtime.image_exists(&image_name).await? {
            return Ok(image_name);
        }

        if let Some(version) = image_name.strip_prefix("lean-v") {
            let version = format!("v{version}");
            if !self.runtime.image_exists("lean").await? {
                println!("Building lean image...");
                bubble_build::build_image(self.runtime, self.data_dir, "lean").await?;
            }
            println!("  Toolchain image {image_name} missing; building in the background.");
            if let Err(e) = bubble_build::spawn_background_toolchain_build(self.data_dir, &version)
            {
                warn!(error = %e, "background toolchain build failed to start");
            }
            return Ok("lean".to_owned());
        }

        println!("Building {image_name} image...");
        bubble_build::build_image(self.runtime, self.data_dir, &image_name).await?;
        Ok(image_name)
    }

    async fn attach_shared_mounts(&self, name: &str, hook: &Hook) -> anyhow::Result<()> {
        let mut exports = String::new();
        for mount in hook.shared_mounts() {
            let host_dir = self.data_dir.shared_mount_dir(mount.host_dir_name);
            std::fs::create_dir_all(&host_dir)
                .with_context(|| format!("creating {}", host_dir.display()))?;
            // World-writable: the container-side uid doesn't map to
            // the host owner.
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&host_dir, std::fs::Permissions::from_mode(0o777))?;
            }
            self.runtime
                .add_disk(
                    name,
                    mount.host_dir_name,
                    &host_dir.to_string_lossy(),
                    mount.container_path,
                    false,
                )
                .await?;
            exports.push_str(&format!(
                "export {}={}\n",
                mount.env_var, mount.container_path
            ));
        }
        if !exports.is_empty() {
            let script = format!(
                "printf '%s' {} > /etc/profile.d/bubble-shared.sh",
                sh_quote(&exports)
            );
            self.runtime.exec(name, &["bash", "-c", &script]).await?;
        }
        Ok(())
    }

    /// Wire the relay into the container: a proxy device from
    /// `/bubble/relay.sock` inside to the daemon outside, and a fresh
    /// token at `/bubble/relay-token`.
    async fn attach_relay(&self, name: &str) -> anyhow::Result<()> {
        let connect = if cfg!(target_os = "macos") {
            let port: u16 = std::fs::read_to_string(self.data_dir.relay_port_file())
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .context("relay daemon port file missing; is the relay daemon running?")?;
            let bridge = self
                .runtime
                .bridge_address()
                .await?
                .context("no bridge address for the relay proxy device")?;
            let bridge_ip = bridge.split('/').next().unwrap_or(&bridge).to_owned();
            format!("tcp:{bridge_ip}:{port}")
        } else {
            format!("unix:{}", self.data_dir.relay_sock().display())
        };

        self.runtime
            .add_device(
                name,
                "relay",
                "proxy",
                &[
                    ("listen", "unix:/bubble/relay.sock"),
                    ("connect", connect.as_str()),
                    ("bind", "container"),
                    ("uid", "1001"),
                    ("gid", "1001"),
                    ("mode", "0600"),
                ],
            )
            .await?;

        let token = bubble_relay::generate_relay_token(self.data_dir, name)?;
        let tmp = tempfile::NamedTempFile::new()?;
        std::fs::write(tmp.path(), format!("{token}\n"))?;
        self.runtime
            .push_file(name, &tmp.path().to_string_lossy(), "/bubble/relay-token")
            .await?;
        self.runtime
            .exec(
                name,
                &[
                    "bash",
                    "-c",
                    "chown user:user /bubble/relay-token && chmod 600 /bubble/relay-token",
                ],
            )
            .await?;
        Ok(())
    }

    /// Check out the right ref for the target. Returns the branch name
    /// the bubble ends up on (empty for detached commit checkouts).
    async fn checkout(
        &self,
        name: &str,
        target: &Target,
        project_dir: &str,
        mount_name: &str,
    ) -> anyhow::Result<String> {
        let q_dir = sh_quote(project_dir);
        match target.kind {
            TargetKind::Pr => {
                println!("Checking out PR #{}...", target.ref_name);
                let pr: u64 = target.ref_name.parse().unwrap_or(0);

                // Best effort: the branch-name checkout needs the PR
                // head metadata; without it the pr-<N> ref still
                // works.
                let head = bubble_git::pr_head(&target.org_repo(), pr)
                    .await
                    .ok()
                    .flatten();

                if let Some(head) = head {
                    let q_branch = sh_quote(&head.head_ref);
                    let result = if head.is_fork_of(&target.org_repo()) {
                        let cmd = format!(
                            "cd {q_dir} && git remote add fork {url} && \
                             git fetch fork +refs/heads/{branch}:refs/remotes/fork/{branch} && \
                             git checkout -b {q_branch} --track fork/{branch}",
                            url = sh_quote(&head.clone_url),
                            branch = q_branch,
                        );
                        self.runtime.exec(name, &["su", "-", "user", "-c", &cmd]).await
                    } else {
                        let cmd = format!(
                            "cd {q_dir} && \
                             git fetch origin +refs/heads/{branch}:refs/remotes/origin/{branch} && \
                             git checkout -b {q_branch} --track origin/{branch}",
                            branch = q_branch,
                        );
                        self.runtime.exec(name, &["su", "-", "user", "-c", &cmd]).await
                    };
                    match result {
                        Ok(_) => return Ok(head.head_ref),
                        Err(e) => {
                            warn!(error = %e, "PR head checkout failed, falling back to pull ref");
                        }
                    }
                }

                let branch = format!("pr-{}", target.ref_name);
                let cmd = format!(
                    "cd {q_dir} && git fetch origin pull/{pr}/head:{branch} && git checkout {branch}",
                    pr = target.ref_name,
                );
                self.runtime.exec(name, &["su", "-", "user", "-c", &cmd]).await?;
                Ok(branch)
            }
            TargetKind::Branch => {
                println!("Checking out branch '{}'...", target.ref_name);
                let q_branch = sh_quote(&target.ref_name);
                let cmd = format!("cd {q_dir} && git switch {q_branch}");
                match self.runtime.exec(name, &["su", "-", "user", "-c", &cmd]).await {
                    Ok(_) => Ok(target.ref_name.clone()),
                    Err(e) if target.local_path.is_some() => {
                        // Unpushed local branches only exist in the
                        // mounted reference checkout.
                        warn!(error = %e, "branch not on origin, fetching from the reference");
                        let cmd = format!(
                            "cd {q_dir} && \
                             git fetch /shared/git/{mount} +refs/heads/{branch}:refs/heads/{branch} && \
                             git switch {branch}",
                            mount = sh_quote(mount_name),
                            branch = q_branch,
                        );
                        self.runtime.exec(name, &["su", "-", "user", "-c", &cmd]).await?;
                        Ok(target.ref_name.clone())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            TargetKind::Commit => {
                let display: String = target.ref_name.chars().take(12).collect();
                println!("Checking out commit {display}...");
                let cmd = format!(
                    "cd {q_dir} && git checkout {}",
                    sh_quote(&target.ref_name)
                );
                self.runtime.exec(name, &["su", "-", "user", "-c", &cmd]).await?;
                Ok(String::new())
            }
            TargetKind::Repo => Ok(String::new()),
        }
    }

    /// Apply the allowlist: configured domains, the always-on VS Code
    /// infrastructure set, and whatever the hook contributed.
    async fn apply_network(&self, name: &str, hook: Option<&Hook>) {
        let mut domains = self.config.network.allowlist.clone();
        for domain in VSCODE_NETWORK_DOMAINS {
            if !domains.iter().any(|d| d == domain) {
                domains.push((*domain).to_owned());
            }
        }
        if let Some(hook) = hook {
            for domain in hook.network_domains() {
                if !domains.contains(&domain) {
                    domains.push(domain);
                }
            }
        }
        if domains.is_empty() {
            return;
        }
        match bubble_net::apply_allowlist(self.runtime, name, &domains).await {
            Ok(()) => println!("  Network allowlist applied."),
            Err(e) => println!("  Warning: could not apply network allowlist: {e}"),
        }
    }

    /// Start sshd in the container, install the host's public keys for
    /// `user`, and add the `bubble-<name>` SSH config entry.
    async fn setup_ssh(&self, name: &str) -> anyhow::Result<()> {
        self.runtime
            .exec(name, &["bash", "-c", "service ssh start || /usr/sbin/sshd"])
            .await?;

        let ssh_dir = dirs::home_dir().map(|h| h.join(".ssh"));
        let mut pub_keys = Vec::new();
        if let Some(ssh_dir) = ssh_dir {
            for key_file in ["id_ed25519.pub", "id_rsa.pub", "id_ecdsa.pub"] {
                if let Ok(contents) = std::fs::read_to_string(ssh_dir.join(key_file)) {
                    pub_keys.push(contents.trim().to_owned());
                }
            }
        }
        if !pub_keys.is_empty() {
            self.runtime
                .exec(
                    name,
                    &["su", "-", "user", "-c", "mkdir -p ~/.ssh && chmod 700 ~/.ssh"],
                )
                .await?;
            let tmp = tempfile::NamedTempFile::new()?;
            std::fs::write(tmp.path(), pub_keys.join("\n") + "\n")?;
            self.runtime
                .push_file(
                    name,
                    &tmp.path().to_string_lossy(),
                    "/home/user/.ssh/authorized_keys",
                )
                .await?;
            self.runtime
                .exec(
                    name,
                    &[
                        "bash",
                        "-c",
                        "chown user:user /home/user/.ssh/authorized_keys \
                         && chmod 600 /home/user/.ssh/authorized_keys",
                    ],
                )
                .await?;
        }

        self.ssh.add(name, "user")?;
        Ok(())
    }
}
