use std::process::Stdio;
use std::time::Duration;

use bubble_core::DataDir;
use bubble_runtime::{wait_for_container, ContainerRuntime, RuntimeError};
use tracing::info;

use crate::lock::{BuildLock, LockError};
use crate::vscode::{host_vscode_commit, record_embedded_commit};

const BASE_SCRIPT: &str = include_str!("../scripts/base.sh");
const LEAN_SCRIPT: &str = include_str!("../scripts/lean.sh");
const LEAN_TOOLCHAIN_SCRIPT: &str = include_str!("../scripts/lean-toolchain.sh");

const READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Image hierarchy. A parent is either another entry (built
/// recursively) or an Incus remote image.
struct ImageSpec {
    name: &'static str,
    script: &'static str,
    parent: &'static str,
}

const IMAGES: &[ImageSpec] = &[
    ImageSpec {
        name: "base",
        script: BASE_SCRIPT,
        parent: "images:ubuntu/24.04",
    },
    ImageSpec {
        name: "lean",
        script: LEAN_SCRIPT,
        parent: "base",
    },
];

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("unknown image: {name}. Available: {available}")]
    UnknownImage { name: String, available: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("could not spawn background build")]
    Spawn { source: std::io::Error },
}

fn spec(name: &str) -> Option<&'static ImageSpec> {
    IMAGES.iter().find(|s| s.name == name)
}

/// Names of all declaratively known images, in build order.
pub fn image_names() -> Vec<&'static str> {
    IMAGES.iter().map(|s| s.name).collect()
}

/// Build a declared image by name, building its parent first when it
/// is also declared and absent from the runtime.
pub async fn build_image<R: ContainerRuntime>(
    runtime: &R,
    data_dir: &DataDir,
    image_name: &str,
) -> Result<(), BuildError> {
    let spec = spec(image_name).ok_or_else(|| BuildError::UnknownImage {
        name: image_name.to_owned(),
        available: image_names().join(", "),
    })?;

    if let Some(parent) = IMAGES.iter().find(|s| s.name == spec.parent) {
        if !runtime.image_exists(parent.name).await? {
            Box::pin(build_image(runtime, data_dir, parent.name)).await?;
        }
    }

    let builder = format!("{image_name}-builder");
    info!(image = image_name, "building image");

    // A leftover builder from a crashed run would make launch fail.
    let _ = runtime.delete(&builder, true).await;

    runtime.launch(&builder, spec.parent).await?;
    wait_for_container(runtime, &builder, READY_TIMEOUT).await?;

    let commit = host_vscode_commit().await;
    let script = match &commit {
        Some(commit) => format!("export VSCODE_COMMIT='{commit}'\n{}", spec.script),
        None => spec.script.to_owned(),
    };
    runtime.exec(&builder, &["bash", "-c", &script]).await?;

    runtime.stop(&builder).await?;
    runtime.publish(&builder, image_name).await?;
    runtime.delete(&builder, false).await?;

    if let Some(commit) = commit {
        record_embedded_commit(data_dir, image_name, &commit);
    }

    info!(image = image_name, "image built");
    Ok(())
}

/// Filesystem-safe form of a toolchain version string.
pub fn sanitize_toolchain_version(version: &str) -> String {
    version.replace(['/', ':'], "-")
}

/// Build the `lean-<version>` variant image with the given toolchain
/// pre-installed. Guarded by an on-disk lock so concurrent processes
/// build each variant at most once.
pub async fn build_lean_toolchain_image<R: ContainerRuntime>(
    runtime: &R,
    data_dir: &DataDir,
    version: &str,
) -> Result<(), BuildError> {
    let sanitized = sanitize_toolchain_version(version);
    let lock_path = std::env::temp_dir().join(format!("bubble-lean-{sanitized}.lock"));
    let _lock = BuildLock::acquire(lock_path)?;

    if !runtime.image_exists("lean").await? {
        build_image(runtime, data_dir, "lean").await?;
    }

    let builder = format!("lean-tc-{sanitized}-builder");
    let alias = format!("lean-{version}");
    info!(image = %alias, "building toolchain variant");

    let _ = runtime.delete(&builder, true).await;
    runtime.launch(&builder, "lean").await?;
    wait_for_container(runtime, &builder, READY_TIMEOUT).await?;

    // The toolchain version reaches elan through the environment; the
    // version string was validated by the hook's toolchain parse.
    let script = format!(
        "export LEAN_TOOLCHAIN='{version}'\n{LEAN_TOOLCHAIN_SCRIPT}"
    );
    runtime.exec(&builder, &["bash", "-c", &script]).await?;

    runtime.stop(&builder).await?;
    runtime.publish(&builder, &alias).await?;
    runtime.delete(&builder, false).await?;

    info!(image = %alias, "toolchain variant built");
    Ok(())
}

/// Kick off a toolchain variant build in a detached child process
/// running this same binary, with output captured to a log file under
/// the data directory. Concurrency is coordinated by the on-disk lock
/// inside the build itself.
pub fn spawn_background_toolchain_build(
    data_dir: &DataDir,
    version: &str,
) -> Result<(), BuildError> {
    let exe = std::env::current_exe().map_err(|e| BuildError::Spawn { source: e })?;
    let sanitized = sanitize_toolchain_version(version);
    let log_path = data_dir.build_log(&format!("lean-{sanitized}"));
    let log = std::fs::File::create(&log_path).map_err(|e| BuildError::Spawn { source: e })?;
    let log_err = log.try_clone().map_err(|e| BuildError::Spawn { source: e })?;

    info!(version, log = %log_path.display(), "scheduling background toolchain build");
    std::process::Command::new(exe)
        .args(["images", "build-toolchain", version])
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .spawn()
        .map_err(|e| BuildError::Spawn { source: e })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bubble_runtime::{ContainerInfo, ImageInfo};
    use mockall::mock;

    mock! {
        Runtime {}

        impl ContainerRuntime for Runtime {
            async fn is_available(&self) -> bool;
            async fn launch(&self, name: &str, image: &str) -> Result<ContainerInfo, RuntimeError>;
            async fn list_containers(&self, fast: bool) -> Result<Vec<ContainerInfo>, RuntimeError>;
            async fn start(&self, name: &str) -> Result<(), RuntimeError>;
            async fn stop(&self, name: &str) -> Result<(), RuntimeError>;
            async fn freeze(&self, name: &str) -> Result<(), RuntimeError>;
            async fn unfreeze(&self, name: &str) -> Result<(), RuntimeError>;
            async fn delete(&self, name: &str, force: bool) -> Result<(), RuntimeError>;
            async fn exec<'a, 'b>(&self, name: &str, command: &'a [&'b str]) -> Result<String, RuntimeError>;
            async fn add_device<'a, 'b, 'c>(
                &self,
                name: &str,
                device_name: &str,
                device_type: &str,
                props: &'a [(&'b str, &'c str)],
            ) -> Result<(), RuntimeError>;
            async fn add_disk(
                &self,
                name: &str,
                device_name: &str,
                source: &str,
                path: &str,
                readonly: bool,
            ) -> Result<(), RuntimeError>;
            async fn publish(&self, name: &str, alias: &str) -> Result<(), RuntimeError>;
            async fn image_exists(&self, alias: &str) -> Result<bool, RuntimeError>;
            async fn image_delete(&self, alias: &str) -> Result<(), RuntimeError>;
            async fn list_images(&self) -> Result<Vec<ImageInfo>, RuntimeError>;
            async fn push_file(
                &self,
                name: &str,
                local_path: &str,
                remote_path: &str,
            ) -> Result<(), RuntimeError>;
            async fn bridge_address(&self) -> Result<Option<String>, RuntimeError>;
        }
    }

    fn running(name: &str) -> ContainerInfo {
        ContainerInfo {
            name: name.to_owned(),
            state: bubble_runtime::ContainerState::Running,
            ipv4: None,
            image: None,
            disk_usage: None,
            created_at: None,
            last_used_at: None,
        }
    }

    #[tokio::test]
    async fn unknown_image_lists_available() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        let mock = MockRuntime::new();
        let err = build_image(&mock, &data, "nonsense").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Unknown image"));
        assert!(msg.contains("base"));
        assert!(msg.contains("lean"));
    }

    #[tokio::test]
    async fn builds_base_image_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        let mut mock = MockRuntime::new();

        // Stale builder cleanup (allowed to fail).
        mock.expect_delete()
            .withf(|name, force| name == "base-builder" && *force)
            .returning(|_, _| Ok(()));
        mock.expect_launch()
            .withf(|name, image| name == "base-builder" && image == "images:ubuntu/24.04")
            .returning(|name, _| Ok(running(name)));
        // Readiness probe + setup script.
        mock.expect_exec()
            .returning(|_, _| Ok(String::new()));
        mock.expect_stop()
            .withf(|name| name == "base-builder")
            .returning(|_| Ok(()));
        mock.expect_publish()
            .withf(|name, alias| name == "base-builder" && alias == "base")
            .returning(|_, _| Ok(()));
        mock.expect_delete()
            .withf(|name, force| name == "base-builder" && !*force)
            .returning(|_, _| Ok(()));

        build_image(&mock, &data, "base").await.unwrap();
    }

    #[tokio::test]
    async fn lean_build_recurses_into_missing_base() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        let mut mock = MockRuntime::new();

        mock.expect_image_exists()
            .withf(|alias| alias == "base")
            .returning(|_| Ok(false));
        mock.expect_delete().returning(|_, _| Ok(()));
        mock.expect_launch()
            .withf(|name, image| {
                (name == "base-builder" && image == "images:ubuntu/24.04")
                    || (name == "lean-builder" && image == "base")
            })
            .returning(|name, _| Ok(running(name)));
        mock.expect_exec().returning(|_, _| Ok(String::new()));
        mock.expect_stop().returning(|_| Ok(()));
        mock.expect_publish().returning(|_, _| Ok(()));

        build_image(&mock, &data, "lean").await.unwrap();
    }

    #[test]
    fn sanitizes_toolchain_versions() {
        assert_eq!(
            sanitize_toolchain_version("leanprover/lean4:v4.27.0"),
            "leanprover-lean4-v4.27.0"
        );
        assert_eq!(sanitize_toolchain_version("v4.27.0"), "v4.27.0");
    }
}
