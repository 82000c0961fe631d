//! VS Code commit discovery and per-image build markers.
//!
//! Images pre-download the VS Code server matching the host's editor
//! commit. The commit embedded in each published image is recorded in
//! `images.json` so the refresh automation can tell when the host's
//! VS Code moved on and the image is worth rebuilding.

use std::collections::BTreeMap;
use std::process::Stdio;

use bubble_core::fsutil::atomic_write;
use bubble_core::DataDir;
use serde::{Deserialize, Serialize};

/// The commit hash of the locally installed VS Code, when the `code`
/// CLI is on PATH. `code --version` prints version, commit, arch on
/// three lines.
pub async fn host_vscode_commit() -> Option<String> {
    let output = tokio::process::Command::new("code")
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let commit = stdout.lines().nth(1)?.trim();
    if commit.len() == 40 && commit.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(commit.to_owned())
    } else {
        None
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ImagesDocument {
    #[serde(default)]
    images: BTreeMap<String, ImageRecord>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ImageRecord {
    #[serde(default)]
    vscode_commit: String,
}

/// Record the VS Code commit embedded in a freshly published image.
pub fn record_embedded_commit(data_dir: &DataDir, image: &str, commit: &str) {
    let path = data_dir.images_file();
    let mut doc: ImagesDocument = std::fs::read_to_string(&path)
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_default();
    doc.images.insert(
        image.to_owned(),
        ImageRecord {
            vscode_commit: commit.to_owned(),
        },
    );
    if let Ok(content) = serde_json::to_string_pretty(&doc) {
        let _ = atomic_write(&path, &(content + "\n"));
    }
}

/// The VS Code commit recorded for an image, if any.
pub fn embedded_commit(data_dir: &DataDir, image: &str) -> Option<String> {
    let doc: ImagesDocument = std::fs::read_to_string(data_dir.images_file())
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())?;
    doc.images
        .get(image)
        .map(|r| r.vscode_commit.clone())
        .filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        record_embedded_commit(&data, "base", "a".repeat(40).as_str());
        assert_eq!(embedded_commit(&data, "base"), Some("a".repeat(40)));
        assert_eq!(embedded_commit(&data, "lean"), None);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::at(dir.path());
        assert_eq!(embedded_commit(&data, "base"), None);
    }
}
