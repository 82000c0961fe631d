//! Atomic state-file writes.
//!
//! Every persistent JSON/TOML file is written via a sibling temp file
//! and renamed into place, so concurrent readers never observe a
//! partial write. A missing file is always treated as "empty" by
//! callers.

use std::path::Path;

use crate::error::{Error, Result};

/// Write `contents` to `path` atomically (temp file + rename).
pub fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    atomic_write_with_mode(path, contents, None)
}

/// Atomic write with an optional Unix permission mode (e.g. `0o600`
/// for token files).
pub fn atomic_write_with_mode(path: &Path, contents: &str, mode: Option<u32>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::CreateDir {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents).map_err(|e| Error::StateWrite {
        path: tmp.clone(),
        source: e,
    })?;

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            Error::StateWrite {
                path: tmp.clone(),
                source: e,
            }
        })?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    std::fs::rename(&tmp, path).map_err(|e| Error::StateWrite {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.json");
        atomic_write(&path, "{}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn atomic_write_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        atomic_write(&path, "old").unwrap();
        atomic_write(&path, "new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[cfg(unix)]
    #[test]
    fn atomic_write_sets_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        atomic_write_with_mode(&path, "{}", Some(0o600)).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
