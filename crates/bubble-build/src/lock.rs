//! On-disk build locks.
//!
//! Variant builds may be kicked off by several processes at once (the
//! provision pipeline schedules them in the background). A lock file
//! in a well-known path makes the race visible across processes; locks
//! older than an hour are treated as leftovers from a crashed build
//! and reclaimed.

use std::path::PathBuf;
use std::time::Duration;

const STALE_AFTER: Duration = Duration::from_secs(3600);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("a build is already in progress (lock: {path})")]
    Busy { path: PathBuf },

    #[error("could not create lock {path}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Held for the duration of one background build; the file is removed
/// on drop.
#[derive(Debug)]
pub struct BuildLock {
    path: PathBuf,
}

impl BuildLock {
    /// Acquire the lock at `path`, reclaiming it first when the
    /// existing file is older than one hour.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();

        if let Ok(meta) = std::fs::metadata(&path) {
            let stale = meta
                .modified()
                .ok()
                .and_then(|m| m.elapsed().ok())
                .is_some_and(|age| age > STALE_AFTER);
            if stale {
                tracing::warn!(path = %path.display(), "removing stale build lock");
                let _ = std::fs::remove_file(&path);
            }
        }

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(LockError::Busy { path })
            }
            Err(e) => Err(LockError::Io { path, source: e }),
        }
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.lock");
        {
            let _lock = BuildLock::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn second_acquire_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.lock");
        let _lock = BuildLock::acquire(&path).unwrap();
        assert!(matches!(
            BuildLock::acquire(&path),
            Err(LockError::Busy { .. })
        ));
    }

    #[test]
    fn fresh_lock_is_not_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.lock");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            BuildLock::acquire(&path),
            Err(LockError::Busy { .. })
        ));
    }
}
