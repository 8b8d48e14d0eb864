//! Single-instance advisory lock.
//!
//! Mutating commands take a PID-file lock so two invocations never
//! interleave promote/destroy graph repairs. The file records the owning
//! PID; a file left behind by a dead process is reclaimed.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context as AnyhowContext, Result, bail};
use log::{debug, warn};

const LOCK_FILE: &str = "zedenv.pid";
const LOCK_DIR_ENV: &str = "ZEDENV_LOCK_DIR";

/// Held for the duration of a mutating command, released on drop.
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    /// Take the system-wide lock, reclaiming it from a dead owner.
    ///
    /// The lock file lives in `/run` unless `ZEDENV_LOCK_DIR` points
    /// elsewhere.
    pub fn acquire() -> Result<Self> {
        let dir = std::env::var_os(LOCK_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/run"));
        Self::acquire_in(dir)
    }

    fn acquire_in(dir: PathBuf) -> Result<Self> {
        let path = dir.join(LOCK_FILE);

        match fs::read_to_string(&path) {
            Ok(contents) => {
                let owner = contents.trim().parse::<i32>().ok();
                if let Some(pid) = owner.filter(|&pid| process_alive(pid)) {
                    bail!("zedenv is already running under PID {pid}.");
                }
                debug!("Reclaiming stale lock file {}", path.display());
                fs::remove_file(&path).with_context(|| {
                    format!("Failed to remove stale lock file {}", path.display())
                })?;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read lock file {}", path.display()));
            }
        }

        let pid = std::process::id();
        fs::write(&path, format!("{pid}\n"))
            .with_context(|| format!("Failed to write lock file {}", path.display()))?;
        debug!("Holding {} as PID {pid}", path.display());

        Ok(Self { path })
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!("Failed to remove lock file {}: {err}", self.path.display());
            }
        }
    }
}

/// Probe a PID for liveness without sending a signal.
fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs existence and permission checks only.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // EPERM means the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_writes_pid_and_drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);

        let lock = ProcessLock::acquire_in(dir.path().to_path_buf()).unwrap();
        let recorded = fs::read_to_string(&path).unwrap();
        assert_eq!(recorded.trim(), std::process::id().to_string());

        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_acquire_fails_while_owner_alive() {
        let dir = tempfile::tempdir().unwrap();
        // Our own PID is certainly alive.
        fs::write(dir.path().join(LOCK_FILE), format!("{}\n", std::process::id())).unwrap();

        let err = ProcessLock::acquire_in(dir.path().to_path_buf()).unwrap_err();
        assert!(err.to_string().contains("already running"));
        // A failed acquire must not remove the owner's file.
        assert!(dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_acquire_reclaims_stale_lock() {
        let dir = tempfile::tempdir().unwrap();
        // Larger than any kernel pid_max, so never a live process.
        fs::write(dir.path().join(LOCK_FILE), format!("{}\n", i32::MAX)).unwrap();

        let lock = ProcessLock::acquire_in(dir.path().to_path_buf()).unwrap();
        let recorded = fs::read_to_string(dir.path().join(LOCK_FILE)).unwrap();
        assert_eq!(recorded.trim(), std::process::id().to_string());
        drop(lock);
    }

    #[test]
    fn test_acquire_reclaims_garbage_lock() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOCK_FILE), "not a pid\n").unwrap();

        assert!(ProcessLock::acquire_in(dir.path().to_path_buf()).is_ok());
    }
}
