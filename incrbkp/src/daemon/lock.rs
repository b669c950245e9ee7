//! Single-instance run lock.
//!
//! The lock is a file holding the owner's pid. It is created atomically, so
//! two racing runs cannot both succeed, and removed when the guard drops.
//! A lock left behind by a dead process still blocks new runs; the owner's
//! liveness is only reported in the log.

use crate::utils::LockError;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    released: bool,
}

impl RunLock {
    /// Create the lock file at `path` and record the current pid in it.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let owner = read_owner(path);
                if let Some(pid) = owner.filter(|&pid| !is_alive(pid)) {
                    warn!(pid, lock = %path.display(), "Lock owner is not running; remove the lock file to recover");
                }
                return Err(LockError::AlreadyRunning {
                    path: path.to_path_buf(),
                    owner,
                });
            }
            Err(source) => {
                return Err(LockError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        // Guard first: a failed write must still remove the file.
        let lock = RunLock {
            path: path.to_path_buf(),
            released: false,
        };
        writeln!(file, "{}", std::process::id()).map_err(|source| LockError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(lock = %path.display(), "Lock acquired");
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file.
    pub fn release(mut self) -> io::Result<()> {
        self.released = true;
        remove(&self.path)
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = remove(&self.path) {
            warn!(lock = %self.path.display(), "Failed to remove lock file: {}", e);
        }
    }
}

fn remove(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(lock = %path.display(), "Lock released");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Pid recorded in an existing lock file.
pub fn read_owner(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn is_alive(pid: i32) -> bool {
    // EPERM means the process exists but belongs to someone else.
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}
