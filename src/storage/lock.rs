//! Exclusive lock on a backup destination
//!
//! The lock is a file created with `create_new`; whoever creates it owns the
//! destination until the guard is dropped. The file records the holder's pid,
//! so a lock left behind by a killed process is taken over instead of
//! blocking the destination forever. Contention with a live holder fails
//! immediately and is left to the caller to retry.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{BackupError, BackupResult};

/// Guard holding a destination lock; released on drop
#[derive(Debug)]
pub struct DestinationLock {
    path: PathBuf,
}

impl DestinationLock {
    /// Acquire the lock at `path`, taking over a lock whose holder has exited
    pub fn acquire(path: &Path) -> BackupResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if let Some(lock) = Self::try_create(path)? {
            return Ok(lock);
        }

        let holder = read_holder(path);
        if holder_is_gone(&holder) {
            // Only remove the lock we judged stale, not one that replaced it
            if read_holder(path) == holder {
                warn!("Taking over stale lock {} ({})", path.display(), holder);
                match fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(BackupError::Io(format!(
                            "Failed to remove stale lock {}: {}",
                            path.display(),
                            e
                        )));
                    }
                }
            }
            if let Some(lock) = Self::try_create(path)? {
                return Ok(lock);
            }
        }

        Err(BackupError::LockContention {
            lock_path: path.to_path_buf(),
            holder: read_holder(path),
        })
    }

    /// `None` when the lock file already exists
    fn try_create(path: &Path) -> BackupResult<Option<Self>> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "pid {} since {}", std::process::id(), Utc::now().to_rfc3339())?;
                debug!("Acquired destination lock {}", path.display());
                Ok(Some(Self {
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(BackupError::Io(format!(
                "Failed to create lock file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_holder(path: &Path) -> String {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown holder".to_string())
}

/// Pid recorded in a lock file written by `try_create`
fn holder_pid(holder: &str) -> Option<u32> {
    holder.strip_prefix("pid ")?.split_whitespace().next()?.parse().ok()
}

/// The recorded holder is known to have exited
///
/// An unreadable holder line counts as alive.
fn holder_is_gone(holder: &str) -> bool {
    holder_pid(holder).map_or(false, |pid| !process_alive(pid))
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return true;
    }
    // Signal 0 only checks that the process exists
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Drop for DestinationLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
        debug!("Released destination lock {}", self.path.display());
    }
}
