//! Per-file append lock.
//!
//! A sibling `<file>.lock` created with create-new semantics. Holding the
//! guard grants exclusive append rights to one ledger file; dropping it
//! removes the lock file.

use chrono::Utc;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::ledger::LedgerError;

/// Attempts before an append gives up with `LockBusy`.
pub const LOCK_ATTEMPTS: u32 = 40;
const LOCK_BACKOFF: Duration = Duration::from_millis(25);

pub fn lock_path(path: &Path) -> PathBuf {
    let mut lock: OsString = path.as_os_str().to_os_string();
    lock.push(".lock");
    PathBuf::from(lock)
}

pub(crate) struct FileLockGuard {
    lock_path: PathBuf,
    _file: File,
}

impl FileLockGuard {
    /// Acquire the lock for `path`, retrying with a short backoff. Blocks the
    /// calling thread; async callers append from the blocking pool.
    pub(crate) fn acquire(path: &Path) -> Result<Self, LedgerError> {
        let lock_path = lock_path(path);
        for attempt in 1..=LOCK_ATTEMPTS {
            match Self::try_acquire(&lock_path)? {
                Some(guard) => return Ok(guard),
                None if attempt < LOCK_ATTEMPTS => std::thread::sleep(LOCK_BACKOFF),
                None => {}
            }
        }
        warn!(lock = %lock_path.display(), attempts = LOCK_ATTEMPTS, "ledger lock still busy");
        Err(LedgerError::LockBusy {
            lock_path: lock_path.display().to_string(),
        })
    }

    fn try_acquire(lock_path: &Path) -> Result<Option<Self>, LedgerError> {
        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent.display(), e))?;
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(mut file) => {
                let _ = writeln!(
                    file,
                    "pid={}\nutc={}",
                    std::process::id(),
                    Utc::now().to_rfc3339()
                );
                Ok(Some(Self {
                    lock_path: lock_path.to_path_buf(),
                    _file: file,
                }))
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(LedgerError::io(lock_path.display(), err)),
        }
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "folio-lock-{prefix}-{}-{unique}.jsonl",
            std::process::id()
        ))
    }

    #[test]
    fn held_lock_reports_busy_and_releases_on_drop() {
        let path = temp_path("busy");
        let guard = FileLockGuard::acquire(&path).expect("first acquire");
        assert!(lock_path(&path).exists());
        assert!(
            FileLockGuard::try_acquire(&lock_path(&path))
                .expect("no io error")
                .is_none()
        );
        drop(guard);
        assert!(!lock_path(&path).exists());
        let again = FileLockGuard::acquire(&path).expect("reacquire after drop");
        drop(again);
    }
}
