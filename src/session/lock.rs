//! Exclusive hold on the sensor and audio output.
//!
//! A lock file in the data directory marks a running session. A second
//! session finds it and refuses to start instead of fighting over the
//! devices. The file is removed when the lock drops.

use crate::error::{Result, SessionError};
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LOCK_FILE: &str = ".session.lock";

#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
}

impl SessionLock {
    /// Take the lock in `dir`.
    ///
    /// A lock left behind by a crashed session has to be deleted by hand;
    /// the error names the file.
    pub fn acquire(dir: &Path, holder: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Self::claim(dir.join(LOCK_FILE), |file| {
            writeln!(file, "pid={}\nholder={holder}", std::process::id())
        })
    }

    /// Create the lock file and fill it in. The lock owns the file from the
    /// moment it exists, so a failed write removes it again.
    fn claim(path: PathBuf, write: impl FnOnce(&mut File) -> io::Result<()>) -> Result<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(SessionError::AlreadyRunning(path));
            }
            Err(e) => return Err(e.into()),
        };
        let lock = Self { path };
        write(&mut file)?;
        debug!(path = %lock.path.display(), "session lock acquired");

        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not remove session lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let dir = tempfile::tempdir().unwrap();

        let lock = SessionLock::acquire(dir.path(), "first").unwrap();
        assert!(matches!(
            SessionLock::acquire(dir.path(), "second"),
            Err(SessionError::AlreadyRunning(_))
        ));

        drop(lock);
        assert!(SessionLock::acquire(dir.path(), "third").is_ok());
    }

    #[test]
    fn test_failed_write_leaves_no_lock_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);

        let result = SessionLock::claim(path.clone(), |_| Err(ErrorKind::WriteZero.into()));
        assert!(matches!(result, Err(SessionError::Io(_))));
        assert!(!path.exists());

        assert!(SessionLock::acquire(dir.path(), "retry").is_ok());
    }
}
