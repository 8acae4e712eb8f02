//! Cross-process mutual exclusion for destructive operations.
//!
//! [`ConcurrencyGuard`] is the seam: callers only ever go through [`hold`], which
//! returns an RAII [`Held`] value that releases on every exit path. [`FileLock`]
//! is the default backend, an exclusive advisory lock on a file in the data
//! directory, polled until a deadline.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{MemoryError, Result};

/// Lock file name inside the data directory.
pub const LOCK_FILE: &str = ".manage.lock";

/// Default interval between acquisition attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A mutual-exclusion primitive shared by independent processes.
pub trait ConcurrencyGuard {
    /// Try to take the lock, waiting up to the configured timeout.
    ///
    /// Returns `Ok(false)` on timeout. Errors are reserved for failures that are
    /// not contention (permissions, missing filesystem, ...).
    fn acquire(&mut self) -> Result<bool>;

    /// Release the lock. Safe to call when not held.
    fn release(&mut self);

    fn lock_path(&self) -> &Path;

    fn timeout(&self) -> Duration;
}

/// Scoped ownership of an acquired guard. Dropping it releases the lock.
#[must_use = "the lock is released as soon as this value is dropped"]
pub struct Held<'a, G: ConcurrencyGuard + ?Sized> {
    guard: &'a mut G,
}

impl<G: ConcurrencyGuard + ?Sized> Drop for Held<'_, G> {
    fn drop(&mut self) {
        self.guard.release();
    }
}

/// Acquire `guard` or fail with [`MemoryError::LockTimeout`].
pub fn hold<G: ConcurrencyGuard + ?Sized>(guard: &mut G) -> Result<Held<'_, G>> {
    if guard.acquire()? {
        Ok(Held { guard })
    } else {
        Err(MemoryError::LockTimeout {
            path: guard.lock_path().to_path_buf(),
            timeout: guard.timeout(),
        })
    }
}

/// Exclusive advisory lock on a file (`flock` on Unix).
///
/// Two `FileLock`s on the same path in one process use separate open file
/// descriptions, so whether the second blocks is platform-dependent.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
    file: Option<File>,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            file: None,
        }
    }

    /// The lock guarding a data directory.
    pub fn for_data_dir(data_dir: &Path, config: &crate::config::LockConfig) -> Self {
        Self::new(data_dir.join(LOCK_FILE), config.timeout()).with_poll_interval(config.poll_interval())
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    fn open(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MemoryError::io("create lock directory", parent, e))?;
        }
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| MemoryError::io("open lock file", &self.path, e))
    }
}

impl ConcurrencyGuard for FileLock {
    fn acquire(&mut self) -> Result<bool> {
        if self.file.is_some() {
            return Ok(true);
        }

        let mut file = self.open()?;
        // `None` only when the deadline is beyond what `Instant` can represent.
        let deadline = Instant::now().checked_add(self.timeout);

        loop {
            let locked = try_lock_exclusive(&file)
                .map_err(|e| MemoryError::io("lock", &self.path, e))?;
            if locked {
                record_holder(&mut file).map_err(|e| MemoryError::io("write lock holder", &self.path, e))?;
                tracing::debug!(path = %self.path.display(), "lock acquired");
                self.file = Some(file);
                return Ok(true);
            }

            let now = Instant::now();
            let remaining = deadline.map_or(self.poll_interval, |d| d.saturating_duration_since(now));
            if remaining.is_zero() {
                tracing::warn!(
                    path = %self.path.display(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "lock acquisition timed out"
                );
                return Ok(false);
            }
            std::thread::sleep(self.poll_interval.min(remaining));
        }
    }

    fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = unlock(&file) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to unlock");
            }
            tracing::debug!(path = %self.path.display(), "lock released");
        }
    }

    fn lock_path(&self) -> &Path {
        &self.path
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Overwrite the lock file with the holder's pid.
fn record_holder(file: &mut File) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{}", std::process::id())?;
    file.flush()
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EACCES) {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: see `try_lock_exclusive`.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    match file.try_lock() {
        Ok(()) => Ok(true),
        Err(std::fs::TryLockError::WouldBlock) => Ok(false),
        Err(std::fs::TryLockError::Error(e)) => Err(e),
    }
}

#[cfg(not(unix))]
fn unlock(file: &File) -> io::Result<()> {
    file.unlock()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn unrepresentable_deadline_does_not_panic() {
        let tmp = TempDir::new().unwrap();
        let mut lock = FileLock::new(tmp.path().join(LOCK_FILE), Duration::MAX);
        assert!(lock.acquire().unwrap());
        lock.release();
    }

    #[test]
    fn acquire_writes_pid_and_release_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(LOCK_FILE);
        let mut lock = FileLock::new(&path, Duration::from_secs(1));

        assert!(lock.acquire().unwrap());
        assert!(lock.is_held());
        let pid = std::fs::read_to_string(&path).unwrap();
        assert_eq!(pid, std::process::id().to_string());

        lock.release();
        lock.release();
        assert!(!lock.is_held());
    }

    #[test]
    fn release_without_acquire_is_safe() {
        let tmp = TempDir::new().unwrap();
        let mut lock = FileLock::new(tmp.path().join(LOCK_FILE), Duration::from_secs(1));
        lock.release();
    }

    #[test]
    fn creates_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("sub").join("dir").join(LOCK_FILE);
        let mut lock = FileLock::new(&nested, Duration::from_secs(1));
        {
            let _held = hold(&mut lock).unwrap();
            assert!(nested.is_file());
        }
        assert!(!lock.is_held());
    }

    #[test]
    fn held_releases_on_error_path() {
        fn fails_while_holding(lock: &mut FileLock) -> Result<()> {
            let _held = hold(lock)?;
            Err(MemoryError::invalid_input("boom"))
        }

        let tmp = TempDir::new().unwrap();
        let mut lock = FileLock::new(tmp.path().join(LOCK_FILE), Duration::from_secs(1));
        assert!(fails_while_holding(&mut lock).is_err());
        assert!(!lock.is_held());

        // The lock can be taken again by another handle.
        let mut other = FileLock::new(tmp.path().join(LOCK_FILE), Duration::from_millis(200));
        assert!(other.acquire().unwrap());
    }
}
