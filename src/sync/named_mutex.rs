//! Cross-process named mutex.
//!
//! Uses `fs2` file locks (flock on Unix, LockFile on Windows) on a lock file
//! whose path is the mutex name. The owner writes its PID into the file and
//! truncates it on release; a non-empty file at acquisition time means the
//! previous owner exited without releasing (abandoned). Abandonment is
//! reported, not treated as failure.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, warn};

/// Delay between lock attempts.
const RETRY_DELAY: Duration = Duration::from_millis(25);

/// Result of a bounded acquisition attempt.
pub enum LockOutcome {
    /// Lock held until the guard is dropped.
    Acquired(NamedMutexGuard),
    /// Previous owner never released; the lock is now held by us.
    Abandoned(NamedMutexGuard),
    /// Another process kept the lock for the whole wait.
    TimedOut,
    /// The wait was interrupted by the caller.
    Interrupted,
}

impl LockOutcome {
    /// The guard, if the lock is now held (acquired or taken over after abandonment).
    pub fn into_guard(self) -> Option<NamedMutexGuard> {
        match self {
            LockOutcome::Acquired(g) | LockOutcome::Abandoned(g) => Some(g),
            LockOutcome::TimedOut | LockOutcome::Interrupted => None,
        }
    }
}

/// A mutex visible to every process on the machine that uses the same path.
#[derive(Debug, Clone)]
pub struct NamedMutex {
    path: PathBuf,
}

impl NamedMutex {
    /// Mutex backed by the lock file at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to take the lock, waiting at most `timeout`.
    ///
    /// Not reentrant: a second acquisition from the same process waits like
    /// any other contender. Setting `interrupt` aborts the wait.
    pub fn acquire(&self, timeout: Duration, interrupt: Option<&AtomicBool>) -> io::Result<LockOutcome> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let deadline = Instant::now() + timeout;

        loop {
            if interrupt.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                return Ok(LockOutcome::Interrupted);
            }

            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&self.path)?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    let abandoned = Self::read_owner(&file)?.is_some();
                    let guard = NamedMutexGuard::claim(file, self.path.clone())?;
                    if abandoned {
                        warn!(path = %self.path.display(), "Named mutex was abandoned by its previous owner");
                        return Ok(LockOutcome::Abandoned(guard));
                    }
                    debug!(path = %self.path.display(), "Named mutex acquired");
                    return Ok(LockOutcome::Acquired(guard));
                }
                Err(_) => {
                    drop(file);
                    if Instant::now() >= deadline {
                        return Ok(LockOutcome::TimedOut);
                    }
                    std::thread::sleep(RETRY_DELAY);
                }
            }
        }
    }

    fn read_owner(mut file: &File) -> io::Result<Option<u32>> {
        let mut contents = String::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_string(&mut contents)?;
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        Ok(Some(trimmed.parse().unwrap_or(0)))
    }
}

/// Held lock. Releasing truncates the owner record, then unlocks.
pub struct NamedMutexGuard {
    file: File,
    path: PathBuf,
}

impl NamedMutexGuard {
    fn claim(mut file: File, path: PathBuf) -> io::Result<Self> {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        file.sync_all()?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NamedMutexGuard {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = self.file.unlock();
    }
}
