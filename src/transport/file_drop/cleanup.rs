//! Retention cleanup for message files.
//!
//! Every send schedules one delayed pass over its channel directory. Passes
//! from all processes on the machine are serialized by a named mutex in the
//! base directory; a pass that cannot get the lock in time is skipped, since
//! the process holding it is doing the same work.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use super::{has_extension, CLEANUP_LOCK_NAME, MESSAGE_EXTENSION, TEMP_EXTENSION};
use crate::config::FileDropConfig;
use crate::sync::{LockOutcome, NamedMutex};

/// Extra delay after the retention window so scheduled files are strictly older.
const SCHEDULE_SLACK: Duration = Duration::from_millis(500);

/// How long a pass waits for another process's pass to finish.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Deletes expired message files and stale channel directories.
pub struct DirectoryCleaner {
    base_path: PathBuf,
    retention: Duration,
    stale_age: Duration,
    mutex: NamedMutex,
}

impl DirectoryCleaner {
    pub fn new(config: &FileDropConfig) -> Self {
        Self {
            base_path: config.base_path.clone(),
            retention: config.retention(),
            stale_age: config.stale_directory_age(),
            mutex: NamedMutex::at(config.base_path.join(CLEANUP_LOCK_NAME)),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Clean `dir` once the retention window has passed.
    ///
    /// Requires a tokio runtime; without one the pass is left to the next
    /// construction-time sweep.
    pub fn schedule(self: &Arc<Self>, dir: PathBuf) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(dir = %dir.display(), "No runtime; cleanup deferred to next sweep");
            return;
        };
        let cleaner = Arc::clone(self);
        handle.spawn(async move {
            tokio::time::sleep(cleaner.retention + SCHEDULE_SLACK).await;
            let result = tokio::task::spawn_blocking(move || cleaner.clean_locked(&dir)).await;
            if let Err(e) = result {
                warn!(error = %e, "Cleanup task failed");
            }
        });
    }

    /// Sweep every channel directory, in the background when a runtime exists.
    pub fn sweep_in_background(self: &Arc<Self>) {
        let cleaner = Arc::clone(self);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || cleaner.sweep());
            }
            Err(_) => {
                cleaner.sweep();
            }
        }
    }

    /// Clean every channel directory and remove stale empty ones.
    ///
    /// Returns the number of message files deleted.
    pub fn sweep(&self) -> usize {
        let Some(_guard) = self.lock() else {
            return 0;
        };
        let entries = match std::fs::read_dir(&self.base_path) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut deleted = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            deleted += clean_directory(&path, self.retention);
            if is_stale_and_empty(&path, self.stale_age) {
                match std::fs::remove_dir(&path) {
                    Ok(()) => debug!(dir = %path.display(), "Removed stale channel directory"),
                    Err(e) => debug!(dir = %path.display(), error = %e, "Stale directory kept"),
                }
            }
        }

        if deleted > 0 {
            info!(deleted, base = %self.base_path.display(), "File-drop sweep removed expired messages");
        }
        deleted
    }

    fn clean_locked(&self, dir: &Path) -> usize {
        match self.lock() {
            Some(_guard) => clean_directory(dir, self.retention),
            None => 0,
        }
    }

    fn lock(&self) -> Option<crate::sync::NamedMutexGuard> {
        match self.mutex.acquire(LOCK_TIMEOUT, None) {
            Ok(LockOutcome::Acquired(guard)) | Ok(LockOutcome::Abandoned(guard)) => Some(guard),
            Ok(LockOutcome::TimedOut) => {
                debug!(lock = %self.mutex.path().display(), "Cleanup lock busy, skipping pass");
                None
            }
            Ok(LockOutcome::Interrupted) => None,
            Err(e) => {
                warn!(lock = %self.mutex.path().display(), error = %e, "Cleanup lock unavailable");
                None
            }
        }
    }
}

/// Delete message and temp files in `dir` older than `retention`.
///
/// Files that vanish or cannot be deleted are skipped silently. Returns the
/// number of files deleted.
pub(crate) fn clean_directory(dir: &Path, retention: Duration) -> usize {
    let Some(cutoff) = SystemTime::now().checked_sub(retention) else {
        return 0;
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    let mut deleted = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !has_extension(&path, MESSAGE_EXTENSION) && !has_extension(&path, TEMP_EXTENSION) {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if modified <= cutoff && std::fs::remove_file(&path).is_ok() {
            deleted += 1;
        }
    }
    deleted
}

fn is_stale_and_empty(dir: &Path, stale_age: Duration) -> bool {
    let empty = std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if !empty {
        return false;
    }
    std::fs::metadata(dir)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > stale_age)
}
