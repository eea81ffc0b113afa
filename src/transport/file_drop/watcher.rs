//! Polling directory watcher.
//!
//! Scans one directory every tick and reports `.msg` files that appeared or
//! whose size or modification time changed. Files present when the watcher
//! starts are treated as already seen.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::{has_extension, MESSAGE_EXTENSION};

/// What happened to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Changed,
}

/// A change to one message file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

type Snapshot = HashMap<PathBuf, (u64, SystemTime)>;

/// Watches one directory until stopped or dropped.
pub struct DirectoryWatcher {
    path: PathBuf,
    enabled: Arc<AtomicBool>,
    cancel: watch::Sender<bool>,
}

impl DirectoryWatcher {
    /// Start watching `dir`, creating it if needed. Events go to `events`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(
        dir: impl Into<PathBuf>,
        interval: Duration,
        events: mpsc::UnboundedSender<WatchEvent>,
    ) -> io::Result<Self> {
        let path = dir.into();
        super::ensure_shared_directory(&path)?;
        let mut seen = scan(&path);

        let enabled = Arc::new(AtomicBool::new(true));
        let (cancel, mut cancel_rx) = watch::channel(false);

        let task_enabled = Arc::clone(&enabled);
        let task_path = path.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let dir = task_path.clone();
                let current = match tokio::task::spawn_blocking(move || scan(&dir)).await {
                    Ok(current) => current,
                    Err(e) => {
                        warn!(dir = %task_path.display(), error = %e, "Directory scan failed");
                        continue;
                    }
                };

                let deliver = task_enabled.load(Ordering::SeqCst);
                for (file, stamp) in &current {
                    let kind = match seen.get(file) {
                        None => WatchEventKind::Created,
                        Some(previous) if previous != stamp => WatchEventKind::Changed,
                        Some(_) => continue,
                    };
                    if deliver
                        && events
                            .send(WatchEvent {
                                kind,
                                path: file.clone(),
                            })
                            .is_err()
                    {
                        debug!(dir = %task_path.display(), "Watch receiver gone");
                        return;
                    }
                }
                seen = current;
            }
            debug!(dir = %task_path.display(), "Directory watcher stopped");
        });

        Ok(Self {
            path,
            enabled,
            cancel,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raise or suppress event delivery. The watcher keeps scanning either way.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Stop the background scan.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn scan(dir: &Path) -> Snapshot {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Snapshot::new();
    };
    entries
        .flatten()
        .filter(|entry| has_extension(&entry.path(), MESSAGE_EXTENSION))
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            let modified = metadata.modified().ok()?;
            Some((entry.path(), (metadata.len(), modified)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::time::timeout;

    const TICK: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_reports_new_message_files() {
        let temp = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = DirectoryWatcher::spawn(temp.path(), TICK, tx).unwrap();

        let file = temp.path().join("a.msg");
        std::fs::write(&file, "payload").unwrap();
        std::fs::write(temp.path().join("ignored.tmp"), "x").unwrap();

        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, WatchEventKind::Created);
        assert_eq!(event.path, file);
        assert!(timeout(TICK * 5, rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_existing_files_are_not_reported() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("before.msg"), "x").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = DirectoryWatcher::spawn(temp.path(), TICK, tx).unwrap();

        assert!(timeout(TICK * 5, rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_watcher_suppresses_events() {
        let temp = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = DirectoryWatcher::spawn(temp.path(), TICK, tx).unwrap();

        watcher.set_enabled(false);
        std::fs::write(temp.path().join("quiet.msg"), "x").unwrap();
        assert!(timeout(TICK * 5, rx.recv()).await.is_err());

        watcher.set_enabled(true);
        std::fs::write(temp.path().join("loud.msg"), "x").unwrap();
        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(event.path.ends_with("loud.msg"));
    }

    #[tokio::test]
    async fn test_stop_closes_event_stream() {
        let temp = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = DirectoryWatcher::spawn(temp.path(), TICK, tx).unwrap();

        drop(watcher);

        let closed = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(closed.is_none());
    }
}
