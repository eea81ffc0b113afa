//! Machine-wide named counter.
//!
//! Counts how many local registrations share one long-lived cloud queue.
//! The count lives in a small file guarded by an exclusive `fs2` lock, so
//! increments and decrements are atomic across processes, not just threads.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Named counter shared by every process on the machine.
#[derive(Debug, Clone)]
pub struct ResourceCounter {
    name: String,
    path: PathBuf,
}

impl ResourceCounter {
    /// Counter `name` stored under `root`.
    ///
    /// Names are hashed into file names, so any string is accepted.
    pub fn new(root: impl AsRef<Path>, name: impl Into<String>) -> Self {
        let name = name.into();
        let digest = hex::encode(Sha256::digest(name.as_bytes()));
        let path = root.as_ref().join(format!("{}.count", &digest[..32]));
        Self { name, path }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire one unit. Returns the count after the increment.
    pub fn increment(&self) -> io::Result<u32> {
        self.update(|count| count.saturating_add(1))
    }

    /// Release one unit. Returns the count remaining after release.
    ///
    /// Never goes below zero: releasing an empty counter returns zero.
    pub fn decrement(&self) -> io::Result<u32> {
        self.update(|count| count.saturating_sub(1))
    }

    /// Current count.
    pub fn count(&self) -> io::Result<u32> {
        self.update(|count| count)
    }

    fn update(&self, f: impl FnOnce(u32) -> u32) -> io::Result<u32> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let result = Self::read_write(&mut file, f);
        let _ = file.unlock();

        if let Ok(count) = result {
            debug!(counter = %self.name, count, "Resource counter updated");
        }
        result
    }

    fn read_write(file: &mut File, f: impl FnOnce(u32) -> u32) -> io::Result<u32> {
        let mut contents = String::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_string(&mut contents)?;
        let current = contents.trim().parse::<u32>().unwrap_or(0);

        let next = f(current);
        if next != current {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            write!(file, "{}", next)?;
            file.sync_all()?;
        }
        Ok(next)
    }
}
