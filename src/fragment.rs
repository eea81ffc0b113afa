//! Payload fragmentation and reassembly.
//!
//! Backends with a message size ceiling (SNS accepts 256 KiB) carry large
//! encoded datagrams as a set of fragments. Fragments may arrive in any
//! order and more than once. Once every piece is present the reassembler
//! returns the original string; the set is kept until [`Reassembler::finish`]
//! so a redelivered piece can complete it again if delivery failed.
//!
//! A queue shared by several processes splits one payload's fragments between
//! them. [`FragmentSpool`] keeps pieces on disk under an `fs2` lock so the
//! process receiving the last piece completes the set, whoever got the rest.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

/// Default time an incomplete fragment set is kept before eviction.
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(60);

/// One piece of a fragmented payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Shared by every fragment of one payload.
    pub id: String,
    /// Zero-based position.
    pub index: u32,
    /// Total number of fragments.
    pub count: u32,
    pub chunk: String,
}

/// Split `payload` into fragments of at most `max_chunk_bytes` bytes each.
///
/// Splits only on UTF-8 character boundaries, so every chunk is valid text.
/// A chunk always holds at least one character.
pub fn split(payload: &str, max_chunk_bytes: usize) -> Vec<Fragment> {
    let mut chunks = Vec::new();
    let mut rest = payload;
    while !rest.is_empty() {
        let mut end = max_chunk_bytes.min(rest.len()).max(1);
        while !rest.is_char_boundary(end) {
            end += 1;
        }
        let (head, tail) = rest.split_at(end);
        chunks.push(head.to_string());
        rest = tail;
    }

    let id = Uuid::new_v4().to_string();
    let count = chunks.len() as u32;
    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| Fragment {
            id: id.clone(),
            index: index as u32,
            count,
            chunk,
        })
        .collect()
}

struct PendingPayload {
    count: u32,
    chunks: BTreeMap<u32, String>,
    first_seen: Instant,
}

/// Collects fragments until a payload is complete.
pub struct Reassembler {
    pending: Mutex<HashMap<String, PendingPayload>>,
    timeout: Duration,
}

impl Reassembler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Accept a fragment. Returns the full payload once all pieces are present.
    ///
    /// The completed set stays until [`finish`](Self::finish) or eviction.
    pub fn accept(&self, fragment: Fragment) -> Option<String> {
        if !in_range(&fragment) {
            return None;
        }

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        self.evict_locked(&mut pending);

        let entry = pending
            .entry(fragment.id.clone())
            .or_insert_with(|| PendingPayload {
                count: fragment.count,
                chunks: BTreeMap::new(),
                first_seen: Instant::now(),
            });

        if entry.count != fragment.count {
            warn!(id = %fragment.id, "Dropping fragment with inconsistent count");
            return None;
        }

        entry.chunks.entry(fragment.index).or_insert(fragment.chunk);
        if entry.chunks.len() < entry.count as usize {
            return None;
        }

        debug!(id = %fragment.id, count = entry.count, "Reassembled payload");
        Some(entry.chunks.values().map(String::as_str).collect())
    }

    /// Forget the set `id` after its payload was delivered.
    pub fn finish(&self, id: &str) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    /// Drop incomplete payloads older than the timeout. Returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        self.evict_locked(&mut pending)
    }

    /// Number of incomplete payloads held.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn evict_locked(&self, pending: &mut HashMap<String, PendingPayload>) -> usize {
        let before = pending.len();
        let timeout = self.timeout;
        pending.retain(|_, p| p.first_seen.elapsed() < timeout);
        before - pending.len()
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_REASSEMBLY_TIMEOUT)
    }
}

fn in_range(fragment: &Fragment) -> bool {
    if fragment.count == 0 || fragment.index >= fragment.count {
        warn!(
            id = %fragment.id,
            index = fragment.index,
            count = fragment.count,
            "Dropping out-of-range fragment"
        );
        return false;
    }
    true
}

fn hashed(name: &str) -> String {
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    digest[..32].to_string()
}

/// Machine-wide reassembly for one shared queue.
///
/// Pieces live in `<root>/fragments/<scope>/<id>/<index>.part` next to a
/// `count` file. Every access holds an exclusive lock on `<scope>/.lock`.
#[derive(Debug, Clone)]
pub struct FragmentSpool {
    dir: PathBuf,
    timeout: Duration,
}

impl FragmentSpool {
    /// Spool for `scope` (normally the queue name) under `root`.
    pub fn new(root: impl AsRef<Path>, scope: &str, timeout: Duration) -> Self {
        Self {
            dir: root.as_ref().join("fragments").join(hashed(scope)),
            timeout,
        }
    }

    /// Store a fragment. Returns the full payload to the caller that stores
    /// the last missing piece, or a redelivered piece of a set that is still
    /// complete on disk. The set stays until [`finish`](Self::finish).
    ///
    /// Blocking; call from `spawn_blocking` in async code.
    pub fn accept(&self, fragment: Fragment) -> io::Result<Option<String>> {
        if !in_range(&fragment) {
            return Ok(None);
        }

        fs::create_dir_all(&self.dir)?;
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(".lock"))?;
        lock.lock_exclusive()?;

        let result = self.accept_locked(fragment);
        let _ = lock.unlock();
        result
    }

    /// Number of incomplete payloads on disk.
    pub fn pending_count(&self) -> io::Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut count = 0;
        for entry in fs::read_dir(&self.dir)? {
            if entry?.file_type()?.is_dir() {
                count += 1;
            }
        }
        Ok(count)
    }

    fn accept_locked(&self, fragment: Fragment) -> io::Result<Option<String>> {
        self.evict_expired();

        let set = self.dir.join(hashed(&fragment.id));
        fs::create_dir_all(&set)?;

        let count_file = set.join("count");
        match fs::read_to_string(&count_file) {
            Ok(stored) => {
                if stored.trim().parse::<u32>().ok() != Some(fragment.count) {
                    warn!(id = %fragment.id, "Dropping fragment with inconsistent count");
                    return Ok(None);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::write(&count_file, fragment.count.to_string())?;
            }
            Err(e) => return Err(e),
        }

        let piece = set.join(format!("{}.part", fragment.index));
        if !piece.exists() {
            fs::write(&piece, fragment.chunk.as_bytes())?;
        }

        let mut present = 0;
        for index in 0..fragment.count {
            if set.join(format!("{index}.part")).exists() {
                present += 1;
            }
        }
        if present < fragment.count {
            return Ok(None);
        }

        let mut payload = String::new();
        for index in 0..fragment.count {
            payload.push_str(&fs::read_to_string(set.join(format!("{index}.part")))?);
        }
        debug!(id = %fragment.id, count = fragment.count, "Reassembled spooled payload");
        Ok(Some(payload))
    }

    /// Remove the set `id` after its payload was delivered.
    pub fn finish(&self, id: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(".lock"))?;
        lock.lock_exclusive()?;

        let result = match fs::remove_dir_all(self.dir.join(hashed(id))) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        };
        let _ = lock.unlock();
        result
    }

    fn evict_expired(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        let now = SystemTime::now();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let expired = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age >= self.timeout);
            if expired {
                match fs::remove_dir_all(&path) {
                    Ok(()) => debug!(path = %path.display(), "Evicted incomplete fragment set"),
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to evict fragment set"),
                }
            }
        }
    }
}
