//! File-drop transport.
//!
//! Messages are files in a per-channel subdirectory of a shared root:
//! ```text
//! {base_path}/
//!   {sanitized channel}/
//!     {uuid}.msg
//! ```
//!
//! The broadcaster writes `{uuid}.tmp` and renames it, so a watcher never sees
//! a half-written `.msg` file. Files are removed by a delayed cleanup pass once
//! they are older than the retention window.

use std::io;
use std::path::{Path, PathBuf};

mod broadcaster;
mod cleanup;
mod listener;
mod watcher;

pub use broadcaster::FileDropBroadcaster;
pub use cleanup::DirectoryCleaner;
pub use listener::{read_message_file, FileDropListener};
pub use watcher::{DirectoryWatcher, WatchEvent, WatchEventKind};

/// Extension of complete message files.
pub const MESSAGE_EXTENSION: &str = "msg";

/// Extension of message files still being written.
pub const TEMP_EXTENSION: &str = "tmp";

/// Lock file serializing cleanup across processes.
pub const CLEANUP_LOCK_NAME: &str = ".cleanup.lock";

/// Characters no supported filesystem accepts in a file name.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Map a channel name to a directory name.
///
/// Invalid filename characters and control characters become `_`. Names made
/// only of dots (`.`, `..`) would address the parent, so their dots become `_`
/// too. Broadcaster and listener both go through this function.
pub fn sanitize_channel(channel: &str) -> String {
    let sanitized: String = channel
        .chars()
        .map(|c| {
            if c.is_control() || INVALID_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    if sanitized.chars().all(|c| c == '.') {
        return "_".repeat(sanitized.chars().count());
    }
    sanitized
}

/// Physical directory of `channel` under `base_path`.
pub fn channel_directory(base_path: &Path, channel: &str) -> PathBuf {
    base_path.join(sanitize_channel(channel))
}

/// True for files carrying the given extension.
pub(crate) fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().is_some_and(|e| e == extension)
}

/// Create `dir` (and parents) so that every local user can drop files in it.
pub(crate) fn ensure_shared_directory(dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Directories created by another user cannot be changed; that is fine.
        let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o777));
    }
    Ok(())
}
