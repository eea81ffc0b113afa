//! File-drop broadcaster.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::cleanup::DirectoryCleaner;
use super::{channel_directory, ensure_shared_directory, MESSAGE_EXTENSION, TEMP_EXTENSION};
use crate::config::FileDropConfig;
use crate::datagram::DataGram;
use crate::error::{Result, XdError};
use crate::transport::Broadcaster;

/// Writes each message as a file in its channel directory.
pub struct FileDropBroadcaster {
    base_path: PathBuf,
    cleaner: Arc<DirectoryCleaner>,
}

impl FileDropBroadcaster {
    /// Create a broadcaster and sweep expired files left by earlier runs.
    pub fn new(config: &FileDropConfig) -> Self {
        let cleaner = Arc::new(DirectoryCleaner::new(config));
        cleaner.sweep_in_background();
        Self {
            base_path: config.base_path.clone(),
            cleaner,
        }
    }
}

#[async_trait]
impl Broadcaster for FileDropBroadcaster {
    async fn send_datagram(&self, datagram: DataGram) -> Result<()> {
        if datagram.channel().is_empty() {
            return Err(XdError::empty("channel"));
        }
        if datagram.message().is_empty() {
            return Err(XdError::empty("message"));
        }

        let dir = channel_directory(&self.base_path, datagram.channel());
        let create_dir = dir.clone();
        tokio::task::spawn_blocking(move || ensure_shared_directory(&create_dir))
            .await
            .map_err(|e| XdError::Transport(e.to_string()))??;

        // Write under a temp name, then rename so watchers only see complete files
        let id = Uuid::new_v4();
        let temp_path = dir.join(format!("{}.{}", id, TEMP_EXTENSION));
        let path = dir.join(format!("{}.{}", id, MESSAGE_EXTENSION));
        fs::write(&temp_path, datagram.encode()?).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(channel = %datagram.channel(), path = %path.display(), "Dropped message file");
        self.cleaner.schedule(dir);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn message_files(dir: &std::path::Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|e| e.path())
                    .filter(|p| p.extension().is_some_and(|e| e == MESSAGE_EXTENSION))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_send_writes_decodable_message_file() {
        let temp = TempDir::new().unwrap();
        let broadcaster = FileDropBroadcaster::new(&FileDropConfig::with_base_path(temp.path()));

        broadcaster.send_to_channel("a/b", "hello").await.unwrap();

        let files = message_files(&temp.path().join("a_b"));
        assert_eq!(files.len(), 1);
        let decoded = DataGram::decode(&std::fs::read_to_string(&files[0]).unwrap()).unwrap();
        assert_eq!(decoded.channel(), "a/b");
        assert_eq!(decoded.message(), "hello");
    }

    #[tokio::test]
    async fn test_send_rejects_invalid_arguments_without_io() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("root");
        let broadcaster = FileDropBroadcaster::new(&FileDropConfig::with_base_path(&base));

        let err = broadcaster.send_to_channel("", "x").await.unwrap_err();
        assert!(matches!(err, XdError::InvalidArgument { argument: "channel", .. }));
        let err = broadcaster.send_to_channel("c", "").await.unwrap_err();
        assert!(matches!(err, XdError::InvalidArgument { argument: "message", .. }));
        assert!(message_files(&base.join("c")).is_empty());
    }

    #[tokio::test]
    async fn test_sent_files_are_removed_after_retention() {
        let temp = TempDir::new().unwrap();
        let config = FileDropConfig::with_base_path(temp.path()).with_retention_secs(1);
        let broadcaster = FileDropBroadcaster::new(&config);

        broadcaster.send_to_channel("Status", "bye").await.unwrap();
        let dir = temp.path().join("Status");
        assert_eq!(message_files(&dir).len(), 1);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(message_files(&dir).is_empty());
    }
}
