//! File-drop listener.
//!
//! One directory watcher and one dispatcher task per registered channel.
//! Watchers are created on first registration and then only enabled or
//! disabled, so re-registering a channel is cheap.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::watcher::{DirectoryWatcher, WatchEvent};
use super::channel_directory;
use crate::config::FileDropConfig;
use crate::datagram::DataGram;
use crate::error::{Result, XdError};
use crate::transport::{HandlerList, Listener, MessageHandler};

struct ChannelWatch {
    watcher: DirectoryWatcher,
    dispatcher: JoinHandle<()>,
}

/// Receives message files dropped into channel directories.
pub struct FileDropListener {
    base_path: PathBuf,
    poll_interval: Duration,
    watches: RwLock<HashMap<String, ChannelWatch>>,
    handlers: HandlerList,
    disposed: AtomicBool,
}

impl FileDropListener {
    pub fn new(config: &FileDropConfig) -> Self {
        Self {
            base_path: config.base_path.clone(),
            poll_interval: config.poll_interval(),
            watches: RwLock::new(HashMap::new()),
            handlers: HandlerList::new(),
            disposed: AtomicBool::new(false),
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(XdError::Disposed("FileDropListener"));
        }
        Ok(())
    }

    fn start_watch(&self, channel: &str) -> Result<ChannelWatch> {
        let dir = channel_directory(&self.base_path, channel);
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = DirectoryWatcher::spawn(&dir, self.poll_interval, tx)?;
        let dispatcher = tokio::spawn(dispatch_loop(
            channel.to_string(),
            rx,
            self.handlers.clone(),
        ));
        info!(channel = %channel, dir = %dir.display(), "File-drop channel registered");
        Ok(ChannelWatch {
            watcher,
            dispatcher,
        })
    }
}

#[async_trait]
impl Listener for FileDropListener {
    async fn register_channel(&self, channel: &str) -> Result<()> {
        self.ensure_usable()?;
        if channel.is_empty() {
            return Err(XdError::empty("channel"));
        }

        {
            let watches = self.watches.read().unwrap_or_else(|e| e.into_inner());
            if let Some(watch) = watches.get(channel) {
                watch.watcher.set_enabled(true);
                return Ok(());
            }
        }

        let mut watches = self.watches.write().unwrap_or_else(|e| e.into_inner());
        if let Some(watch) = watches.get(channel) {
            watch.watcher.set_enabled(true);
            return Ok(());
        }
        let watch = self.start_watch(channel)?;
        watches.insert(channel.to_string(), watch);
        Ok(())
    }

    async fn unregister_channel(&self, channel: &str) -> Result<()> {
        self.ensure_usable()?;
        if channel.is_empty() {
            return Err(XdError::empty("channel"));
        }
        let watches = self.watches.read().unwrap_or_else(|e| e.into_inner());
        if let Some(watch) = watches.get(channel) {
            watch.watcher.set_enabled(false);
            debug!(channel = %channel, "File-drop channel unregistered");
        }
        Ok(())
    }

    fn add_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.handlers.add(handler);
    }

    fn is_alive(&self) -> bool {
        !self.disposed.load(Ordering::SeqCst)
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<_> = self
            .watches
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (channel, watch) in drained {
            watch.watcher.stop();
            watch.dispatcher.abort();
            debug!(channel = %channel, "File-drop watcher torn down");
        }
        self.handlers.clear();
        info!(base = %self.base_path.display(), "File-drop listener disposed");
    }
}

async fn dispatch_loop(
    channel: String,
    mut events: mpsc::UnboundedReceiver<WatchEvent>,
    handlers: HandlerList,
) {
    while let Some(event) = events.recv().await {
        match read_message_file(&event.path).await {
            Ok(Some(datagram)) if datagram.channel() == channel => {
                handlers.dispatch(&Arc::new(datagram)).await;
            }
            Ok(Some(datagram)) => {
                // Another channel sanitized to the same directory.
                debug!(channel = %channel, other = %datagram.channel(), "Ignoring message for other channel");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(channel = %channel, path = %event.path.display(), error = %e, "Failed to read message file");
            }
        }
    }
}

/// Read and decode one message file.
///
/// A file that vanished before it could be read (cleanup raced us) is
/// `Ok(None)`, as is a malformed or invalid payload. Any other read failure
/// is an error.
pub async fn read_message_file(path: &Path) -> Result<Option<DataGram>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(XdError::Io(e)),
    };
    let Ok(text) = String::from_utf8(bytes) else {
        debug!(path = %path.display(), "Dropping non-UTF-8 message file");
        return Ok(None);
    };
    Ok(DataGram::decode_valid(&text))
}
