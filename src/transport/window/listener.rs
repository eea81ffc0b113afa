//! Window-messaging listener.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{channel_property, WindowHandle, WindowSystem};
use crate::datagram::DataGram;
use crate::error::{Result, XdError};
use crate::transport::{HandlerList, Listener, MessageHandler};

/// Pending copy-data per window before senders start timing out.
const INBOX_CAPACITY: usize = 64;

/// Receives copy-data on a hidden window tagged per registered channel.
pub struct WindowListener {
    system: Arc<dyn WindowSystem>,
    window: Mutex<Option<WindowHandle>>,
    channels: Arc<Mutex<HashSet<String>>>,
    handlers: HandlerList,
    receiver: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl WindowListener {
    /// Create the hidden window and start its message loop.
    ///
    /// On a headless desktop, or outside a tokio runtime, no window is created
    /// and the listener is not alive.
    pub fn new(system: Arc<dyn WindowSystem>) -> Self {
        let channels = Arc::new(Mutex::new(HashSet::new()));
        let handlers = HandlerList::new();
        let mut window = None;
        let mut receiver = None;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) if system.is_interactive() => {
                let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
                match WindowHandle::create(Arc::clone(&system), tx) {
                    Ok(handle) => {
                        receiver = Some(runtime.spawn(message_loop(
                            rx,
                            Arc::clone(&channels),
                            handlers.clone(),
                        )));
                        window = Some(handle);
                    }
                    Err(e) => warn!(error = %e, "Could not create listener window"),
                }
            }
            Ok(_) => debug!("Headless desktop; window listener inactive"),
            Err(_) => warn!("No tokio runtime; window listener inactive"),
        }

        Self {
            system,
            window: Mutex::new(window),
            channels,
            handlers,
            receiver: Mutex::new(receiver),
            disposed: AtomicBool::new(false),
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(XdError::Disposed("WindowListener"));
        }
        Ok(())
    }

    fn window_id(&self) -> Option<u64> {
        self.window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(WindowHandle::id)
    }
}

#[async_trait]
impl Listener for WindowListener {
    async fn register_channel(&self, channel: &str) -> Result<()> {
        self.ensure_usable()?;
        if channel.is_empty() {
            return Err(XdError::empty("channel"));
        }
        let Some(window) = self.window_id() else {
            debug!(channel = %channel, "No listener window; registration has no effect");
            return Ok(());
        };
        self.system.set_property(window, &channel_property(channel))?;
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel.to_string());
        debug!(channel = %channel, window, "Window channel registered");
        Ok(())
    }

    async fn unregister_channel(&self, channel: &str) -> Result<()> {
        self.ensure_usable()?;
        if channel.is_empty() {
            return Err(XdError::empty("channel"));
        }
        if let Some(window) = self.window_id() {
            self.system.remove_property(window, &channel_property(channel));
        }
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(channel);
        Ok(())
    }

    fn add_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.handlers.add(handler);
    }

    fn is_alive(&self) -> bool {
        !self.disposed.load(Ordering::SeqCst) && self.window_id().is_some()
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the handle destroys the window and with it every property tag.
        self.window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = self
            .receiver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.handlers.clear();
        debug!("Window listener disposed");
    }
}

impl Drop for WindowListener {
    fn drop(&mut self) {
        if let Some(task) = self
            .receiver
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }
}

async fn message_loop(
    mut inbox: mpsc::Receiver<Vec<u8>>,
    channels: Arc<Mutex<HashSet<String>>>,
    handlers: HandlerList,
) {
    while let Some(bytes) = inbox.recv().await {
        let Ok(text) = String::from_utf8(bytes) else {
            continue;
        };
        let Some(datagram) = DataGram::decode_valid(&text) else {
            continue;
        };
        let registered = channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(datagram.channel());
        if registered {
            handlers.dispatch(&Arc::new(datagram)).await;
        }
    }
}
