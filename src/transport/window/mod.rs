//! Window-messaging transport.
//!
//! A listener owns one hidden top-level window and tags it with a property
//! per registered channel. A broadcaster enumerates every top-level window,
//! keeps the ones carrying the channel's property and copies the encoded
//! datagram to each with a bounded send.
//!
//! The OS side is behind [`WindowSystem`]. Only desktops with a GUI message
//! loop can deliver; on a headless desktop both ends report not alive.
//!
//! The crate ships [`InProcessDesktop`], an in-memory desktop shared by the
//! broadcasters and listeners built on it. Messages never leave the process
//! with it; delivery between processes needs a native `WindowSystem`
//! injected through the facade builder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;

mod broadcaster;
mod desktop;
mod listener;

pub use broadcaster::WindowBroadcaster;
pub use desktop::InProcessDesktop;
pub use listener::WindowListener;

/// Native window identifier.
pub type WindowId = u64;

/// Namespace prefix of channel properties.
pub const PROPERTY_PREFIX: &str = "XDMessaging.Channel.";

/// Property key tagging a window as listening on `channel`.
pub fn channel_property(channel: &str) -> String {
    let digest = Sha256::digest(channel.as_bytes());
    format!("{}{}", PROPERTY_PREFIX, hex::encode(&digest[..16]))
}

/// Memory block handed to every recipient of one send.
///
/// Allocated once per send and released when dropped, after enumeration.
#[derive(Debug)]
pub struct CopyDataBlock {
    data: Box<[u8]>,
}

impl CopyDataBlock {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into().into_boxed_slice(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Native windowing operations used by the transport.
#[async_trait]
pub trait WindowSystem: Send + Sync {
    /// Create a hidden top-level window. Copy-data sent to it arrives on `inbox`.
    fn create_window(&self, inbox: mpsc::Sender<Vec<u8>>) -> Result<WindowId>;

    fn destroy_window(&self, window: WindowId);

    fn set_property(&self, window: WindowId, key: &str) -> Result<()>;

    fn remove_property(&self, window: WindowId, key: &str);

    fn has_property(&self, window: WindowId, key: &str) -> bool;

    /// Every top-level window on the desktop, in z-order.
    fn enumerate_top_level_windows(&self) -> Vec<WindowId>;

    /// Deliver `block` to `window`, giving up after `timeout`.
    async fn send_copy_data(
        &self,
        window: WindowId,
        block: &CopyDataBlock,
        timeout: Duration,
    ) -> Result<()>;

    /// Whether a GUI message loop is available.
    fn is_interactive(&self) -> bool;
}

/// A native window destroyed when the handle is dropped.
pub struct WindowHandle {
    system: Arc<dyn WindowSystem>,
    id: WindowId,
}

impl WindowHandle {
    /// Create a hidden window on `system`.
    pub fn create(system: Arc<dyn WindowSystem>, inbox: mpsc::Sender<Vec<u8>>) -> Result<Self> {
        let id = system.create_window(inbox)?;
        Ok(Self { system, id })
    }

    pub fn id(&self) -> WindowId {
        self.id
    }
}

impl Drop for WindowHandle {
    fn drop(&mut self) {
        self.system.destroy_window(self.id);
        debug!(window = self.id, "Window destroyed");
    }
}
