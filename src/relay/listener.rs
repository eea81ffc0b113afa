//! Relay listener.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::link::RelayLink;
use crate::error::{Result, XdError};
use crate::transport::{Listener, MessageHandler};

/// Local listener that also receives its mode's traffic from other machines.
///
/// Channel registration and handlers go to the local listener. Relayed
/// datagrams reach local handlers by being rebroadcast on the local
/// transport by the [`RelayLink`] this listener holds.
pub struct NetworkRelayListener {
    local: Arc<dyn Listener>,
    link: Arc<RelayLink>,
    disposed: AtomicBool,
}

impl NetworkRelayListener {
    /// Wrap `local` and take a hold on `link`. `None` if the link has
    /// already closed.
    pub fn attach(local: Arc<dyn Listener>, link: &Arc<RelayLink>) -> Option<Self> {
        if !link.acquire() {
            return None;
        }
        Some(Self {
            local,
            link: Arc::clone(link),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn relay_channel(&self) -> &str {
        self.link.relay_channel()
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(XdError::Disposed("NetworkRelayListener"));
        }
        Ok(())
    }
}

#[async_trait]
impl Listener for NetworkRelayListener {
    async fn register_channel(&self, channel: &str) -> Result<()> {
        self.ensure_usable()?;
        self.local.register_channel(channel).await
    }

    async fn unregister_channel(&self, channel: &str) -> Result<()> {
        self.ensure_usable()?;
        self.local.unregister_channel(channel).await
    }

    fn add_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.local.add_handler(handler);
    }

    fn is_alive(&self) -> bool {
        !self.disposed.load(Ordering::SeqCst) && self.link.is_alive()
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.link.release().await;
        self.local.dispose().await;
        debug!(channel = %self.link.relay_channel(), "Relay listener disposed");
    }
}
