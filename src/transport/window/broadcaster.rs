//! Window-messaging broadcaster.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{channel_property, CopyDataBlock, WindowSystem};
use crate::config::WindowConfig;
use crate::datagram::DataGram;
use crate::error::{Result, XdError};
use crate::transport::Broadcaster;

/// Copies datagrams to every window tagged with the channel's property.
pub struct WindowBroadcaster {
    system: Arc<dyn WindowSystem>,
    send_timeout: Duration,
}

impl WindowBroadcaster {
    pub fn new(system: Arc<dyn WindowSystem>, config: &WindowConfig) -> Self {
        Self {
            system,
            send_timeout: config.send_timeout(),
        }
    }
}

#[async_trait]
impl Broadcaster for WindowBroadcaster {
    async fn send_datagram(&self, datagram: DataGram) -> Result<()> {
        if datagram.channel().is_empty() {
            return Err(XdError::empty("channel"));
        }
        if datagram.message().is_empty() {
            return Err(XdError::empty("message"));
        }
        if !self.system.is_interactive() {
            return Err(XdError::Transport(
                "window messaging requires an interactive desktop".to_string(),
            ));
        }

        let key = channel_property(datagram.channel());
        let block = CopyDataBlock::new(datagram.encode()?);
        let recipients: Vec<_> = self
            .system
            .enumerate_top_level_windows()
            .into_iter()
            .filter(|window| self.system.has_property(*window, &key))
            .collect();

        let mut delivered = 0;
        for window in &recipients {
            match self
                .system
                .send_copy_data(*window, &block, self.send_timeout)
                .await
            {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(channel = %datagram.channel(), window, error = %e, "Skipping unresponsive window");
                }
            }
        }
        drop(block);

        debug!(
            channel = %datagram.channel(),
            recipients = recipients.len(),
            delivered,
            "Window broadcast complete"
        );
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.system.is_interactive()
    }
}
