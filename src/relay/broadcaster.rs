//! Relay broadcaster.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::RelayEnvelope;
use crate::datagram::DataGram;
use crate::error::Result;
use crate::transport::{Broadcaster, TransportMode};

/// Publishes every datagram to the relay channel of `mode` on the network
/// broadcaster.
///
/// Publishing happens in the background; failures are logged and never
/// reach the caller. Compose it with the local broadcaster in a
/// [`MulticastBroadcaster`](crate::multicast::MulticastBroadcaster).
pub struct NetworkRelayBroadcaster {
    network: Arc<dyn Broadcaster>,
    mode: TransportMode,
    machine_name: String,
}

impl NetworkRelayBroadcaster {
    pub fn new(
        mode: TransportMode,
        network: Arc<dyn Broadcaster>,
        machine_name: impl Into<String>,
    ) -> Self {
        Self {
            network,
            mode,
            machine_name: machine_name.into(),
        }
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }
}

#[async_trait]
impl Broadcaster for NetworkRelayBroadcaster {
    async fn send_datagram(&self, datagram: DataGram) -> Result<()> {
        let envelope = RelayEnvelope::wrap(&self.machine_name, self.mode, &datagram);
        let relayed = match envelope.to_relay_datagram() {
            Ok(relayed) => relayed,
            Err(e) => {
                warn!(channel = %datagram.channel(), error = %e, "Failed to wrap relay envelope");
                return Ok(());
            }
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(channel = %datagram.channel(), "No runtime available, relay publish dropped");
            return Ok(());
        };

        let network = Arc::clone(&self.network);
        let channel = datagram.channel().to_string();
        runtime.spawn(async move {
            match network.send_datagram(relayed).await {
                Ok(()) => debug!(channel = %channel, "Relayed datagram to network"),
                Err(e) => warn!(channel = %channel, error = %e, "Relay publish failed"),
            }
        });
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.network.is_alive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::relay_channel;
    use crate::test_utils::RecordingBroadcaster;
    use std::time::Duration;

    async fn wait_for_sent(network: &RecordingBroadcaster, n: usize) -> Vec<DataGram> {
        for _ in 0..100 {
            let sent = network.sent();
            if sent.len() >= n {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        network.sent()
    }

    #[tokio::test]
    async fn test_datagram_is_wrapped_onto_relay_channel() {
        let network = Arc::new(RecordingBroadcaster::new(true));
        let relay = NetworkRelayBroadcaster::new(TransportMode::FileDrop, network.clone(), "HOST-A");

        relay.send_to_channel("Status", "hello").await.unwrap();

        let sent = wait_for_sent(&network, 1).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel(), relay_channel(TransportMode::FileDrop));
        let envelope: RelayEnvelope = serde_json::from_str(sent[0].message()).unwrap();
        assert_eq!(envelope.machine_name, "HOST-A");
        assert_eq!(envelope.mode, TransportMode::FileDrop);
        assert_eq!(envelope.channel, "Status");
        assert_eq!(envelope.message, "hello");
    }

    #[tokio::test]
    async fn test_network_failure_is_swallowed() {
        let network = Arc::new(RecordingBroadcaster::new(true));
        network.set_fail(true);
        let relay = NetworkRelayBroadcaster::new(TransportMode::Window, network.clone(), "HOST-A");

        assert!(relay.send_to_channel("Status", "hello").await.is_ok());
    }

    #[tokio::test]
    async fn test_alive_follows_network() {
        let network = Arc::new(RecordingBroadcaster::new(false));
        let relay = NetworkRelayBroadcaster::new(TransportMode::FileDrop, network.clone(), "HOST-A");
        assert!(!relay.is_alive());

        network.set_alive(true);
        assert!(relay.is_alive());
    }
}
