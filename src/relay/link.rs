//! Relay channel subscription shared inside one process.
//!
//! Every relay listener of a transport mode on this machine consumes the
//! same long-lived queue, so one process keeps a single network listener
//! per mode and rebroadcasts each relayed datagram once. The link counts
//! its holders and disposes the network listener when the last one leaves.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{relay_channel, RelayEnvelope};
use crate::datagram::DataGram;
use crate::error::Result;
use crate::transport::{Broadcaster, Listener, MessageHandler, TransportMode};
use crate::utils::retry::{next_delay, relay_schedule};

/// Rebroadcasts relay envelopes from other machines on the local transport.
struct RelayHandler {
    machine_name: String,
    local: Arc<dyn Broadcaster>,
}

impl MessageHandler for RelayHandler {
    fn handle(&self, datagram: Arc<DataGram>) -> BoxFuture<'static, Result<()>> {
        let envelope: std::result::Result<RelayEnvelope, _> =
            serde_json::from_str(datagram.message());
        let machine_name = self.machine_name.clone();
        let local = Arc::clone(&self.local);

        Box::pin(async move {
            let envelope = envelope?;
            if envelope.is_from(&machine_name) {
                debug!(channel = %envelope.channel, "Skipping relay envelope from this machine");
                return Ok(());
            }
            debug!(
                channel = %envelope.channel,
                origin = %envelope.machine_name,
                "Rebroadcasting relayed datagram locally"
            );
            local.send_datagram(envelope.unwrap_datagram()?).await
        })
    }
}

#[derive(Default)]
struct Holders {
    count: usize,
    closed: bool,
}

/// Network side of the relay for one transport mode.
pub struct RelayLink {
    network: Arc<dyn Listener>,
    relay_channel: String,
    cancel: watch::Sender<bool>,
    registration: Mutex<Option<JoinHandle<()>>>,
    holders: Mutex<Holders>,
}

impl RelayLink {
    /// Subscribe `network` to the relay channel of `mode`, retrying every
    /// `retry_interval` until it succeeds or the link closes. Envelopes from
    /// other machines are rebroadcast on `local`.
    pub fn start(
        mode: TransportMode,
        network: Arc<dyn Listener>,
        local: Arc<dyn Broadcaster>,
        machine_name: impl Into<String>,
        retry_interval: Duration,
    ) -> Arc<Self> {
        network.add_handler(Arc::new(RelayHandler {
            machine_name: machine_name.into(),
            local,
        }));

        let relay_channel = relay_channel(mode);
        let (cancel, cancel_rx) = watch::channel(false);
        let registration = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(register_until_cancelled(
                Arc::clone(&network),
                relay_channel.clone(),
                retry_interval,
                cancel_rx,
            ))),
            Err(_) => {
                warn!(channel = %relay_channel, "No runtime available, relay not registered");
                None
            }
        };

        Arc::new(Self {
            network,
            relay_channel,
            cancel,
            registration: Mutex::new(registration),
            holders: Mutex::new(Holders::default()),
        })
    }

    pub fn relay_channel(&self) -> &str {
        &self.relay_channel
    }

    pub fn is_alive(&self) -> bool {
        !self.is_closed() && self.network.is_alive()
    }

    pub fn is_closed(&self) -> bool {
        self.holders.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    pub fn holder_count(&self) -> usize {
        self.holders.lock().unwrap_or_else(|e| e.into_inner()).count
    }

    /// Take a hold on the link. Fails once the link has closed.
    pub(crate) fn acquire(&self) -> bool {
        let mut holders = self.holders.lock().unwrap_or_else(|e| e.into_inner());
        if holders.closed {
            return false;
        }
        holders.count += 1;
        true
    }

    /// Drop a hold; the last one closes the link.
    pub(crate) async fn release(&self) {
        let last = {
            let mut holders = self.holders.lock().unwrap_or_else(|e| e.into_inner());
            holders.count = holders.count.saturating_sub(1);
            if holders.count == 0 && !holders.closed {
                holders.closed = true;
                true
            } else {
                false
            }
        };
        if last {
            self.shutdown().await;
        }
    }

    /// Close the link regardless of holders.
    pub async fn close(&self) {
        let first = {
            let mut holders = self.holders.lock().unwrap_or_else(|e| e.into_inner());
            !std::mem::replace(&mut holders.closed, true)
        };
        if first {
            self.shutdown().await;
        }
    }

    async fn shutdown(&self) {
        self.stop_registration();
        self.network.dispose().await;
        info!(channel = %self.relay_channel, "Relay link closed");
    }

    fn stop_registration(&self) {
        let _ = self.cancel.send(true);
        if let Some(task) = self
            .registration
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn registration_stopped(&self) -> bool {
        self.registration
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
            && *self.cancel.borrow()
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        self.stop_registration();
    }
}

/// Register `channel` on `network`, retrying on a fixed schedule.
async fn register_until_cancelled(
    network: Arc<dyn Listener>,
    channel: String,
    interval: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    let mut schedule = relay_schedule(interval);
    loop {
        let result = tokio::select! {
            result = network.register_channel(&channel) => result,
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    return;
                }
                continue;
            }
        };

        match result {
            Ok(()) => {
                info!(channel = %channel, "Relay channel registered");
                return;
            }
            Err(e) if e.is_disposed() => return,
            Err(e) => {
                let delay = next_delay(&mut schedule, interval);
                warn!(
                    channel = %channel,
                    error = %e,
                    retry_ms = %delay.as_millis(),
                    "Relay registration failed, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ManualListener, RecordingBroadcaster};

    struct Fixture {
        local: Arc<RecordingBroadcaster>,
        network: Arc<ManualListener>,
        link: Arc<RelayLink>,
    }

    fn fixture(network: ManualListener) -> Fixture {
        let local = Arc::new(RecordingBroadcaster::new(true));
        let network = Arc::new(network);
        let link = RelayLink::start(
            TransportMode::FileDrop,
            network.clone(),
            local.clone(),
            "HOST-A",
            Duration::from_millis(20),
        );
        Fixture {
            local,
            network,
            link,
        }
    }

    async fn wait_until_registered(listener: &ManualListener, channel: &str) -> bool {
        for _ in 0..200 {
            if listener.is_registered(channel) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn relayed_from(machine: &str, message: &str) -> DataGram {
        let original = DataGram::from_string("Status", message).unwrap();
        RelayEnvelope::wrap(machine, TransportMode::FileDrop, &original)
            .to_relay_datagram()
            .unwrap()
    }

    #[tokio::test]
    async fn test_envelope_from_other_machine_is_rebroadcast_locally() {
        let f = fixture(ManualListener::new(true));
        assert!(wait_until_registered(&f.network, f.link.relay_channel()).await);

        f.network.deliver(relayed_from("host-b", "hello")).await;

        let sent = f.local.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel(), "Status");
        assert_eq!(sent[0].message(), "hello");
    }

    #[tokio::test]
    async fn test_envelope_from_this_machine_is_not_rebroadcast() {
        let f = fixture(ManualListener::new(true));
        assert!(wait_until_registered(&f.network, f.link.relay_channel()).await);

        f.network.deliver(relayed_from("host-a", "echo")).await;

        assert!(f.local.sent().is_empty());
    }

    #[tokio::test]
    async fn test_registration_is_retried_until_it_succeeds() {
        let network = ManualListener::new(true);
        network.fail_next_registrations(3);
        let f = fixture(network);

        assert!(wait_until_registered(&f.network, f.link.relay_channel()).await);
    }

    #[tokio::test]
    async fn test_last_release_closes_link() {
        let network = ManualListener::new(true);
        network.fail_next_registrations(usize::MAX);
        let f = fixture(network);
        assert!(f.link.acquire());
        assert!(f.link.acquire());

        f.link.release().await;
        assert!(!f.network.is_disposed());
        assert!(f.link.is_alive());

        f.link.release().await;
        assert!(f.network.is_disposed());
        assert!(f.link.is_closed());
        assert!(!f.link.is_alive());
        assert!(f.link.registration_stopped());
        assert!(!f.link.acquire());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let f = fixture(ManualListener::new(true));
        f.link.close().await;
        f.link.close().await;
        f.link.release().await;
        assert!(f.network.is_disposed());
        assert_eq!(f.link.holder_count(), 0);
    }
}
