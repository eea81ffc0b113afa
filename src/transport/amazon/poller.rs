//! Background queue polling.
//!
//! One poller per active subscription. Each received message is handed to the
//! handler if the subscription is still active, then deleted from the queue.
//! A message whose handler fails is left in place and comes back after the
//! visibility timeout, so delivery is at least once. A message pulled after
//! unsubscribe is deleted undelivered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::{CloudBackend, SnsEnvelope};
use crate::error::Result;

/// Delay after a failed receive before polling again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Pause after an empty short poll (zero wait time).
const EMPTY_POLL_DELAY: Duration = Duration::from_millis(100);

/// Consumer of unwrapped notifications.
pub trait NotificationHandler: Send + Sync {
    fn handle(&self, envelope: SnsEnvelope) -> BoxFuture<'static, Result<()>>;
}

/// Running poller.
pub struct PollerHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Signal the loop to exit at its next await without waiting for it.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Signal the loop and wait up to `grace` for it to exit.
    ///
    /// A loop still busy in a handler after `grace` is left to finish on its
    /// own; it exits before the next receive.
    pub async fn shutdown(self, grace: Duration) {
        self.stop();
        if tokio::time::timeout(grace, self.task).await.is_err() {
            warn!(grace_ms = grace.as_millis() as u64, "SQS poller still running after shutdown grace");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Polling loop over one queue.
pub struct QueuePoller {
    pub backend: Arc<dyn CloudBackend>,
    pub queue_url: String,
    pub max_messages: i32,
    pub wait: Duration,
    /// Cleared when the subscription ends; checked before every dispatch.
    pub active: Arc<AtomicBool>,
    pub handler: Arc<dyn NotificationHandler>,
}

impl QueuePoller {
    /// Spawn the loop on the current runtime.
    pub fn start(self) -> PollerHandle {
        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(cancel_rx));
        PollerHandle { cancel, task }
    }

    async fn run(self, mut cancel_rx: watch::Receiver<bool>) {
        info!(queue_url = %self.queue_url, "Starting SQS poller");

        loop {
            if *cancel_rx.borrow() {
                break;
            }

            let received = tokio::select! {
                result = self.backend.receive(&self.queue_url, self.max_messages, self.wait) => result,
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let messages = match received {
                Ok(messages) => messages,
                Err(e) => {
                    error!(queue_url = %self.queue_url, error = %e, "Failed to receive messages");
                    tokio::select! {
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                        _ = cancel_rx.changed() => {}
                    }
                    continue;
                }
            };

            if messages.is_empty() && self.wait.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(EMPTY_POLL_DELAY) => {}
                    _ = cancel_rx.changed() => {}
                }
                continue;
            }

            for message in messages {
                match serde_json::from_str::<SnsEnvelope>(&message.body) {
                    Ok(envelope) if self.active.load(Ordering::SeqCst) => {
                        if let Err(e) = self.handler.handle(envelope).await {
                            warn!(queue_url = %self.queue_url, error = %e, "Notification handler failed, leaving message for redelivery");
                            continue;
                        }
                    }
                    Ok(_) => {
                        debug!(queue_url = %self.queue_url, "Subscription inactive, dropping message");
                    }
                    Err(e) => {
                        warn!(queue_url = %self.queue_url, error = %e, "Dropping malformed notification");
                    }
                }

                if let Err(e) = self
                    .backend
                    .delete_message(&self.queue_url, &message.receipt_handle)
                    .await
                {
                    warn!(queue_url = %self.queue_url, error = %e, "Failed to delete message");
                }
            }
        }

        info!(queue_url = %self.queue_url, "SQS poller stopped");
    }
}
