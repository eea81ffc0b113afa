//! Subscriber (queue) repository.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::backend::{CloudBackend, QueueInfo};
use super::naming::resource_name;
use crate::error::{Result, XdError};

/// One listener's queue bound to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscriber {
    pub name: String,
    pub queue_url: String,
    pub queue_arn: String,
    /// Shared across processes and reference counted instead of deleted.
    pub long_lived: bool,
}

impl Subscriber {
    pub fn queue(&self) -> QueueInfo {
        QueueInfo {
            url: self.queue_url.clone(),
            arn: self.queue_arn.clone(),
        }
    }
}

/// Creates queues on first use and caches them by derived name.
pub struct SubscriberRepository {
    backend: Arc<dyn CloudBackend>,
    app_key: String,
    subscribers: RwLock<HashMap<String, Subscriber>>,
}

impl SubscriberRepository {
    pub fn new(backend: Arc<dyn CloudBackend>, app_key: impl Into<String>) -> Self {
        Self {
            backend,
            app_key: app_key.into(),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Backend name of the queue for (`instance_id`, `channel`).
    pub fn subscriber_name(&self, channel: &str, instance_id: &str) -> String {
        resource_name(&self.app_key, &format!("{}-{}", instance_id, channel))
    }

    /// Queue of `instance_id` on `channel`, created on the backend if needed.
    pub async fn get_subscriber(
        &self,
        channel: &str,
        instance_id: &str,
        long_lived: bool,
    ) -> Result<Subscriber> {
        if channel.is_empty() {
            return Err(XdError::empty("channel"));
        }
        if instance_id.is_empty() {
            return Err(XdError::empty("instance_id"));
        }
        let name = self.subscriber_name(channel, instance_id);

        // Check cache
        {
            let subscribers = self.subscribers.read().await;
            if let Some(subscriber) = subscribers.get(&name) {
                return Ok(subscriber.clone());
            }
        }

        let queue = self.backend.create_queue(&name).await?;
        let subscriber = Subscriber {
            name: name.clone(),
            queue_url: queue.url,
            queue_arn: queue.arn,
            long_lived,
        };

        let mut subscribers = self.subscribers.write().await;
        let subscriber = subscribers.entry(name).or_insert(subscriber).clone();
        info!(queue = %subscriber.name, url = %subscriber.queue_url, long_lived, "Created/found SQS queue");
        Ok(subscriber)
    }

    /// Forget `subscriber`; delete its queue unless it is long-lived.
    pub async fn expire_subscriber(&self, subscriber: &Subscriber) -> Result<()> {
        let removed = self.subscribers.write().await.remove(&subscriber.name);
        if removed.is_none() {
            return Ok(());
        }
        if subscriber.long_lived {
            debug!(queue = %subscriber.name, "Long-lived queue kept");
            return Ok(());
        }
        self.backend.delete_queue(&subscriber.queue_url).await?;
        info!(queue = %subscriber.name, "Deleted SQS queue");
        Ok(())
    }

    /// Every cached subscriber.
    pub async fn cached(&self) -> Vec<Subscriber> {
        self.subscribers.read().await.values().cloned().collect()
    }
}
