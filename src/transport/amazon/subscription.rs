//! Subscription lifecycle.
//!
//! A subscription binds a topic to a subscriber queue and owns the poller
//! that drains the queue. Bindings are keyed by (topic ARN, queue URL); the
//! map hands out one slot per key atomically and each slot serializes its own
//! subscribe and unsubscribe calls, so concurrent registrations of the same
//! channel create one backend subscription and one poller. Releasing a binding
//! retires its slot and removes it from the map; a subscribe that raced onto a
//! retired slot starts over on a fresh one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::backend::CloudBackend;
use super::poller::{NotificationHandler, PollerHandle, QueuePoller};
use super::subscriber::{Subscriber, SubscriberRepository};
use super::topic::Topic;
use crate::config::AmazonConfig;
use crate::error::{Result, XdError};
use crate::sync::ResourceCounter;

type SubscriptionKey = (String, String);

/// How long a release waits for the poller to exit.
const POLLER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Live binding between a topic and a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub topic: Topic,
    pub subscriber: Subscriber,
    pub subscription_arn: Option<String>,
}

impl SubscriptionInfo {
    /// True iff a non-empty subscription identifier is held.
    pub fn is_subscribed(&self) -> bool {
        self.subscription_arn
            .as_deref()
            .is_some_and(|arn| !arn.is_empty())
    }
}

struct SlotState {
    info: SubscriptionInfo,
    poller: Option<PollerHandle>,
    retired: bool,
}

struct SubscriptionSlot {
    state: AsyncMutex<SlotState>,
    active: Arc<AtomicBool>,
}

/// Tracks every subscription of one facade.
pub struct SubscriptionService {
    backend: Arc<dyn CloudBackend>,
    subscribers: Arc<SubscriberRepository>,
    counter_root: PathBuf,
    max_messages: i32,
    wait: Duration,
    slots: Mutex<HashMap<SubscriptionKey, Arc<SubscriptionSlot>>>,
    disposed: AtomicBool,
}

impl SubscriptionService {
    pub fn new(
        backend: Arc<dyn CloudBackend>,
        subscribers: Arc<SubscriberRepository>,
        config: &AmazonConfig,
    ) -> Self {
        Self {
            backend,
            subscribers,
            counter_root: config.counter_path.clone(),
            max_messages: config.max_messages(),
            wait: Duration::from_secs(config.wait_time_secs() as u64),
            slots: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(XdError::Disposed("SubscriptionService"));
        }
        Ok(())
    }

    fn key(topic: &Topic, subscriber: &Subscriber) -> SubscriptionKey {
        (topic.arn.clone(), subscriber.queue_url.clone())
    }

    fn slot(&self, topic: &Topic, subscriber: &Subscriber) -> Arc<SubscriptionSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.entry(Self::key(topic, subscriber)).or_insert_with(|| {
            Arc::new(SubscriptionSlot {
                state: AsyncMutex::new(SlotState {
                    info: SubscriptionInfo {
                        topic: topic.clone(),
                        subscriber: subscriber.clone(),
                        subscription_arn: None,
                    },
                    poller: None,
                    retired: false,
                }),
                active: Arc::new(AtomicBool::new(false)),
            })
        });
        Arc::clone(slot)
    }

    fn counter(&self, subscriber: &Subscriber) -> ResourceCounter {
        ResourceCounter::new(&self.counter_root, &subscriber.name)
    }

    async fn run_counter<F>(&self, subscriber: &Subscriber, op: F) -> Result<u32>
    where
        F: FnOnce(&ResourceCounter) -> std::io::Result<u32> + Send + 'static,
    {
        let counter = self.counter(subscriber);
        let count = tokio::task::spawn_blocking(move || op(&counter))
            .await
            .map_err(|e| XdError::Transport(e.to_string()))??;
        Ok(count)
    }

    /// Subscribe `subscriber` to `topic` and start polling its queue.
    ///
    /// Calling again for the same pair returns the existing binding unchanged.
    pub async fn subscribe(
        &self,
        topic: &Topic,
        subscriber: &Subscriber,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<SubscriptionInfo> {
        self.ensure_usable()?;
        loop {
            let slot = self.slot(topic, subscriber);
            if let Some(result) = self
                .subscribe_slot(&slot, topic, subscriber, Arc::clone(&handler))
                .await
            {
                return result;
            }
        }
    }

    /// Subscribe through `slot`. `None` when the slot was retired meanwhile.
    async fn subscribe_slot(
        &self,
        slot: &SubscriptionSlot,
        topic: &Topic,
        subscriber: &Subscriber,
        handler: Arc<dyn NotificationHandler>,
    ) -> Option<Result<SubscriptionInfo>> {
        let mut state = slot.state.lock().await;
        if state.retired {
            return None;
        }
        if state.info.is_subscribed() {
            debug!(queue = %subscriber.name, topic = %topic.name, "Already subscribed");
            return Some(Ok(state.info.clone()));
        }

        if subscriber.long_lived {
            match self.run_counter(subscriber, |c| c.increment()).await {
                Ok(count) => debug!(queue = %subscriber.name, count, "Long-lived subscriber acquired"),
                Err(e) => return Some(Err(e)),
            }
        }

        let arn = match self.bind(topic, subscriber).await {
            Ok(arn) => arn,
            Err(e) => {
                if subscriber.long_lived {
                    let _ = self.run_counter(subscriber, |c| c.decrement()).await;
                }
                return Some(Err(e));
            }
        };

        slot.active.store(true, Ordering::SeqCst);
        state.poller = Some(
            QueuePoller {
                backend: Arc::clone(&self.backend),
                queue_url: subscriber.queue_url.clone(),
                max_messages: self.max_messages,
                wait: self.wait,
                active: Arc::clone(&slot.active),
                handler,
            }
            .start(),
        );
        state.info.subscription_arn = Some(arn);
        info!(queue = %subscriber.name, topic = %topic.name, "Subscribed queue to topic");
        Some(Ok(state.info.clone()))
    }

    async fn bind(&self, topic: &Topic, subscriber: &Subscriber) -> Result<String> {
        self.backend
            .allow_topic_publish(&subscriber.queue(), &topic.arn)
            .await?;
        self.backend.subscribe(&topic.arn, &subscriber.queue_arn).await
    }

    /// End the binding of `subscriber` to `topic`.
    ///
    /// The backend subscription is removed only for ephemeral subscribers or
    /// when the last local holder of a long-lived one lets go.
    pub async fn unsubscribe(&self, topic: &Topic, subscriber: &Subscriber) -> Result<()> {
        self.ensure_usable()?;
        self.release(topic, subscriber).await
    }

    async fn release(&self, topic: &Topic, subscriber: &Subscriber) -> Result<()> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            match slots.get(&Self::key(topic, subscriber)) {
                Some(slot) => Arc::clone(slot),
                None => return Ok(()),
            }
        };

        let mut state = slot.state.lock().await;
        if state.retired {
            return Ok(());
        }
        slot.active.store(false, Ordering::SeqCst);
        state.retired = true;
        {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let key = Self::key(topic, subscriber);
            if slots.get(&key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                slots.remove(&key);
            }
        }
        if let Some(poller) = state.poller.take() {
            poller.shutdown(POLLER_SHUTDOWN_GRACE).await;
        }
        let Some(arn) = state.info.subscription_arn.take() else {
            return Ok(());
        };

        let remove = if subscriber.long_lived {
            let remaining = self.run_counter(subscriber, |c| c.decrement()).await?;
            debug!(queue = %subscriber.name, remaining, "Long-lived subscriber released");
            remaining == 0
        } else {
            true
        };

        if remove {
            self.backend.unsubscribe(&arn).await?;
            info!(queue = %subscriber.name, topic = %topic.name, "Unsubscribed queue from topic");
        }
        Ok(())
    }

    /// Current binding of the pair, if one is tracked.
    pub async fn subscription(&self, topic: &Topic, subscriber: &Subscriber) -> Option<SubscriptionInfo> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.get(&Self::key(topic, subscriber)).cloned()
        }?;
        let state = slot.state.lock().await;
        Some(state.info.clone())
    }

    /// Whether the pair is subscribed right now.
    pub async fn is_subscribed(&self, topic: &Topic, subscriber: &Subscriber) -> bool {
        self.subscription(topic, subscriber)
            .await
            .is_some_and(|info| info.is_subscribed())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Number of bindings currently tracked.
    pub fn binding_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Stop every poller, release every subscription and expire every cached
    /// subscriber. Idempotent; later subscribe calls fail as disposed.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let slots: Vec<_> = self
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for slot in slots {
            let (topic, subscriber) = {
                let state = slot.state.lock().await;
                (state.info.topic.clone(), state.info.subscriber.clone())
            };
            if let Err(e) = self.release(&topic, &subscriber).await {
                warn!(queue = %subscriber.name, error = %e, "Failed to release subscription");
            }
        }

        for subscriber in self.subscribers.cached().await {
            if let Err(e) = self.subscribers.expire_subscriber(&subscriber).await {
                warn!(queue = %subscriber.name, error = %e, "Failed to expire subscriber");
            }
        }
        info!("Subscription service disposed");
    }
}

impl Drop for SubscriptionService {
    fn drop(&mut self) {
        let slots = self.slots.get_mut().unwrap_or_else(|e| e.into_inner());
        for slot in slots.values() {
            slot.active.store(false, Ordering::SeqCst);
            if let Ok(mut state) = slot.state.try_lock() {
                if let Some(poller) = state.poller.take() {
                    poller.stop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::amazon::{InMemoryBackend, SnsEnvelope, TopicRepository};
    use futures::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct Count(Arc<AtomicUsize>);

    impl NotificationHandler for Count {
        fn handle(&self, _envelope: SnsEnvelope) -> BoxFuture<'static, Result<()>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        topics: TopicRepository,
        subscribers: Arc<SubscriberRepository>,
        service: Arc<SubscriptionService>,
        _counters: TempDir,
    }

    fn fixture() -> Fixture {
        let counters = TempDir::new().unwrap();
        let backend = Arc::new(InMemoryBackend::new());
        let config = AmazonConfig {
            wait_time_secs: 1,
            ..AmazonConfig::default().with_counter_path(counters.path())
        };
        let subscribers = Arc::new(SubscriberRepository::new(backend.clone(), "app"));
        let service = Arc::new(SubscriptionService::new(
            backend.clone(),
            Arc::clone(&subscribers),
            &config,
        ));
        Fixture {
            topics: TopicRepository::new(backend.clone(), "app"),
            backend,
            subscribers,
            service,
            _counters: counters,
        }
    }

    fn handler() -> Arc<dyn NotificationHandler> {
        Arc::new(Count(Arc::new(AtomicUsize::new(0))))
    }

    #[tokio::test]
    async fn test_subscribe_twice_subscribes_once() {
        let f = fixture();
        let topic = f.topics.get_topic("Status").await.unwrap();
        let sub = f.subscribers.get_subscriber("Status", "i1", false).await.unwrap();

        let first = f.service.subscribe(&topic, &sub, handler()).await.unwrap();
        assert!(first.is_subscribed());
        let second = f.service.subscribe(&topic, &sub, handler()).await.unwrap();

        assert!(second.is_subscribed());
        assert_eq!(first.subscription_arn, second.subscription_arn);
        assert_eq!(f.backend.subscription_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_creates_one_binding() {
        let f = fixture();
        let topic = f.topics.get_topic("Status").await.unwrap();
        let sub = f.subscribers.get_subscriber("Status", "i1", false).await.unwrap();

        let calls: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&f.service);
                let (topic, sub) = (topic.clone(), sub.clone());
                tokio::spawn(async move { service.subscribe(&topic, &sub, handler()).await })
            })
            .collect();
        let mut arns = Vec::new();
        for call in calls {
            arns.push(call.await.unwrap().unwrap().subscription_arn);
        }

        arns.dedup();
        assert_eq!(arns.len(), 1);
        assert_eq!(f.backend.subscription_count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_clears_binding() {
        let f = fixture();
        let topic = f.topics.get_topic("Status").await.unwrap();
        let sub = f.subscribers.get_subscriber("Status", "i1", false).await.unwrap();
        f.service.subscribe(&topic, &sub, handler()).await.unwrap();

        f.service.unsubscribe(&topic, &sub).await.unwrap();

        assert!(!f.service.is_subscribed(&topic, &sub).await);
        assert_eq!(f.backend.subscription_count(), 0);
        assert_eq!(f.service.binding_count(), 0);
        // Unsubscribing again is harmless.
        f.service.unsubscribe(&topic, &sub).await.unwrap();
    }

    #[tokio::test]
    async fn test_long_lived_subscription_is_reference_counted() {
        let f = fixture();
        let other = SubscriptionService::new(
            f.backend.clone(),
            Arc::new(SubscriberRepository::new(f.backend.clone(), "app")),
            &AmazonConfig::default().with_counter_path(f._counters.path()),
        );
        let topic = f.topics.get_topic("Relay").await.unwrap();
        let sub = f.subscribers.get_subscriber("Relay", "HOST", true).await.unwrap();

        f.service.subscribe(&topic, &sub, handler()).await.unwrap();
        other.subscribe(&topic, &sub, handler()).await.unwrap();
        assert_eq!(f.backend.subscription_count(), 1);

        f.service.unsubscribe(&topic, &sub).await.unwrap();
        assert_eq!(f.backend.subscription_count(), 1);
        assert!(!f.service.is_subscribed(&topic, &sub).await);

        other.unsubscribe(&topic, &sub).await.unwrap();
        assert_eq!(f.backend.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_dispose_releases_everything_and_is_terminal() {
        let f = fixture();
        for channel in ["a", "b", "c"] {
            let topic = f.topics.get_topic(channel).await.unwrap();
            let sub = f.subscribers.get_subscriber(channel, "i1", false).await.unwrap();
            f.service.subscribe(&topic, &sub, handler()).await.unwrap();
        }
        assert_eq!(f.backend.queue_names().len(), 3);

        f.service.dispose().await;
        f.service.dispose().await;

        assert_eq!(f.backend.subscription_count(), 0);
        assert!(f.backend.queue_names().is_empty());
        let topic = f.topics.get_topic("a").await.unwrap();
        let sub = Subscriber {
            name: "x".to_string(),
            queue_url: "memory://queue/x".to_string(),
            queue_arn: "arn:x".to_string(),
            long_lived: false,
        };
        let err = f.service.subscribe(&topic, &sub, handler()).await.unwrap_err();
        assert!(err.is_disposed());
        assert!(f.service.unsubscribe(&topic, &sub).await.unwrap_err().is_disposed());
    }

    #[tokio::test]
    async fn test_released_bindings_are_forgotten() {
        let f = fixture();
        let topic = f.topics.get_topic("Status").await.unwrap();

        for i in 0..50 {
            let sub = f
                .subscribers
                .get_subscriber("Status", &format!("i{i}"), false)
                .await
                .unwrap();
            f.service.subscribe(&topic, &sub, handler()).await.unwrap();
            f.service.unsubscribe(&topic, &sub).await.unwrap();
            f.subscribers.expire_subscriber(&sub).await.unwrap();
        }

        assert_eq!(f.service.binding_count(), 0);
        assert!(f.backend.queue_names().is_empty());
    }

    #[tokio::test]
    async fn test_resubscribe_after_release_binds_again() {
        let f = fixture();
        let topic = f.topics.get_topic("Status").await.unwrap();
        let sub = f.subscribers.get_subscriber("Status", "i1", false).await.unwrap();

        f.service.subscribe(&topic, &sub, handler()).await.unwrap();
        f.service.unsubscribe(&topic, &sub).await.unwrap();
        let again = f.service.subscribe(&topic, &sub, handler()).await.unwrap();

        assert!(again.is_subscribed());
        assert_eq!(f.backend.subscription_count(), 1);
        assert_eq!(f.service.binding_count(), 1);
    }
}
