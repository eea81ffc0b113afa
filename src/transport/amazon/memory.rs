//! In-memory SNS/SQS backend.
//!
//! Follows the semantics the transport relies on: idempotent creates, topic
//! fan-out into every subscribed queue that allows the topic, notification
//! envelopes as message bodies, long-poll receive and visibility timeouts.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use super::backend::{CloudBackend, QueueInfo, ReceivedMessage, SnsEnvelope};
use crate::error::{Result, XdError};

const ARN_PREFIX: &str = "arn:aws:memory:local:000000000000";

/// Upper bound between checks while long-polling, in case a wakeup is missed.
const POLL_SLICE: Duration = Duration::from_millis(50);

struct MemoryQueue {
    info: QueueInfo,
    allowed_topics: HashSet<String>,
    ready: VecDeque<String>,
    in_flight: HashMap<String, (String, Instant)>,
}

#[derive(Default)]
struct MemoryState {
    topics: HashMap<String, HashMap<String, String>>,
    queues: HashMap<String, MemoryQueue>,
    queue_urls: HashMap<String, String>,
}

/// Backend living inside the process.
pub struct InMemoryBackend {
    state: Mutex<MemoryState>,
    arrivals: Notify,
    visibility_timeout: Duration,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            arrivals: Notify::new(),
            visibility_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Names of existing queues.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state().queue_urls.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of live subscriptions across all topics.
    pub fn subscription_count(&self) -> usize {
        self.state().topics.values().map(HashMap::len).sum()
    }

    /// Messages waiting or in flight in a queue.
    pub fn queue_depth(&self, queue_url: &str) -> usize {
        self.state()
            .queues
            .get(queue_url)
            .map(|q| q.ready.len() + q.in_flight.len())
            .unwrap_or(0)
    }

    fn take_ready(&self, queue_url: &str, max_messages: usize) -> Result<Vec<ReceivedMessage>> {
        let mut state = self.state();
        let queue = state
            .queues
            .get_mut(queue_url)
            .ok_or_else(|| XdError::Backend(format!("queue does not exist: {}", queue_url)))?;

        // Expired in-flight messages become visible again.
        let now = Instant::now();
        let expired: Vec<_> = queue
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some((body, _)) = queue.in_flight.remove(&receipt) {
                queue.ready.push_back(body);
            }
        }

        let mut received = Vec::new();
        while received.len() < max_messages {
            let Some(body) = queue.ready.pop_front() else {
                break;
            };
            let receipt = Uuid::new_v4().to_string();
            queue
                .in_flight
                .insert(receipt.clone(), (body.clone(), now + self.visibility_timeout));
            received.push(ReceivedMessage {
                body,
                receipt_handle: receipt,
            });
        }
        Ok(received)
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CloudBackend for InMemoryBackend {
    async fn create_topic(&self, name: &str) -> Result<String> {
        let arn = format!("{}:{}", ARN_PREFIX, name);
        self.state().topics.entry(arn.clone()).or_default();
        Ok(arn)
    }

    async fn create_queue(&self, name: &str) -> Result<QueueInfo> {
        let mut state = self.state();
        if let Some(url) = state.queue_urls.get(name) {
            if let Some(queue) = state.queues.get(url) {
                return Ok(queue.info.clone());
            }
        }
        let info = QueueInfo {
            url: format!("memory://queue/{}", name),
            arn: format!("{}:{}", ARN_PREFIX, name),
        };
        state.queue_urls.insert(name.to_string(), info.url.clone());
        state.queues.insert(
            info.url.clone(),
            MemoryQueue {
                info: info.clone(),
                allowed_topics: HashSet::new(),
                ready: VecDeque::new(),
                in_flight: HashMap::new(),
            },
        );
        debug!(queue = %name, "Created in-memory queue");
        Ok(info)
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<()> {
        let mut state = self.state();
        if state.queues.remove(queue_url).is_some() {
            state.queue_urls.retain(|_, url| url != queue_url);
        }
        Ok(())
    }

    async fn allow_topic_publish(&self, queue: &QueueInfo, topic_arn: &str) -> Result<()> {
        let mut state = self.state();
        let queue = state
            .queues
            .get_mut(&queue.url)
            .ok_or_else(|| XdError::Backend(format!("queue does not exist: {}", queue.url)))?;
        queue.allowed_topics.insert(topic_arn.to_string());
        Ok(())
    }

    async fn subscribe(&self, topic_arn: &str, queue_arn: &str) -> Result<String> {
        let mut state = self.state();
        let subscriptions = state
            .topics
            .get_mut(topic_arn)
            .ok_or_else(|| XdError::Backend(format!("topic does not exist: {}", topic_arn)))?;

        if let Some((arn, _)) = subscriptions.iter().find(|(_, q)| *q == queue_arn) {
            return Ok(arn.clone());
        }
        let arn = format!("{}:{}", topic_arn, Uuid::new_v4());
        subscriptions.insert(arn.clone(), queue_arn.to_string());
        Ok(arn)
    }

    async fn unsubscribe(&self, subscription_arn: &str) -> Result<()> {
        for subscriptions in self.state().topics.values_mut() {
            subscriptions.remove(subscription_arn);
        }
        Ok(())
    }

    async fn publish(&self, topic_arn: &str, subject: &str, message: &str) -> Result<()> {
        {
            let mut state = self.state();
            let targets: Vec<String> = state
                .topics
                .get(topic_arn)
                .ok_or_else(|| XdError::Backend(format!("topic does not exist: {}", topic_arn)))?
                .values()
                .cloned()
                .collect();

            let envelope = SnsEnvelope::notification(
                Uuid::new_v4().to_string(),
                topic_arn,
                Some(subject),
                message,
            );
            let body = serde_json::to_string(&envelope)?;

            for queue in state.queues.values_mut() {
                if targets.contains(&queue.info.arn) && queue.allowed_topics.contains(topic_arn) {
                    queue.ready.push_back(body.clone());
                }
            }
        }
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn receive(
        &self,
        queue_url: &str,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        let max_messages = max_messages.clamp(1, 10) as usize;
        let deadline = Instant::now() + wait;
        loop {
            let received = self.take_ready(queue_url, max_messages)?;
            let now = Instant::now();
            if !received.is_empty() || now >= deadline {
                return Ok(received);
            }
            let slice = (deadline - now).min(POLL_SLICE);
            let _ = tokio::time::timeout(slice, self.arrivals.notified()).await;
        }
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<()> {
        if let Some(queue) = self.state().queues.get_mut(queue_url) {
            queue.in_flight.remove(receipt_handle);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn wired(backend: &InMemoryBackend) -> (String, QueueInfo) {
        let topic = backend.create_topic("app-status").await.unwrap();
        let queue = backend.create_queue("app-q-status").await.unwrap();
        backend.allow_topic_publish(&queue, &topic).await.unwrap();
        backend.subscribe(&topic, &queue.arn).await.unwrap();
        (topic, queue)
    }

    #[tokio::test]
    async fn test_creates_are_idempotent() {
        let backend = InMemoryBackend::new();
        let a = backend.create_queue("q").await.unwrap();
        let b = backend.create_queue("q").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(
            backend.create_topic("t").await.unwrap(),
            backend.create_topic("t").await.unwrap()
        );
        let (topic, queue) = wired(&backend).await;
        let first = backend.subscribe(&topic, &queue.arn).await.unwrap();
        let second = backend.subscribe(&topic, &queue.arn).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_publish_fans_out_as_notification_envelope() {
        let backend = InMemoryBackend::new();
        let (topic, queue) = wired(&backend).await;

        backend.publish(&topic, "datagram", "payload").await.unwrap();

        let received = backend
            .receive(&queue.url, 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
        let envelope: SnsEnvelope = serde_json::from_str(&received[0].body).unwrap();
        assert_eq!(envelope.subject.as_deref(), Some("datagram"));
        assert_eq!(envelope.message, "payload");
        assert_eq!(envelope.topic_arn, topic);
    }

    #[tokio::test]
    async fn test_queue_without_policy_gets_nothing() {
        let backend = InMemoryBackend::new();
        let topic = backend.create_topic("t").await.unwrap();
        let queue = backend.create_queue("q").await.unwrap();
        backend.subscribe(&topic, &queue.arn).await.unwrap();

        backend.publish(&topic, "datagram", "x").await.unwrap();
        assert_eq!(backend.queue_depth(&queue.url), 0);
    }

    #[tokio::test]
    async fn test_long_poll_wakes_on_publish() {
        let backend = std::sync::Arc::new(InMemoryBackend::new());
        let (topic, queue) = wired(&backend).await;

        let poller = {
            let backend = backend.clone();
            let url = queue.url.clone();
            tokio::spawn(async move { backend.receive(&url, 1, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        backend.publish(&topic, "datagram", "late").await.unwrap();

        let received = poller.await.unwrap().unwrap();
        assert_eq!(received.len(), 1);
    }

    #[tokio::test]
    async fn test_undeleted_message_is_redelivered_after_visibility_timeout() {
        let backend = InMemoryBackend::new().with_visibility_timeout(Duration::from_millis(30));
        let (topic, queue) = wired(&backend).await;
        backend.publish(&topic, "datagram", "again").await.unwrap();

        let first = backend.receive(&queue.url, 1, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(backend
            .receive(&queue.url, 1, Duration::ZERO)
            .await
            .unwrap()
            .is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = backend.receive(&queue.url, 1, Duration::ZERO).await.unwrap();
        assert_eq!(second.len(), 1);
        backend
            .delete_message(&queue.url, &second[0].receipt_handle)
            .await
            .unwrap();
        assert_eq!(backend.queue_depth(&queue.url), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_and_delete_queue() {
        let backend = InMemoryBackend::new();
        let topic = backend.create_topic("t").await.unwrap();
        let queue = backend.create_queue("q").await.unwrap();
        let sub = backend.subscribe(&topic, &queue.arn).await.unwrap();
        assert_eq!(backend.subscription_count(), 1);

        backend.unsubscribe(&sub).await.unwrap();
        backend.delete_queue(&queue.url).await.unwrap();

        assert_eq!(backend.subscription_count(), 0);
        assert!(backend.queue_names().is_empty());
        assert!(backend.receive(&queue.url, 1, Duration::ZERO).await.is_err());
    }
}
