//! Amazon broadcaster.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::topic::TopicRepository;
use super::{SUBJECT_DATAGRAM, SUBJECT_FRAGMENT};
use crate::config::AmazonConfig;
use crate::datagram::DataGram;
use crate::error::{Result, XdError};
use crate::fragment;
use crate::transport::Broadcaster;

/// Publishes datagrams to the channel's SNS topic.
pub struct AmazonBroadcaster {
    topics: Arc<TopicRepository>,
    alive: bool,
    max_message_bytes: usize,
    fragment_chunk_bytes: usize,
}

impl AmazonBroadcaster {
    pub fn new(topics: Arc<TopicRepository>, config: &AmazonConfig) -> Self {
        Self {
            topics,
            alive: config.has_credentials(),
            max_message_bytes: config.max_message_bytes,
            fragment_chunk_bytes: config.fragment_chunk_bytes(),
        }
    }
}

#[async_trait]
impl Broadcaster for AmazonBroadcaster {
    async fn send_datagram(&self, datagram: DataGram) -> Result<()> {
        if datagram.channel().is_empty() {
            return Err(XdError::empty("channel"));
        }
        if datagram.message().is_empty() {
            return Err(XdError::empty("message"));
        }
        if !self.alive {
            return Err(XdError::Configuration(
                "Amazon credentials are not configured".to_string(),
            ));
        }

        let topic = self.topics.get_topic(datagram.channel()).await?;
        let encoded = datagram.encode()?;
        let backend = self.topics.backend();

        if encoded.len() <= self.max_message_bytes {
            backend
                .publish(&topic.arn, SUBJECT_DATAGRAM, &encoded)
                .await?;
            debug!(channel = %datagram.channel(), topic = %topic.name, "Published datagram");
            return Ok(());
        }

        let fragments = fragment::split(&encoded, self.fragment_chunk_bytes);
        let count = fragments.len();
        for piece in fragments {
            let body = serde_json::to_string(&piece)?;
            backend.publish(&topic.arn, SUBJECT_FRAGMENT, &body).await?;
        }
        debug!(channel = %datagram.channel(), topic = %topic.name, fragments = count, "Published fragmented datagram");
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::Fragment;
    use crate::transport::amazon::{CloudBackend, InMemoryBackend, SnsEnvelope};
    use std::time::Duration;

    async fn setup(config: AmazonConfig) -> (Arc<InMemoryBackend>, AmazonBroadcaster, String) {
        let backend = Arc::new(InMemoryBackend::new());
        let topics = Arc::new(TopicRepository::new(backend.clone(), "app"));
        let topic = topics.get_topic("Status").await.unwrap();
        let queue = backend.create_queue("observer").await.unwrap();
        backend.allow_topic_publish(&queue, &topic.arn).await.unwrap();
        backend.subscribe(&topic.arn, &queue.arn).await.unwrap();
        (backend, AmazonBroadcaster::new(topics, &config), queue.url)
    }

    async fn drain(backend: &InMemoryBackend, url: &str) -> Vec<SnsEnvelope> {
        let mut envelopes = Vec::new();
        loop {
            let batch = backend.receive(url, 10, Duration::ZERO).await.unwrap();
            if batch.is_empty() {
                return envelopes;
            }
            for message in batch {
                envelopes.push(serde_json::from_str(&message.body).unwrap());
            }
        }
    }

    #[tokio::test]
    async fn test_without_credentials_is_not_alive() {
        let (_, broadcaster, _) = setup(AmazonConfig::default()).await;
        assert!(!broadcaster.is_alive());
        let err = broadcaster.send_to_channel("Status", "x").await.unwrap_err();
        assert!(matches!(err, XdError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_small_datagram_is_published_whole() {
        let (backend, broadcaster, url) = setup(AmazonConfig::with_credentials("a", "s")).await;

        broadcaster.send_to_channel("Status", "hello").await.unwrap();

        let envelopes = drain(&backend, &url).await;
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].subject.as_deref(), Some(SUBJECT_DATAGRAM));
        let datagram = DataGram::decode(&envelopes[0].message).unwrap();
        assert_eq!(datagram.message(), "hello");
    }

    #[tokio::test]
    async fn test_large_datagram_is_fragmented() {
        let config = AmazonConfig {
            max_message_bytes: 100,
            ..AmazonConfig::with_credentials("a", "s")
        };
        let (backend, broadcaster, url) = setup(config).await;

        broadcaster
            .send_to_channel("Status", &"z".repeat(300))
            .await
            .unwrap();

        let envelopes = drain(&backend, &url).await;
        assert!(envelopes.len() > 1);
        for envelope in &envelopes {
            assert_eq!(envelope.subject.as_deref(), Some(SUBJECT_FRAGMENT));
            let piece: Fragment = serde_json::from_str(&envelope.message).unwrap();
            assert_eq!(piece.count as usize, envelopes.len());
        }
    }
}
