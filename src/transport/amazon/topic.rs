//! Topic repository.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use super::backend::CloudBackend;
use super::naming::resource_name;
use crate::error::{Result, XdError};

/// A channel's SNS topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub name: String,
    pub arn: String,
}

/// Creates topics on first use and caches them per channel.
///
/// Topics are never deleted; recreating one is idempotent.
pub struct TopicRepository {
    backend: Arc<dyn CloudBackend>,
    app_key: String,
    topics: RwLock<HashMap<String, Topic>>,
}

impl TopicRepository {
    pub fn new(backend: Arc<dyn CloudBackend>, app_key: impl Into<String>) -> Self {
        Self {
            backend,
            app_key: app_key.into(),
            topics: RwLock::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn CloudBackend> {
        &self.backend
    }

    /// Topic of `channel`, created on the backend if needed.
    pub async fn get_topic(&self, channel: &str) -> Result<Topic> {
        if channel.is_empty() {
            return Err(XdError::empty("channel"));
        }

        // Check cache
        {
            let topics = self.topics.read().await;
            if let Some(topic) = topics.get(channel) {
                return Ok(topic.clone());
            }
        }

        let name = resource_name(&self.app_key, channel);
        let arn = self.backend.create_topic(&name).await?;
        let topic = Topic { name, arn };

        let mut topics = self.topics.write().await;
        let topic = topics
            .entry(channel.to_string())
            .or_insert(topic)
            .clone();
        info!(channel = %channel, topic = %topic.name, arn = %topic.arn, "Created/found SNS topic");
        Ok(topic)
    }
}
