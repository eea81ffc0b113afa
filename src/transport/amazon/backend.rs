//! Cloud backend seam.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A queue and its backend-native identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueInfo {
    pub url: String,
    pub arn: String,
}

/// A message pulled from a queue, invisible to other pollers until deleted
/// or its visibility timeout passes.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub body: String,
    pub receipt_handle: String,
}

/// SNS notification envelope as it arrives in a subscribed SQS queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnsEnvelope {
    #[serde(rename = "Type", default = "notification_type")]
    pub kind: String,
    #[serde(rename = "MessageId", default)]
    pub message_id: String,
    #[serde(rename = "TopicArn", default)]
    pub topic_arn: String,
    #[serde(rename = "Subject", default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Timestamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

fn notification_type() -> String {
    "Notification".to_string()
}

impl SnsEnvelope {
    pub fn notification(
        message_id: impl Into<String>,
        topic_arn: impl Into<String>,
        subject: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: notification_type(),
            message_id: message_id.into(),
            topic_arn: topic_arn.into(),
            subject: subject.map(str::to_string),
            message: message.into(),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

/// Topic and queue operations of the pub/sub backend.
///
/// Create calls are idempotent: creating an existing resource returns it.
#[async_trait]
pub trait CloudBackend: Send + Sync {
    /// Create or retrieve a topic. Returns its ARN.
    async fn create_topic(&self, name: &str) -> Result<String>;

    /// Create or retrieve a queue.
    async fn create_queue(&self, name: &str) -> Result<QueueInfo>;

    async fn delete_queue(&self, queue_url: &str) -> Result<()>;

    /// Allow `topic_arn` to deliver into `queue`.
    async fn allow_topic_publish(&self, queue: &QueueInfo, topic_arn: &str) -> Result<()>;

    /// Subscribe a queue to a topic. Returns the subscription ARN.
    async fn subscribe(&self, topic_arn: &str, queue_arn: &str) -> Result<String>;

    async fn unsubscribe(&self, subscription_arn: &str) -> Result<()>;

    async fn publish(&self, topic_arn: &str, subject: &str, message: &str) -> Result<()>;

    /// Receive up to `max_messages`, waiting up to `wait` for the first one.
    async fn receive(
        &self,
        queue_url: &str,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>>;

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<()>;
}
