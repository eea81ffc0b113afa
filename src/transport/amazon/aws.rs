//! AWS SNS/SQS backend.
//!
//! Subscriptions deliver the full SNS notification envelope (raw message
//! delivery stays off), so the queue body is always an
//! [`SnsEnvelope`](super::SnsEnvelope).

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sns::Client as SnsClient;
use aws_sdk_sqs::types::QueueAttributeName;
use aws_sdk_sqs::Client as SqsClient;
use tracing::{debug, info};

use super::backend::{CloudBackend, QueueInfo, ReceivedMessage};
use crate::config::AmazonConfig;
use crate::error::{Result, XdError};

/// SNS topics and SQS queues in an AWS account (or LocalStack).
pub struct AwsBackend {
    sns: SnsClient,
    sqs: SqsClient,
    visibility_timeout_secs: i32,
}

impl AwsBackend {
    /// Build clients from the configured region, endpoint and credentials.
    ///
    /// Without explicit credentials the default provider chain is used.
    pub async fn connect(config: &AmazonConfig) -> Result<Self> {
        let mut builder = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if let Some(ref endpoint) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            builder = builder.credentials_provider(aws_sdk_sns::config::Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "xdmessaging",
            ));
        }

        let aws_config = builder.load().await;
        info!(
            region = %config.region,
            endpoint = ?config.endpoint_url,
            "Connected to AWS SNS/SQS"
        );

        Ok(Self {
            sns: SnsClient::new(&aws_config),
            sqs: SqsClient::new(&aws_config),
            visibility_timeout_secs: config.visibility_timeout_secs,
        })
    }
}

fn backend_error(action: &str, e: impl std::fmt::Display) -> XdError {
    XdError::Backend(format!("{}: {}", action, e))
}

/// Queue policy letting `topic_arn` send into the queue `queue_arn`.
fn publish_policy(queue_arn: &str, topic_arn: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "xdmessaging-topic-publish",
            "Effect": "Allow",
            "Principal": { "Service": "sns.amazonaws.com" },
            "Action": "sqs:SendMessage",
            "Resource": queue_arn,
            "Condition": { "ArnEquals": { "aws:SourceArn": topic_arn } }
        }]
    })
    .to_string()
}

#[async_trait]
impl CloudBackend for AwsBackend {
    async fn create_topic(&self, name: &str) -> Result<String> {
        let result = self
            .sns
            .create_topic()
            .name(name)
            .send()
            .await
            .map_err(|e| backend_error("Failed to create SNS topic", e))?;

        result
            .topic_arn()
            .map(str::to_string)
            .ok_or_else(|| XdError::Backend("SNS create_topic returned no ARN".to_string()))
    }

    async fn create_queue(&self, name: &str) -> Result<QueueInfo> {
        let created = self
            .sqs
            .create_queue()
            .queue_name(name)
            .attributes(
                QueueAttributeName::VisibilityTimeout,
                self.visibility_timeout_secs.to_string(),
            )
            .send()
            .await
            .map_err(|e| backend_error("Failed to create SQS queue", e))?;

        let url = created
            .queue_url()
            .ok_or_else(|| XdError::Backend("SQS create_queue returned no URL".to_string()))?
            .to_string();

        let attrs = self
            .sqs
            .get_queue_attributes()
            .queue_url(&url)
            .attribute_names(QueueAttributeName::QueueArn)
            .send()
            .await
            .map_err(|e| backend_error("Failed to get queue ARN", e))?;

        let arn = attrs
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::QueueArn))
            .ok_or_else(|| XdError::Backend("Queue has no ARN attribute".to_string()))?
            .to_string();

        debug!(queue = %name, url = %url, "Created/found SQS queue");
        Ok(QueueInfo { url, arn })
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<()> {
        self.sqs
            .delete_queue()
            .queue_url(queue_url)
            .send()
            .await
            .map_err(|e| backend_error("Failed to delete SQS queue", e))?;
        Ok(())
    }

    async fn allow_topic_publish(&self, queue: &QueueInfo, topic_arn: &str) -> Result<()> {
        self.sqs
            .set_queue_attributes()
            .queue_url(&queue.url)
            .attributes(
                QueueAttributeName::Policy,
                publish_policy(&queue.arn, topic_arn),
            )
            .send()
            .await
            .map_err(|e| backend_error("Failed to set queue policy", e))?;
        Ok(())
    }

    async fn subscribe(&self, topic_arn: &str, queue_arn: &str) -> Result<String> {
        let result = self
            .sns
            .subscribe()
            .topic_arn(topic_arn)
            .protocol("sqs")
            .endpoint(queue_arn)
            .return_subscription_arn(true)
            .send()
            .await
            .map_err(|e| backend_error("Failed to subscribe queue to topic", e))?;

        result
            .subscription_arn()
            .map(str::to_string)
            .ok_or_else(|| XdError::Backend("SNS subscribe returned no ARN".to_string()))
    }

    async fn unsubscribe(&self, subscription_arn: &str) -> Result<()> {
        self.sns
            .unsubscribe()
            .subscription_arn(subscription_arn)
            .send()
            .await
            .map_err(|e| backend_error("Failed to unsubscribe", e))?;
        Ok(())
    }

    async fn publish(&self, topic_arn: &str, subject: &str, message: &str) -> Result<()> {
        self.sns
            .publish()
            .topic_arn(topic_arn)
            .subject(subject)
            .message(message)
            .send()
            .await
            .map_err(|e| backend_error("Failed to publish to SNS", e))?;
        Ok(())
    }

    async fn receive(
        &self,
        queue_url: &str,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        let output = self
            .sqs
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait.as_secs().min(20) as i32)
            .send()
            .await
            .map_err(|e| backend_error("Failed to receive messages", e))?;

        Ok(output
            .messages()
            .iter()
            .filter_map(|m| {
                Some(ReceivedMessage {
                    body: m.body()?.to_string(),
                    receipt_handle: m.receipt_handle()?.to_string(),
                })
            })
            .collect())
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<()> {
        self.sqs
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| backend_error("Failed to delete message", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_policy_scopes_to_topic() {
        let policy: serde_json::Value =
            serde_json::from_str(&publish_policy("arn:q", "arn:t")).unwrap();
        let statement = &policy["Statement"][0];
        assert_eq!(statement["Resource"], "arn:q");
        assert_eq!(statement["Condition"]["ArnEquals"]["aws:SourceArn"], "arn:t");
    }
}
