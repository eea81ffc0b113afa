//! Amazon SNS/SQS transport.
//!
//! Each channel maps to one SNS topic; each listener registration maps to an
//! SQS queue subscribed to that topic. Messages published to the topic reach
//! the queue wrapped in the SNS notification envelope, which the listener
//! unwraps before decoding the datagram.
//!
//! ```text
//! AmazonBroadcaster --publish--> topic {app}-{channel}
//!                                   |
//!                          SNS fan-out (envelope)
//!                                   v
//! AmazonListener <--QueuePoller-- queue {app}-{instance}-{channel}
//! ```
//!
//! Large datagrams are published as fragments and reassembled on receipt.
//! Long-lived queues are shared by every process on a machine and reference
//! counted with a [`ResourceCounter`](crate::sync::ResourceCounter).

mod backend;
mod broadcaster;
mod listener;
mod memory;
mod naming;
mod poller;
mod subscriber;
mod subscription;
mod topic;

#[cfg(feature = "sns-sqs")]
mod aws;

pub use backend::{CloudBackend, QueueInfo, ReceivedMessage, SnsEnvelope};
pub use broadcaster::AmazonBroadcaster;
pub use listener::AmazonListener;
pub use memory::InMemoryBackend;
pub use naming::{resource_name, MAX_NAME_LENGTH};
pub use poller::{NotificationHandler, PollerHandle, QueuePoller};
pub use subscriber::{Subscriber, SubscriberRepository};
pub use subscription::{SubscriptionInfo, SubscriptionService};
pub use topic::{Topic, TopicRepository};

#[cfg(feature = "sns-sqs")]
pub use aws::AwsBackend;

/// Subject of notifications carrying a whole encoded datagram.
pub const SUBJECT_DATAGRAM: &str = "datagram";

/// Subject of notifications carrying one fragment of an encoded datagram.
pub const SUBJECT_FRAGMENT: &str = "fragment";
