//! Transport abstraction.
//!
//! This module contains:
//! - `Broadcaster` trait: sending datagrams to a channel
//! - `Listener` trait: channel registration and message delivery
//! - `MessageHandler` trait: observer invoked for each received datagram
//! - `TransportMode`: the transports a facade can build
//! - Implementations: file drop, window messaging, Amazon SNS/SQS

use std::any::type_name;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::datagram::DataGram;
use crate::error::{Result, XdError};
use crate::serializer::Serializer;

pub mod amazon;
pub mod dispatch;
pub mod file_drop;
pub mod window;

pub use dispatch::HandlerList;

// ============================================================================
// Traits
// ============================================================================

/// Observer for received datagrams.
pub trait MessageHandler: Send + Sync {
    /// Process a received datagram.
    fn handle(&self, datagram: Arc<DataGram>) -> BoxFuture<'static, Result<()>>;
}

/// Sending side of a transport.
///
/// Implementations:
/// - `FileDropBroadcaster`: message files in a shared directory
/// - `WindowBroadcaster`: copy-data to tagged windows
/// - `AmazonBroadcaster`: SNS topics
/// - `MulticastBroadcaster`, `NetworkRelayBroadcaster`: compositions
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Send an already validated datagram.
    async fn send_datagram(&self, datagram: DataGram) -> Result<()>;

    /// Whether the transport can currently deliver.
    fn is_alive(&self) -> bool;

    /// Send a string payload to a channel.
    ///
    /// Empty channel or message is rejected before any I/O.
    async fn send_to_channel(&self, channel: &str, message: &str) -> Result<()> {
        self.send_datagram(DataGram::from_string(channel, message)?)
            .await
    }
}

/// Object payload support for every broadcaster.
#[async_trait]
pub trait BroadcasterExt: Broadcaster {
    /// Serialize `message` with the injected serializer and send it with its
    /// Rust type name as the type hint.
    async fn send_object_to_channel<T>(
        &self,
        serializer: &dyn Serializer,
        channel: &str,
        message: &T,
    ) -> Result<()>
    where
        T: Serialize + Sync,
    {
        if channel.is_empty() {
            return Err(XdError::empty("channel"));
        }
        let value = serde_json::to_value(message)?;
        let text = serializer.serialize(&value)?;
        self.send_datagram(DataGram::new(channel, type_name::<T>(), text)?)
            .await
    }
}

impl<B: Broadcaster + ?Sized> BroadcasterExt for B {}

/// Receiving side of a transport.
///
/// Handlers added with [`Listener::add_handler`] are invoked for every valid
/// datagram received on a registered channel.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Start receiving messages for `channel`. Registering twice is a no-op.
    async fn register_channel(&self, channel: &str) -> Result<()>;

    /// Stop receiving messages for `channel`.
    async fn unregister_channel(&self, channel: &str) -> Result<()>;

    /// Add an observer for received datagrams.
    fn add_handler(&self, handler: Arc<dyn MessageHandler>);

    /// Whether the transport can currently receive.
    fn is_alive(&self) -> bool;

    /// Release every resource. Idempotent; afterwards register/unregister fail
    /// with the disposed-state error.
    async fn dispose(&self);
}

// ============================================================================
// Modes
// ============================================================================

/// Transport kinds a facade can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Shared-directory message files.
    FileDrop,
    /// Window property tagging + copy-data.
    Window,
    /// Amazon SNS topics and SQS queues.
    Amazon,
}

impl TransportMode {
    pub const ALL: [TransportMode; 3] = [
        TransportMode::FileDrop,
        TransportMode::Window,
        TransportMode::Amazon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::FileDrop => "file_drop",
            TransportMode::Window => "window",
            TransportMode::Amazon => "amazon",
        }
    }

    /// True for the transport that already spans machines.
    pub fn is_network(&self) -> bool {
        matches!(self, TransportMode::Amazon)
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportMode {
    type Err = XdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "file_drop" | "filedrop" | "iostream" => Ok(TransportMode::FileDrop),
            "window" | "highperformanceui" | "wm_copydata" => Ok(TransportMode::Window),
            "amazon" | "remotenetwork" | "sns_sqs" => Ok(TransportMode::Amazon),
            _ => Err(XdError::Configuration(format!(
                "Unknown transport mode: {}",
                s
            ))),
        }
    }
}
