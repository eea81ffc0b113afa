//! XDMessaging - cross-process publish/subscribe
//!
//! Independent processes exchange named-channel messages through
//! interchangeable transports:
//!
//! - file drop: message files in a shared directory
//! - window messaging: copy-data sent to windows tagged with the channel
//! - Amazon SNS/SQS: topics per channel, queues per subscriber
//!
//! Local transports can be relayed over Amazon so messages also reach other
//! machines. The [`facade::XdMessaging`] entry point composes a broadcaster
//! or listener for a transport mode.

pub mod config;
pub mod datagram;
pub mod error;
pub mod facade;
pub mod fragment;
pub mod multicast;
pub mod relay;
pub mod serializer;
pub mod sync;
pub mod transport;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::Config;
pub use datagram::{DataGram, TypedDataGram};
pub use error::{Result, XdError};
pub use facade::{XdMessaging, XdMessagingBuilder};
pub use serializer::{JsonSerializer, Serializer};
pub use transport::{
    Broadcaster, BroadcasterExt, HandlerList, Listener, MessageHandler, TransportMode,
};
