//! Network relay.
//!
//! Composes a local transport with the Amazon transport so that local
//! traffic also reaches other machines:
//!
//! - [`NetworkRelayBroadcaster`] wraps every outgoing datagram in a
//!   [`RelayEnvelope`] and publishes it on the relay channel of its mode.
//! - [`RelayLink`] consumes the relay channel and rebroadcasts envelopes
//!   from other machines onto the local transport, once per process.
//! - [`NetworkRelayListener`] pairs a local listener with a hold on the
//!   link of its mode.
//!
//! Relay channels are namespaced by transport mode so relays for different
//! local transports never see each other's traffic.

mod broadcaster;
mod link;
mod listener;

pub use broadcaster::NetworkRelayBroadcaster;
pub use link::RelayLink;
pub use listener::NetworkRelayListener;

use std::any::type_name;

use serde::{Deserialize, Serialize};

use crate::datagram::DataGram;
use crate::error::Result;
use crate::transport::TransportMode;
use crate::utils::machine::same_machine;

/// Prefix of every relay channel name.
pub const RELAY_CHANNEL_PREFIX: &str = "XDMessaging.NetworkRelay";

/// Relay channel carrying traffic of the `mode` transport.
pub fn relay_channel(mode: TransportMode) -> String {
    format!("{}.{}", RELAY_CHANNEL_PREFIX, mode)
}

/// A locally broadcast datagram, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayEnvelope {
    pub machine_name: String,
    pub mode: TransportMode,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
    pub message: String,
}

impl RelayEnvelope {
    pub fn wrap(machine_name: impl Into<String>, mode: TransportMode, datagram: &DataGram) -> Self {
        Self {
            machine_name: machine_name.into(),
            mode,
            channel: datagram.channel().to_string(),
            type_hint: datagram.type_hint().ok().map(str::to_string),
            message: datagram.message().to_string(),
        }
    }

    /// True when the envelope was sent from `machine_name`.
    pub fn is_from(&self, machine_name: &str) -> bool {
        same_machine(&self.machine_name, machine_name)
    }

    /// The relay datagram published on the mode's relay channel.
    pub fn to_relay_datagram(&self) -> Result<DataGram> {
        DataGram::new(
            relay_channel(self.mode),
            type_name::<RelayEnvelope>(),
            serde_json::to_string(self)?,
        )
    }

    /// The original datagram, as it was broadcast on the sending machine.
    pub fn unwrap_datagram(&self) -> Result<DataGram> {
        match self.type_hint {
            Some(ref hint) => DataGram::new(&self.channel, hint, &self.message),
            None => Ok(DataGram::legacy(&self.channel, &self.message)),
        }
    }
}
