//! Versioned wire message.
//!
//! A `DataGram` carries the channel, the payload and a type hint naming the
//! payload's original type. Two schema versions exist on the wire:
//!
//! - `1.0`: channel and message only. Reading the type hint fails.
//! - `1.1`: adds the type hint (`assemblyQualifiedName` on the wire).
//!
//! Every transport encodes with [`DataGram::encode`] and decodes with
//! [`DataGram::decode`]; transports that fragment payloads reassemble the full
//! string before decoding.

use std::any::type_name;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, XdError};
use crate::serializer::Serializer;

/// Schema tag of payloads without a type hint.
pub const LEGACY_VERSION: &str = "1.0";

/// Schema tag written by this crate.
pub const CURRENT_VERSION: &str = "1.1";

fn legacy_version() -> String {
    LEGACY_VERSION.to_string()
}

/// Type hint for plain string payloads.
pub fn string_type_hint() -> &'static str {
    type_name::<String>()
}

/// The versioned envelope sent over every transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataGram {
    #[serde(default = "legacy_version")]
    version: String,
    channel: String,
    #[serde(
        rename = "assemblyQualifiedName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    type_hint: Option<String>,
    message: String,
}

impl DataGram {
    /// Create a current-version datagram.
    ///
    /// Rejects an empty channel or message before any I/O happens.
    pub fn new(
        channel: impl Into<String>,
        type_hint: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<Self> {
        let channel = channel.into();
        let message = message.into();
        if channel.is_empty() {
            return Err(XdError::empty("channel"));
        }
        if message.is_empty() {
            return Err(XdError::empty("message"));
        }
        Ok(Self {
            version: CURRENT_VERSION.to_string(),
            channel,
            type_hint: Some(type_hint.into()),
            message,
        })
    }

    /// Create a datagram carrying a plain string payload.
    pub fn from_string(channel: impl Into<String>, message: impl Into<String>) -> Result<Self> {
        Self::new(channel, string_type_hint(), message)
    }

    /// Create a version `1.0` datagram (no type hint).
    pub fn legacy(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            version: LEGACY_VERSION.to_string(),
            channel: channel.into(),
            type_hint: None,
            message: message.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The payload's original type name.
    ///
    /// Version `1.0` datagrams predate the type hint and fail with
    /// `UnsupportedOperation`.
    pub fn type_hint(&self) -> Result<&str> {
        if self.version == LEGACY_VERSION {
            return Err(XdError::UnsupportedOperation(
                "type hint is not available on version 1.0 datagrams".to_string(),
            ));
        }
        Ok(self.type_hint.as_deref().unwrap_or(string_type_hint()))
    }

    /// Valid iff channel and message are both non-empty.
    pub fn is_valid(&self) -> bool {
        !self.channel.is_empty() && !self.message.is_empty()
    }

    /// Serialize to the wire form.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the wire form. Missing version means `1.0`.
    pub fn decode(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Parse the wire form, treating malformed or invalid payloads as no message.
    pub fn decode_valid(data: &str) -> Option<Self> {
        match Self::decode(data) {
            Ok(datagram) if datagram.is_valid() => Some(datagram),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed datagram");
                None
            }
        }
    }
}

/// A datagram whose payload has been resolved to `T`.
///
/// Built explicitly with [`TypedDataGram::try_from_datagram`]; a type hint that
/// does not name `T` is an `UnsupportedMessageType` error.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedDataGram<T> {
    pub channel: String,
    pub message: T,
}

impl<T: DeserializeOwned> TypedDataGram<T> {
    pub fn try_from_datagram(datagram: &DataGram, serializer: &dyn Serializer) -> Result<Self> {
        let expected = type_name::<T>();
        let actual = datagram.type_hint()?;
        if actual != expected {
            return Err(XdError::UnsupportedMessageType {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }

        let value = if actual == string_type_hint() {
            serde_json::Value::String(datagram.message().to_string())
        } else {
            serializer.deserialize(datagram.message())?
        };

        Ok(Self {
            channel: datagram.channel().to_string(),
            message: serde_json::from_value(value)?,
        })
    }
}
