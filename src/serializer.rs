//! Payload serialization capability.
//!
//! Broadcasters only need "object to string" and listeners "string to object";
//! the codec itself is pluggable. Values travel as `serde_json::Value` so the
//! trait stays object-safe and can be injected as `Arc<dyn Serializer>`.

use serde_json::Value;

use crate::error::Result;

/// Serialization capability injected into broadcasters and typed receivers.
pub trait Serializer: Send + Sync {
    /// Serialize a value to its string form.
    fn serialize(&self, value: &Value) -> Result<String>;

    /// Parse a string produced by [`Serializer::serialize`].
    fn deserialize(&self, data: &str) -> Result<Value>;
}

/// JSON serializer (default).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn deserialize(&self, data: &str) -> Result<Value> {
        Ok(serde_json::from_str(data)?)
    }
}
