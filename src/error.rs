//! Error types shared by every transport.

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, XdError>;

/// Errors that can occur while broadcasting or listening.
#[derive(Debug, thiserror::Error)]
pub enum XdError {
    /// Missing or invalid configuration for a capability that was explicitly requested.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument '{argument}': {reason}")]
    InvalidArgument {
        argument: &'static str,
        reason: &'static str,
    },

    /// The instance was disposed and can no longer be used.
    #[error("{0} has been disposed")]
    Disposed(&'static str),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A typed conversion was attempted against a payload of another type.
    #[error("Unsupported message type: expected '{expected}', got '{actual}'")]
    UnsupportedMessageType { expected: String, actual: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl XdError {
    /// Shorthand for an empty required argument.
    pub(crate) fn empty(argument: &'static str) -> Self {
        XdError::InvalidArgument {
            argument,
            reason: "must not be empty",
        }
    }

    /// True for the disposed-state error.
    pub fn is_disposed(&self) -> bool {
        matches!(self, XdError::Disposed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_names_argument() {
        let err = XdError::empty("channel");
        assert_eq!(
            err.to_string(),
            "Invalid argument 'channel': must not be empty"
        );
    }

    #[test]
    fn test_disposed_message() {
        let err = XdError::Disposed("FileDropListener");
        assert!(err.is_disposed());
        assert_eq!(err.to_string(), "FileDropListener has been disposed");
    }
}
