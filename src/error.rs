//! Error types for IEBus message handling and waveform generation

use thiserror::Error;

/// Result type for IEBus operations
pub type Result<T> = std::result::Result<T, IebusError>;

/// Errors surfaced by the message model, encoder and capture reconstructor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IebusError {
    /// Malformed textual or binary message input
    #[error("Format error: {0}")]
    Format(String),

    /// Invalid operational parameter (speed factor, channel, timing)
    #[error("Config error: {0}")]
    Config(String),

    /// A captured frame could not be reassembled into a valid message
    #[error("Decode error in frame {frame}: {reason}")]
    Decode {
        /// Zero-based index of the frame within its channel
        frame: usize,
        /// What went wrong
        reason: String,
    },

    /// The transmission target rejected the waveform
    #[error("Transmit error: {0}")]
    Transmit(String),
}

impl IebusError {
    /// Create a new Format error
    pub fn format_error(msg: impl Into<String>) -> Self {
        IebusError::Format(msg.into())
    }

    /// Create a new Config error
    pub fn config_error(msg: impl Into<String>) -> Self {
        IebusError::Config(msg.into())
    }

    /// Create a new Decode error for the given frame index
    pub fn decode_error(frame: usize, reason: impl Into<String>) -> Self {
        IebusError::Decode {
            frame,
            reason: reason.into(),
        }
    }

    /// Create a new Transmit error
    pub fn transmit_error(msg: impl Into<String>) -> Self {
        IebusError::Transmit(msg.into())
    }

    /// Whether a caller may skip the offending input and keep going
    pub fn is_recoverable(&self) -> bool {
        matches!(self, IebusError::Decode { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IebusError::format_error("bad token");
        assert!(err.to_string().contains("Format error"));

        let err = IebusError::decode_error(3, "missing Slave");
        assert_eq!(err.to_string(), "Decode error in frame 3: missing Slave");
    }

    #[test]
    fn test_only_decode_errors_are_recoverable() {
        assert!(IebusError::decode_error(0, "x").is_recoverable());
        assert!(!IebusError::config_error("x").is_recoverable());
        assert!(!IebusError::format_error("x").is_recoverable());
    }
}
