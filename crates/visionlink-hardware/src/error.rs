//! Error types for device operations.
//!
//! Covers the controller transport (disconnects, timeouts, protocol
//! failures) as well as the camera and detector collaborators.

use visionlink_protocol::ProtocolError;

/// Result type alias for device operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur while talking to the controller, camera or detector.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Device is not connected or has been disconnected.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// Operation timed out after specified duration.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Operation is not supported by this device.
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Device communication error.
    #[error("Communication error: {message}")]
    CommunicationError { message: String },

    /// Controller answered with something the protocol layer rejected.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Invalid data received from device.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Frame source could not produce an image.
    #[error("Capture failed: {message}")]
    CaptureFailed { message: String },

    /// Detector could not process a frame.
    #[error("Inference failed: {message}")]
    InferenceFailed { message: String },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a new communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationError {
            message: message.into(),
        }
    }

    /// Create a new invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a new capture failure.
    pub fn capture(message: impl Into<String>) -> Self {
        Self::CaptureFailed {
            message: message.into(),
        }
    }

    /// Create a new inference failure.
    pub fn inference(message: impl Into<String>) -> Self {
        Self::InferenceFailed {
            message: message.into(),
        }
    }

    /// Whether the connection must be considered unusable after this error.
    ///
    /// Item-level refusals (wrong offset, missing block) leave the session
    /// intact; everything on the wire or socket level does not.
    pub fn breaks_connection(&self) -> bool {
        match self {
            Self::Protocol(ProtocolError::ItemFailed(_))
            | Self::Protocol(ProtocolError::PduTooLarge { .. })
            | Self::Unsupported { .. }
            | Self::CaptureFailed { .. }
            | Self::InferenceFailed { .. } => false,
            _ => true,
        }
    }
}
