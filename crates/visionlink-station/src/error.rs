//! Error types for station setup and lifecycle.
//!
//! Device trouble during operation never shows up here: the device link
//! absorbs it into its state flag. These errors cover loading configuration,
//! building the station and talking to a station that is going away.

use visionlink_hardware::HardwareError;

/// Result type alias for station operations.
pub type Result<T> = std::result::Result<T, StationError>;

/// Errors raised while configuring, starting or stopping a station.
#[derive(Debug, thiserror::Error)]
pub enum StationError {
    /// Configuration sources could not be read or merged.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration was read but holds unusable values.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// A domain value was rejected.
    #[error(transparent)]
    Core(#[from] visionlink_core::Error),

    /// A device could not be built.
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// A cycle worker ended without reporting an outcome.
    #[error("Cycle worker lost: {message}")]
    WorkerLost { message: String },
}

impl StationError {
    /// Create a new invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a new worker lost error.
    pub fn worker_lost(message: impl Into<String>) -> Self {
        Self::WorkerLost {
            message: message.into(),
        }
    }
}

impl From<figment::Error> for StationError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            StationError::invalid_config("poll.interval_ms must be positive").to_string(),
            "Invalid configuration: poll.interval_ms must be positive"
        );
        assert_eq!(
            StationError::worker_lost("aborted").to_string(),
            "Cycle worker lost: aborted"
        );
    }

    #[test]
    fn test_core_errors_are_transparent() {
        let err: StationError = visionlink_core::Error::Config("empty".into()).into();
        assert_eq!(err.to_string(), "Configuration error: empty");
    }
}
