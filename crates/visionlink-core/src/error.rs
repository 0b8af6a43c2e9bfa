use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid class id: {0}")]
    InvalidClassId(String),

    #[error("Invalid confidence {0}: must be within [0, 1]")]
    InvalidConfidence(f32),

    #[error("Invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Unknown trigger status word: {0}")]
    UnknownStatus(i16),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
