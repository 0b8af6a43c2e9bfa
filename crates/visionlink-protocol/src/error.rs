//! Protocol error types.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while framing, encoding or decoding S7 traffic.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// TPKT header carried an unsupported version byte.
    #[error("Unsupported TPKT version {0:#04x}")]
    BadVersion(u8),

    /// Frame length exceeds the configured limit.
    #[error("Frame too large: {size} bytes exceeds maximum of {max_size}")]
    FrameTooLarge { size: usize, max_size: usize },

    /// Frame or PDU is shorter than its fixed header.
    #[error("Truncated {what}: {len} bytes, need at least {min}")]
    Truncated {
        what: &'static str,
        len: usize,
        min: usize,
    },

    /// Structurally invalid content.
    #[error("Malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },

    /// A valid PDU arrived where a different one was expected.
    #[error("Unexpected PDU: expected {expected}, got {actual}")]
    UnexpectedPdu {
        expected: &'static str,
        actual: String,
    },

    /// Controller answered with a non-zero error class/code in the S7 header.
    #[error("Request rejected by controller (class {class:#04x}, code {code:#04x})")]
    Rejected { class: u8, code: u8 },

    /// Controller refused the addressed item.
    #[error("Item access failed: {0}")]
    ItemFailed(crate::s7::ReturnCode),

    /// Request does not fit into the negotiated PDU.
    #[error("Request of {requested} bytes exceeds negotiated PDU length {negotiated}")]
    PduTooLarge { requested: usize, negotiated: u16 },

    /// Low-level I/O error surfaced through the codec.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn truncated(what: &'static str, len: usize, min: usize) -> Self {
        Self::Truncated { what, len, min }
    }

    pub(crate) fn malformed(what: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            detail: detail.into(),
        }
    }

    pub(crate) fn unexpected(expected: &'static str, actual: impl Into<String>) -> Self {
        Self::UnexpectedPdu {
            expected,
            actual: actual.into(),
        }
    }
}
