//! Enum wrappers for device dispatch.
//!
//! Native `async fn` in traits (RPITIT) is not object-safe, so
//! `Box<dyn PlcTransport>` is not an option. These enums provide concrete
//! dispatch instead: the station holds one `AnyTransport` and one
//! `AnyFrameSource`, chosen at startup from configuration.
//!
//! # Examples
//!
//! ```
//! use visionlink_hardware::devices::AnyTransport;
//! use visionlink_hardware::mock::MockPlc;
//!
//! let (plc, _handle) = MockPlc::new(4);
//! let transport = AnyTransport::Mock(plc);
//! assert_eq!(transport.name(), "mock");
//! ```

use bytes::Bytes;
use std::sync::Arc;
use visionlink_core::Frame;

use crate::mock::{MockCamera, MockPlc};
use crate::s7_client::S7Client;
use crate::sources::{StillFrameSource, SubmittedFrames};
use crate::traits::{FrameSource, PlcTransport};
use crate::Result;

/// Enum wrapper for controller transport dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyTransport {
    /// S7 over ISO-on-TCP.
    S7(S7Client),
    /// In-memory controller for development and testing.
    Mock(MockPlc),
}

impl AnyTransport {
    /// Short transport name for logs and status output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::S7(_) => "s7",
            Self::Mock(_) => "mock",
        }
    }
}

impl PlcTransport for AnyTransport {
    async fn connect(&mut self) -> Result<()> {
        match self {
            Self::S7(device) => device.connect().await,
            Self::Mock(device) => device.connect().await,
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        match self {
            Self::S7(device) => device.disconnect().await,
            Self::Mock(device) => device.disconnect().await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::S7(device) => device.is_connected(),
            Self::Mock(device) => device.is_connected(),
        }
    }

    async fn db_read(&mut self, db: u16, offset: u16, len: u16) -> Result<Bytes> {
        match self {
            Self::S7(device) => device.db_read(db, offset, len).await,
            Self::Mock(device) => device.db_read(db, offset, len).await,
        }
    }

    async fn db_write(&mut self, db: u16, offset: u16, data: &[u8]) -> Result<()> {
        match self {
            Self::S7(device) => device.db_write(db, offset, data).await,
            Self::Mock(device) => device.db_write(db, offset, data).await,
        }
    }
}

/// Enum wrapper for frame source dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyFrameSource {
    /// Fixed image.
    Still(StillFrameSource),
    /// Frames submitted by on-demand callers; the `Arc` is shared with them.
    Submitted(Arc<SubmittedFrames>),
    /// Scripted camera.
    Mock(MockCamera),
}

impl FrameSource for AnyFrameSource {
    async fn capture(&self) -> Result<Frame> {
        match self {
            Self::Still(source) => source.capture().await,
            Self::Submitted(source) => source.capture().await,
            Self::Mock(source) => source.capture().await,
        }
    }
}
