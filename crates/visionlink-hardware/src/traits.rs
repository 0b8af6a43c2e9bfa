//! Device trait definitions.
//!
//! Three seams separate the station core from the outside world:
//!
//! - [`PlcTransport`]: raw, byte-addressed access to one controller session.
//! - [`FrameSource`]: produces one image on demand.
//! - [`Detector`]: turns an image into zero or more detection records.
//!
//! `PlcTransport` uses native `async fn` (Edition 2024 RPITIT) and is
//! dispatched through [`AnyTransport`](crate::devices::AnyTransport), like the
//! other device enums. `FrameSource` and `Detector` are generic parameters of
//! the inspection controller, so their futures are declared `Send` explicitly
//! to keep cycles spawnable on the multi-threaded runtime.

#![allow(async_fn_in_trait)]

use bytes::Bytes;
use std::future::Future;
use visionlink_core::{Detection, Frame};

use crate::Result;

/// Byte-level access to a controller's data blocks.
///
/// Implementations are NOT safe for concurrent use: callers must serialize
/// every call (the station wraps the transport in a single mutex). Methods
/// take `&mut self` to make that explicit.
///
/// # Examples
///
/// ```
/// use visionlink_hardware::mock::MockPlc;
/// use visionlink_hardware::traits::PlcTransport;
///
/// #[tokio::main]
/// async fn main() -> visionlink_hardware::Result<()> {
///     let (mut plc, handle) = MockPlc::new(4);
///     handle.set_word(0, 1);
///
///     plc.connect().await?;
///     let raw = plc.db_read(4, 0, 2).await?;
///     assert_eq!(i16::from_be_bytes([raw[0], raw[1]]), 1);
///     Ok(())
/// }
/// ```
pub trait PlcTransport: Send + Sync {
    /// Open the session, including every protocol handshake.
    ///
    /// Any previous session is dropped first.
    async fn connect(&mut self) -> Result<()>;

    /// Close the session. Safe to call when not connected.
    async fn disconnect(&mut self) -> Result<()>;

    /// Whether a session is currently open.
    fn is_connected(&self) -> bool;

    /// Read `len` bytes starting at byte `offset` of data block `db`.
    async fn db_read(&mut self, db: u16, offset: u16, len: u16) -> Result<Bytes>;

    /// Write `data` starting at byte `offset` of data block `db` as one transfer.
    async fn db_write(&mut self, db: u16, offset: u16, data: &[u8]) -> Result<()>;
}

/// Produces one image per call.
///
/// A failed capture is reported, never retried here.
pub trait FrameSource: Send + Sync {
    fn capture(&self) -> impl Future<Output = Result<Frame>> + Send;
}

/// Runs inference on one frame.
///
/// Class ids in the returned records are 1-based register values. Adapters
/// around models with zero-based class indices convert them with
/// [`ClassId::from_index`](visionlink_core::ClassId::from_index).
///
/// An empty result is a valid answer, not an error.
pub trait Detector: Send + Sync {
    fn infer(&self, frame: Frame) -> impl Future<Output = Result<Vec<Detection>>> + Send;
}
