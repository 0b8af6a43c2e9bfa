//! Frame sources that need no camera.
//!
//! - [`StillFrameSource`] serves the same image on every capture, for bench
//!   operation and commissioning.
//! - [`SubmittedFrames`] serves frames handed in by an on-demand caller
//!   (an uploaded image); each submitted frame is consumed by one capture.

use chrono::Utc;
use std::sync::{Mutex, PoisonError};
use tracing::debug;
use visionlink_core::Frame;

use crate::traits::FrameSource;
use crate::{HardwareError, Result};

/// Serves one fixed frame, re-stamped on every capture.
#[derive(Debug, Clone)]
pub struct StillFrameSource {
    frame: Frame,
}

impl StillFrameSource {
    pub fn new(frame: Frame) -> Self {
        Self { frame }
    }

    /// A source serving a blank RGB frame.
    ///
    /// # Errors
    /// Returns `HardwareError::InvalidData` when either dimension is zero.
    pub fn blank(width: u32, height: u32) -> Result<Self> {
        Frame::blank(width, height)
            .map(Self::new)
            .map_err(|e| HardwareError::invalid_data(e.to_string()))
    }
}

impl FrameSource for StillFrameSource {
    async fn capture(&self) -> Result<Frame> {
        let mut frame = self.frame.clone();
        frame.captured_at = Utc::now();
        Ok(frame)
    }
}

/// Latest-wins slot for frames submitted from outside the station.
///
/// # Examples
///
/// ```
/// use visionlink_core::Frame;
/// use visionlink_hardware::SubmittedFrames;
/// use visionlink_hardware::traits::FrameSource;
///
/// #[tokio::main]
/// async fn main() {
///     let frames = SubmittedFrames::new();
///     frames.submit(Frame::blank(2, 2).unwrap());
///
///     assert!(frames.capture().await.is_ok());
///     assert!(frames.capture().await.is_err());
/// }
/// ```
#[derive(Debug, Default)]
pub struct SubmittedFrames {
    pending: Mutex<Option<Frame>>,
}

impl SubmittedFrames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand in a frame for the next capture.
    ///
    /// Returns `true` if an unconsumed frame was replaced.
    pub fn submit(&self, frame: Frame) -> bool {
        let replaced = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(frame)
            .is_some();
        if replaced {
            debug!("Replaced unconsumed submitted frame");
        }
        replaced
    }

    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn take(&self) -> Option<Frame> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl FrameSource for SubmittedFrames {
    async fn capture(&self) -> Result<Frame> {
        self.take()
            .ok_or_else(|| HardwareError::capture("no frame submitted"))
    }
}
