//! Mock camera for testing and development.
//!
//! Captures are scripted through a [`MockCameraHandle`]: queue specific
//! frames or failures, and the camera serves them in order. With nothing
//! queued it returns a blank frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};
use visionlink_core::Frame;

use crate::traits::FrameSource;
use crate::{HardwareError, Result};

/// Default capture size, matching the production camera.
pub const MOCK_FRAME_WIDTH: u32 = 640;
pub const MOCK_FRAME_HEIGHT: u32 = 480;

#[derive(Debug)]
enum CaptureEvent {
    Frame(Frame),
    Failure(String),
}

/// Mock camera.
///
/// # Examples
///
/// ```
/// use visionlink_hardware::mock::MockCamera;
/// use visionlink_hardware::traits::FrameSource;
///
/// #[tokio::main]
/// async fn main() -> visionlink_hardware::Result<()> {
///     let (camera, handle) = MockCamera::new();
///
///     handle.fail_next("lens cap on")?;
///     assert!(camera.capture().await.is_err());
///
///     let frame = camera.capture().await?;
///     assert_eq!((frame.width, frame.height), (640, 480));
///     assert_eq!(handle.capture_count(), 2);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockCamera {
    events: Mutex<mpsc::UnboundedReceiver<CaptureEvent>>,
    captures: Arc<AtomicUsize>,
    width: u32,
    height: u32,
}

impl MockCamera {
    /// Create a camera producing 640x480 blank frames when nothing is queued.
    pub fn new() -> (Self, MockCameraHandle) {
        Self::with_size(MOCK_FRAME_WIDTH, MOCK_FRAME_HEIGHT)
    }

    /// Create a camera with a custom default frame size.
    pub fn with_size(width: u32, height: u32) -> (Self, MockCameraHandle) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let captures = Arc::new(AtomicUsize::new(0));

        let camera = Self {
            events: Mutex::new(event_rx),
            captures: Arc::clone(&captures),
            width,
            height,
        };
        let handle = MockCameraHandle { event_tx, captures };

        (camera, handle)
    }
}

impl FrameSource for MockCamera {
    async fn capture(&self) -> Result<Frame> {
        self.captures.fetch_add(1, Ordering::SeqCst);

        let scripted = self.events.lock().await.try_recv().ok();
        match scripted {
            Some(CaptureEvent::Frame(frame)) => Ok(frame),
            Some(CaptureEvent::Failure(message)) => Err(HardwareError::capture(message)),
            None => Frame::blank(self.width, self.height)
                .map_err(|e| HardwareError::capture(e.to_string())),
        }
    }
}

/// Handle for scripting a mock camera.
#[derive(Debug, Clone)]
pub struct MockCameraHandle {
    event_tx: mpsc::UnboundedSender<CaptureEvent>,
    captures: Arc<AtomicUsize>,
}

impl MockCameraHandle {
    /// Serve `frame` on a future capture.
    pub fn queue_frame(&self, frame: Frame) -> Result<()> {
        self.send(CaptureEvent::Frame(frame))
    }

    /// Fail a future capture with `message`.
    pub fn fail_next(&self, message: impl Into<String>) -> Result<()> {
        self.send(CaptureEvent::Failure(message.into()))
    }

    /// Captures attempted so far, failed ones included.
    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    fn send(&self, event: CaptureEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .map_err(|_| HardwareError::disconnected("mock camera dropped"))
    }
}
