//! Trigger/handshake core of the VisionLink inspection station.
//!
//! A controller asserts a trigger word when a part is in position; the
//! station captures a frame, runs a detector, reduces the detections to one
//! class and writes status and result back in a single transfer.
//!
//! # Modules
//!
//! - [`link`]: the single, serialized connection to the controller.
//! - [`registers`]: trigger reads and combined status/result writes.
//! - [`window`]: the trigger debounce window.
//! - [`gate`]: at most one inspection cycle at a time.
//! - [`cycle`]: the inspection cycle itself.
//! - [`station`]: poll loop, on-demand cycles and shutdown.
//! - [`config`]: layered configuration.
//! - [`status`]: status snapshot for presentation layers.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use visionlink_core::ClassCatalog;
//! use visionlink_hardware::mock::{MockPlc, ScriptedDetector};
//! use visionlink_hardware::{AnyTransport, StillFrameSource};
//! use visionlink_station::cycle::{CycleOutcome, InspectionController};
//! use visionlink_station::link::DeviceLink;
//! use visionlink_station::registers::RegisterProtocol;
//! use visionlink_station::StationConfig;
//!
//! #[tokio::main]
//! async fn main() -> visionlink_station::Result<()> {
//!     let config = StationConfig::default();
//!     let (plc, handle) = MockPlc::new(config.plc.db);
//!     let link = DeviceLink::new(config.endpoint(), AnyTransport::Mock(plc), config.retry_policy());
//!
//!     let controller = InspectionController::new(
//!         RegisterProtocol::new(Arc::new(link)),
//!         StillFrameSource::blank(64, 48)?,
//!         ScriptedDetector::new(),
//!         config.cycle_policy()?,
//!         ClassCatalog::default(),
//!     );
//!
//!     handle.set_word(0, 1);
//!     let outcome = controller.attempt_cycle(None).await;
//!     assert!(matches!(outcome, CycleOutcome::Completed { .. }));
//!     assert_eq!((handle.word(0), handle.word(2)), (2, 2));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cycle;
pub mod error;
pub mod gate;
pub mod link;
pub mod registers;
pub mod station;
pub mod status;
pub mod window;

pub use config::StationConfig;
pub use cycle::{CycleOutcome, CyclePhase, CyclePolicy, InspectionController, decide};
pub use error::{Result, StationError};
pub use link::{DeviceLink, LinkState, RetryPolicy};
pub use registers::{ProtocolState, RegisterProtocol};
pub use station::{PollSettings, ShutdownReport, Station, StationHandle};
pub use status::StationStatus;
