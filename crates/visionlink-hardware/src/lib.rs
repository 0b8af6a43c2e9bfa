//! Device layer for the VisionLink inspection station.
//!
//! This crate provides the trait seams between the station core and the
//! outside world, together with their implementations:
//!
//! - **Controller transport** ([`PlcTransport`]): byte-addressed reads and
//!   writes inside a controller data block. [`S7Client`] speaks S7 over
//!   ISO-on-TCP; [`mock::MockPlc`] simulates a controller in memory.
//! - **Frame sources** ([`FrameSource`]): [`mock::MockCamera`],
//!   [`StillFrameSource`] and [`SubmittedFrames`].
//! - **Detectors** ([`Detector`]): [`mock::ScriptedDetector`]. Real models
//!   live outside this workspace and plug in through the trait.
//!
//! # Design Philosophy
//!
//! - **Async-first**: all I/O is asynchronous, using native `async fn` in
//!   traits (Rust 1.90 + Edition 2024 RPITIT).
//! - **Enum dispatch**: RPITIT traits are not object-safe, so concrete
//!   devices are wrapped in [`devices::AnyTransport`] and
//!   [`devices::AnyFrameSource`].
//! - **Thread-safe**: all traits require `Send + Sync`.
//! - **Error-aware**: all operations return [`Result<T>`] with a
//!   [`HardwareError`]; nothing here retries on its own.
//!
//! # Example
//!
//! ```
//! use visionlink_hardware::mock::MockPlc;
//! use visionlink_hardware::traits::PlcTransport;
//!
//! #[tokio::main]
//! async fn main() -> visionlink_hardware::Result<()> {
//!     let (mut plc, handle) = MockPlc::new(4);
//!     plc.connect().await?;
//!
//!     // Controller asserts the trigger
//!     handle.set_word(0, 1);
//!     let status = plc.db_read(4, 0, 2).await?;
//!     assert_eq!(&status[..], &[0x00, 0x01]);
//!     Ok(())
//! }
//! ```

pub mod devices;
pub mod error;
pub mod mock;
pub mod s7_client;
pub mod sources;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use devices::{AnyFrameSource, AnyTransport};
pub use error::{HardwareError, Result};
pub use s7_client::S7Client;
pub use sources::{StillFrameSource, SubmittedFrames};
pub use traits::{Detector, FrameSource, PlcTransport};
pub use types::{Endpoint, Timeouts};
