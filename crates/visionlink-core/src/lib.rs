//! Shared domain types for the VisionLink inspection station.
//!
//! Everything in this crate is transport-agnostic: class identifiers,
//! detector records, per-cycle decisions, frames handed between collaborators
//! and the register map shared with the controller.

pub mod catalog;
pub mod constants;
pub mod error;
pub mod types;

pub use catalog::ClassCatalog;
pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
