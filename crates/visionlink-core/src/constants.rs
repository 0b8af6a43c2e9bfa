//! Register map and default tuning values for the trigger/handshake protocol.
//!
//! The controller and the station share two signed 16-bit big-endian words
//! inside a single data block:
//!
//! ```text
//! DB<n>.DBW0  status/trigger   controller writes 1, station writes 2, controller resets to 0
//! DB<n>.DBW2  result           station writes the 1-based class id
//! ```
//!
//! The station always writes both words in one 4-byte transfer starting at
//! offset 0, so the controller can never observe `status = 2` next to a stale
//! result.
//!
//! # Usage
//!
//! ```
//! use visionlink_core::constants::*;
//!
//! assert_eq!(RESULT_OFFSET - STATUS_OFFSET, WORD_SIZE as u16);
//! assert_eq!(COMBINED_WRITE_LEN, 4);
//! ```

// ============================================================================
// Register Map
// ============================================================================

/// Byte offset of the status/trigger word.
pub const STATUS_OFFSET: u16 = 0;

/// Byte offset of the result word.
pub const RESULT_OFFSET: u16 = 2;

/// Size of one register word in bytes.
pub const WORD_SIZE: usize = 2;

/// Length of the combined status + result write.
pub const COMBINED_WRITE_LEN: usize = 2 * WORD_SIZE;

// ============================================================================
// Status Codes
// ============================================================================

/// Status word value: controller idle, next cycle armed.
pub const STATUS_IDLE: i16 = 0;

/// Status word value: controller asserts a part is in position.
pub const STATUS_TRIGGERED: i16 = 1;

/// Status word value: station finished the cycle and the result is valid.
pub const STATUS_DONE: i16 = 2;

// ============================================================================
// Controller Endpoint Defaults
// ============================================================================

/// Default controller address.
pub const DEFAULT_PLC_HOST: &str = "192.168.1.10";

/// ISO-on-TCP port.
pub const DEFAULT_PLC_PORT: u16 = 102;

/// Default rack number.
pub const DEFAULT_RACK: u16 = 0;

/// Default CPU slot.
pub const DEFAULT_SLOT: u16 = 1;

/// Default data block holding the two registers.
pub const DEFAULT_DB: u16 = 4;

/// Connection establishment timeout (milliseconds).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Per-request I/O timeout (milliseconds).
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 1000;

// ============================================================================
// Retry and Timing Defaults
// ============================================================================

/// Write attempts before the link is declared faulted.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Fixed delay between write attempts (milliseconds).
pub const DEFAULT_RETRY_DELAY_MS: u64 = 20;

/// Debounce window during which a trigger read may be reused (milliseconds).
///
/// Must stay above one poll tick and below the shortest time the controller
/// holds the trigger asserted. Tune per installation.
pub const DEFAULT_TRIGGER_WINDOW_MS: u64 = 100;

/// Poll loop period (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Delay between reconnect attempts while the link is down (milliseconds).
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 1000;

// ============================================================================
// Decision Defaults
// ============================================================================

/// Detections with a confidence below this floor are discarded.
pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.1;

/// Class id reported when nothing clears the confidence floor ("finished").
pub const DEFAULT_FALLBACK_CLASS: u16 = 2;
