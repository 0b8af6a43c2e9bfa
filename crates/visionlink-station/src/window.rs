//! Trigger debounce window.
//!
//! A trigger read taken a moment ago may stand in for a fresh one: a caller
//! that has just seen the controller assert the trigger skips the second
//! round trip before starting inference. The window must stay shorter than
//! the controller's minimum trigger hold time; within it the station acts on
//! what it last saw, even if the controller has since deasserted.

use std::time::Duration;
use tokio::time::Instant;
use visionlink_core::TriggerStatus;

/// One successful read of the status/trigger word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerReading {
    pub value: i16,
    pub at: Instant,
}

impl TriggerReading {
    pub fn new(value: i16, at: Instant) -> Self {
        Self { value, at }
    }

    /// Decoded status word; `None` for values outside the handshake.
    pub fn status(&self) -> Option<TriggerStatus> {
        TriggerStatus::from_word(self.value).ok()
    }

    pub fn is_triggered(&self) -> bool {
        self.status() == Some(TriggerStatus::Triggered)
    }
}

/// Freshness rule for trigger readings.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tokio::time::Instant;
/// use visionlink_station::window::{TriggerReading, TriggerWindow};
///
/// let window = TriggerWindow::new(Duration::from_millis(100));
/// let read_at = Instant::now();
/// let reading = TriggerReading::new(1, read_at);
///
/// assert!(window.is_fresh(Some(&reading), read_at + Duration::from_millis(100)));
/// assert!(!window.is_fresh(Some(&reading), read_at + Duration::from_millis(101)));
/// assert!(!window.is_fresh(None, read_at));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerWindow {
    window: Duration,
}

impl TriggerWindow {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether `reading` asserted the trigger no longer than the window
    /// before `now`. The boundary itself still counts as fresh.
    pub fn is_fresh(&self, reading: Option<&TriggerReading>, now: Instant) -> bool {
        reading.is_some_and(|reading| {
            reading.is_triggered() && now.saturating_duration_since(reading.at) <= self.window
        })
    }
}
