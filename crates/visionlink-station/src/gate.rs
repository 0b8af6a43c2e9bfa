//! Inference gate: at most one inspection cycle at a time.
//!
//! Acquisition is a single compare-and-swap, so two callers racing for the
//! gate can never both win. A denied caller gets `None` immediately; there
//! is no queue.

use std::sync::atomic::{AtomicBool, Ordering};

/// Exclusive, non-blocking gate.
///
/// # Examples
///
/// ```
/// use visionlink_station::gate::InferenceGate;
///
/// let gate = InferenceGate::new();
/// let permit = gate.try_acquire().unwrap();
/// assert!(gate.try_acquire().is_none());
///
/// permit.release();
/// assert!(!gate.is_held());
/// ```
#[derive(Debug, Default)]
pub struct InferenceGate {
    held: AtomicBool,
}

impl InferenceGate {
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    /// Take the gate if it is free.
    pub fn try_acquire(&self) -> Option<GatePermit<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GatePermit { gate: self })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Proof of holding the gate. Dropping it releases the gate.
#[must_use = "the gate is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct GatePermit<'a> {
    gate: &'a InferenceGate,
}

impl GatePermit<'_> {
    /// Release the gate explicitly.
    pub fn release(self) {}
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.held.store(false, Ordering::Release);
    }
}
