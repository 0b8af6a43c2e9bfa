//! Register protocol on top of the device link.
//!
//! Interprets the two shared words as the trigger/handshake protocol:
//!
//! ```text
//! offset 0  status   controller 0 -> 1 (part present), station -> 2 (done)
//! offset 2  result   station writes the 1-based class id
//! ```
//!
//! Status and result always travel together in one 4-byte write so the
//! controller never sees `status = 2` beside a stale result.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use visionlink_core::ClassId;
use visionlink_core::constants::{COMBINED_WRITE_LEN, STATUS_DONE, STATUS_OFFSET};

use crate::link::DeviceLink;
use crate::window::{TriggerReading, TriggerWindow};

/// Build the combined status + result payload, both big-endian.
///
/// # Examples
///
/// ```
/// use visionlink_station::registers::encode_status_result;
///
/// assert_eq!(encode_status_result(2, 4), [0x00, 0x02, 0x00, 0x04]);
/// assert_eq!(encode_status_result(-1, 300), [0xFF, 0xFF, 0x01, 0x2C]);
/// ```
pub fn encode_status_result(status: i16, result: i16) -> [u8; COMBINED_WRITE_LEN] {
    let [s0, s1] = status.to_be_bytes();
    let [r0, r1] = result.to_be_bytes();
    [s0, s1, r0, r1]
}

/// What the station knows about the handshake registers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolState {
    /// Most recent successful read of the status word.
    pub last_trigger: Option<TriggerReading>,
    /// Class id of the most recent successful result write.
    pub last_result: Option<ClassId>,
    /// Successful result writes since startup.
    pub exec_count: u64,
    /// When the station last wrote the status word itself.
    pub last_write_back_at: Option<Instant>,
}

impl ProtocolState {
    pub fn last_trigger_value(&self) -> Option<i16> {
        self.last_trigger.map(|reading| reading.value)
    }
}

/// Handshake protocol over a shared [`DeviceLink`].
#[derive(Debug)]
pub struct RegisterProtocol {
    link: Arc<DeviceLink>,
    state: watch::Sender<ProtocolState>,
    confirm_writes: bool,
}

impl RegisterProtocol {
    pub fn new(link: Arc<DeviceLink>) -> Self {
        let (state, _) = watch::channel(ProtocolState::default());
        Self {
            link,
            state,
            confirm_writes: false,
        }
    }

    /// Read the registers back after every successful result write.
    pub fn with_write_confirmation(mut self, confirm: bool) -> Self {
        self.confirm_writes = confirm;
        self
    }

    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.link
    }

    /// Snapshot of the protocol state.
    pub fn state(&self) -> ProtocolState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProtocolState> {
        self.state.subscribe()
    }

    /// Read the status/trigger word.
    ///
    /// A successful read is recorded with the instant the transport returned
    /// it; a failed one leaves the previous reading untouched and the link
    /// `Faulted`.
    pub async fn read_trigger(&self) -> Option<i16> {
        let (value, at) = self.link.read_word_at(STATUS_OFFSET).await?;
        self.record_trigger(TriggerReading::new(value, at));
        Some(value)
    }

    /// Whether the last trigger read asserted the trigger within `window`.
    ///
    /// A reading taken before the station's own most recent write to the
    /// status word no longer describes the register and is never fresh.
    pub fn is_trigger_fresh(&self, window: Duration) -> bool {
        let state = self.state.borrow();
        let superseded = matches!(
            (state.last_trigger, state.last_write_back_at),
            (Some(reading), Some(written)) if reading.at <= written
        );
        !superseded
            && TriggerWindow::new(window).is_fresh(state.last_trigger.as_ref(), Instant::now())
    }

    /// Write `status = 2` and `class_id` in one transfer.
    ///
    /// On success the execution counter and last result are updated. With
    /// write confirmation enabled, one extra read compares the registers
    /// against what was written; a mismatch is logged only.
    pub async fn write_result(&self, class_id: ClassId, max_retries: u32) -> bool {
        let payload = encode_status_result(STATUS_DONE, class_id.as_word());
        if !self.link.write_words(STATUS_OFFSET, &payload, max_retries).await {
            return false;
        }

        let written_at = Instant::now();
        let mut exec_count = 0;
        self.state.send_modify(|state| {
            state.exec_count += 1;
            state.last_result = Some(class_id);
            state.last_write_back_at = Some(written_at);
            exec_count = state.exec_count;
        });
        info!(class_id = class_id.get(), exec_count, "Result written");

        if self.confirm_writes {
            self.confirm(STATUS_DONE, class_id.as_word()).await;
        }
        true
    }

    /// Close the handshake without a decision, e.g. after a capture failure.
    ///
    /// Uses the same combined write as [`write_result`](Self::write_result)
    /// with the link's retry policy, but leaves the execution counter and
    /// last result alone.
    pub async fn write_idle_fallback(&self, status: i16, result: i16) -> bool {
        let payload = encode_status_result(status, result);
        let max_retries = self.link.policy().max_retries;
        if !self.link.write_words(STATUS_OFFSET, &payload, max_retries).await {
            return false;
        }

        let written_at = Instant::now();
        self.state
            .send_modify(|state| state.last_write_back_at = Some(written_at));
        warn!(status, result, "Idle fallback written");
        true
    }

    fn record_trigger(&self, reading: TriggerReading) {
        self.state
            .send_modify(|state| state.last_trigger = Some(reading));
    }

    async fn confirm(&self, status: i16, result: i16) {
        let Some((words, at)) = self.link.read_words_at(STATUS_OFFSET, 2).await else {
            warn!("Write confirmation read failed");
            return;
        };
        let (observed_status, observed_result) = (words[0], words[1]);
        self.record_trigger(TriggerReading::new(observed_status, at));

        if (observed_status, observed_result) == (status, result) {
            debug!(status, result, "Write confirmed");
        } else {
            // The controller may already have consumed the result and re-armed.
            warn!(
                status,
                result, observed_status, observed_result, "Registers differ from written values"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::RetryPolicy;
    use visionlink_core::constants::STATUS_TRIGGERED;
    use visionlink_hardware::mock::{MockPlc, MockPlcHandle};
    use visionlink_hardware::{AnyTransport, Endpoint};

    async fn connected_protocol() -> (RegisterProtocol, MockPlcHandle) {
        let (plc, handle) = MockPlc::new(4);
        let link = DeviceLink::new(
            Endpoint::default(),
            AnyTransport::Mock(plc),
            RetryPolicy {
                max_retries: 3,
                retry_delay: Duration::from_millis(1),
            },
        );
        assert!(link.connect().await);
        (RegisterProtocol::new(Arc::new(link)), handle)
    }

    fn class(id: u16) -> ClassId {
        ClassId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_write_result_is_one_combined_write() {
        let (protocol, handle) = connected_protocol().await;

        assert!(protocol.write_result(class(4), 3).await);

        let writes = handle.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].offset, 0);
        assert_eq!(&writes[0].data[..], &[0x00, 0x02, 0x00, 0x04]);

        let state = protocol.state();
        assert_eq!(state.exec_count, 1);
        assert_eq!(state.last_result, Some(class(4)));
    }

    #[tokio::test]
    async fn test_read_trigger_records_reading() {
        let (protocol, handle) = connected_protocol().await;
        handle.set_word(0, STATUS_TRIGGERED);

        assert_eq!(protocol.read_trigger().await, Some(1));
        assert_eq!(protocol.state().last_trigger_value(), Some(1));
        assert!(protocol.is_trigger_fresh(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_failed_read_keeps_previous_reading() {
        let (protocol, handle) = connected_protocol().await;
        handle.set_word(0, STATUS_TRIGGERED);
        protocol.read_trigger().await;
        let before = protocol.state().last_trigger;

        handle.fail_next_reads(1);
        assert_eq!(protocol.read_trigger().await, None);
        assert_eq!(protocol.state().last_trigger, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_freshness_expires_without_new_read() {
        let (protocol, handle) = connected_protocol().await;
        handle.set_word(0, STATUS_TRIGGERED);
        protocol.read_trigger().await;

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(protocol.is_trigger_fresh(Duration::from_millis(100)));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!protocol.is_trigger_fresh(Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reading_before_write_back_is_stale() {
        let (protocol, handle) = connected_protocol().await;
        handle.set_word(0, STATUS_TRIGGERED);
        protocol.read_trigger().await;

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(protocol.write_result(class(1), 3).await);
        assert!(!protocol.is_trigger_fresh(Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_racing_write_back_is_superseded() {
        let (protocol, handle) = connected_protocol().await;
        handle.set_word(0, STATUS_TRIGGERED);
        handle.set_latency(Duration::from_millis(10));

        let started = Instant::now();
        let (value, written) = tokio::join!(
            protocol.read_trigger(),
            protocol.write_result(class(5), 3)
        );

        assert_eq!(value, Some(STATUS_TRIGGERED));
        assert!(written);
        let state = protocol.state();
        let reading = state.last_trigger.unwrap();
        assert_eq!(reading.at, started + Duration::from_millis(10));
        assert!(reading.at < state.last_write_back_at.unwrap());
        assert!(!protocol.is_trigger_fresh(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_write_does_not_touch_trigger_reading() {
        let (protocol, _handle) = connected_protocol().await;
        assert!(protocol.write_result(class(2), 3).await);
        assert_eq!(protocol.state().last_trigger, None);
    }

    #[tokio::test]
    async fn test_confirmation_counts_as_trigger_read() {
        let (protocol, handle) = connected_protocol().await;
        let protocol = protocol.with_write_confirmation(true);

        assert!(protocol.write_result(class(3), 3).await);
        assert_eq!(handle.read_count(), 1);
        assert_eq!(protocol.state().last_trigger_value(), Some(STATUS_DONE));
    }

    #[tokio::test]
    async fn test_failed_write_changes_nothing() {
        let (protocol, handle) = connected_protocol().await;
        handle.fail_next_writes(3);

        assert!(!protocol.write_result(class(3), 3).await);
        let state = protocol.state();
        assert_eq!(state.exec_count, 0);
        assert_eq!(state.last_result, None);
        assert!(!protocol.link().is_connected());
    }

    #[tokio::test]
    async fn test_idle_fallback_leaves_counters() {
        let (protocol, handle) = connected_protocol().await;

        assert!(protocol.write_idle_fallback(STATUS_DONE, 2).await);
        assert_eq!(handle.word(0), STATUS_DONE);
        assert_eq!(handle.word(2), 2);
        assert_eq!(handle.writes().len(), 1);
        assert_eq!(protocol.state().exec_count, 0);
        assert_eq!(protocol.state().last_result, None);
    }
}
