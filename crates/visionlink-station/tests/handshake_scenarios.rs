//! End-to-end inspection cycles against the mock controller.
//!
//! Each test plays one handshake: the controller side is driven through
//! `MockPlcHandle`, the camera and detector are scripted, and the test
//! checks the outcome together with what actually reached the controller.

mod common;

use bytes::Bytes;
use common::{DB, class, connected_rig, detection, policy, rig_with};
use std::time::Duration;
use visionlink_core::constants::{STATUS_DONE, STATUS_IDLE, STATUS_TRIGGERED};
use visionlink_core::DecisionSource;
use visionlink_hardware::mock::{ScriptedDetector, WriteRecord};
use visionlink_station::{CycleOutcome, CyclePhase, LinkState};

fn combined_write(status: i16, result: i16) -> WriteRecord {
    let [s0, s1] = status.to_be_bytes();
    let [r0, r1] = result.to_be_bytes();
    WriteRecord {
        db: DB,
        offset: 0,
        data: Bytes::from(vec![s0, s1, r0, r1]),
    }
}

// ============================================================================
// Completed cycles
// ============================================================================

#[tokio::test]
async fn test_detected_class_is_written_back() {
    let rig = connected_rig().await;
    rig.plc.set_word(0, STATUS_TRIGGERED);
    rig.detector().push(vec![detection(4, 0.92)]);

    let outcome = rig.controller.attempt_cycle(None).await;

    let CycleOutcome::Completed { decision, .. } = outcome else {
        panic!("expected completed cycle, got {outcome:?}");
    };
    assert_eq!(decision.class_id, class(4));
    assert_eq!(decision.source, DecisionSource::Detected);
    assert_eq!(decision.confidence, Some(0.92));

    assert_eq!(rig.plc.writes(), vec![combined_write(STATUS_DONE, 4)]);
    let state = rig.controller.registers().state();
    assert_eq!(state.exec_count, 1);
    assert_eq!(state.last_result, Some(class(4)));
}

#[tokio::test]
async fn test_no_detection_above_floor_writes_fallback() {
    let rig = connected_rig().await;
    rig.plc.set_word(0, STATUS_TRIGGERED);
    rig.detector().push(vec![detection(5, 0.05), detection(7, 0.09)]);

    let outcome = rig.controller.attempt_cycle(None).await;

    let decision = outcome.decision().copied().unwrap();
    assert!(matches!(outcome, CycleOutcome::Completed { .. }));
    assert!(decision.is_fallback());
    assert_eq!(decision.class_id, class(2));
    assert_eq!(rig.plc.writes(), vec![combined_write(STATUS_DONE, 2)]);

    let status = rig.controller.status(false).await;
    assert_eq!(status.cycles.fallbacks, 1);
    let finished = status
        .cycles
        .per_class
        .iter()
        .find(|count| count.class_id == 2)
        .unwrap();
    assert_eq!((finished.name.as_str(), finished.count), ("finished", 1));
}

#[tokio::test]
async fn test_inference_failure_falls_back() {
    let rig = connected_rig().await;
    rig.plc.set_word(0, STATUS_TRIGGERED);
    rig.detector().push_failure("model not loaded");

    let outcome = rig.controller.attempt_cycle(None).await;

    assert!(outcome.decision().unwrap().is_fallback());
    assert_eq!(rig.plc.word(0), STATUS_DONE);
    assert_eq!(rig.plc.word(2), 2);
}

#[tokio::test]
async fn test_highest_confidence_wins() {
    let rig = connected_rig().await;
    rig.plc.set_word(0, STATUS_TRIGGERED);
    rig.detector()
        .push(vec![detection(1, 0.41), detection(6, 0.88), detection(3, 0.88)]);

    let outcome = rig.controller.attempt_cycle(None).await;

    assert_eq!(outcome.decision().unwrap().class_id, class(6));
    assert_eq!(rig.plc.word(2), 6);
}

// ============================================================================
// Trigger confirmation
// ============================================================================

#[tokio::test]
async fn test_unknown_status_word_is_not_a_trigger() {
    let rig = connected_rig().await;
    rig.plc.set_word(0, 7);

    let outcome = rig.controller.attempt_cycle(None).await;

    assert_eq!(outcome, CycleOutcome::NotTriggered { observed: 7 });
    assert_eq!(outcome.to_string(), "not-triggered (unknown status 7)");
    assert_eq!(rig.camera.capture_count(), 0);
    assert!(rig.plc.writes().is_empty());
    assert_eq!(rig.controller.registers().state().last_trigger_value(), Some(7));
}

#[tokio::test(start_paused = true)]
async fn test_deasserted_trigger_aborts_before_capture() {
    let rig = connected_rig().await;

    // The poll loop saw the trigger, but the reading has gone stale by the
    // time the cycle runs and the controller has deasserted.
    rig.plc.set_word(0, STATUS_TRIGGERED);
    rig.controller.registers().read_trigger().await;
    tokio::time::advance(Duration::from_millis(150)).await;
    rig.plc.set_word(0, STATUS_IDLE);

    let outcome = rig.controller.attempt_cycle(None).await;

    assert_eq!(outcome, CycleOutcome::NotTriggered { observed: 0 });
    assert!(outcome.is_expected());
    assert_eq!(rig.camera.capture_count(), 0);
    assert_eq!(rig.detector().calls(), 0);
    assert!(rig.plc.writes().is_empty());
    assert!(!rig.controller.is_busy());
    assert_eq!(rig.controller.phase(), CyclePhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_fresh_reading_skips_confirmation_read() {
    let rig = connected_rig().await;
    rig.plc.set_word(0, STATUS_TRIGGERED);
    rig.controller.registers().read_trigger().await;
    let reads = rig.plc.read_count();

    tokio::time::advance(Duration::from_millis(100)).await;
    let outcome = rig.controller.attempt_cycle(None).await;

    assert!(matches!(outcome, CycleOutcome::Completed { .. }));
    assert_eq!(rig.plc.read_count(), reads);
}

#[tokio::test(start_paused = true)]
async fn test_reading_just_outside_window_is_rechecked() {
    let rig = connected_rig().await;
    rig.plc.set_word(0, STATUS_TRIGGERED);
    rig.controller.registers().read_trigger().await;
    let reads = rig.plc.read_count();

    tokio::time::advance(Duration::from_millis(101)).await;
    let outcome = rig.controller.attempt_cycle(None).await;

    assert!(matches!(outcome, CycleOutcome::Completed { .. }));
    assert_eq!(rig.plc.read_count(), reads + 1);
}

#[tokio::test(start_paused = true)]
async fn test_window_accepts_stale_deassert() {
    let rig = connected_rig().await;
    rig.plc.set_word(0, STATUS_TRIGGERED);
    rig.controller.registers().read_trigger().await;

    // Deasserted inside the window: the station acts on what it last saw.
    tokio::time::advance(Duration::from_millis(30)).await;
    rig.plc.set_word(0, STATUS_IDLE);

    let outcome = rig.controller.attempt_cycle(None).await;
    assert!(matches!(outcome, CycleOutcome::Completed { .. }));
}

#[tokio::test]
async fn test_trigger_hint_skips_read() {
    let rig = connected_rig().await;
    let reads = rig.plc.read_count();

    let outcome = rig.controller.attempt_cycle(Some(true)).await;

    assert!(matches!(outcome, CycleOutcome::Completed { .. }));
    assert_eq!(rig.plc.read_count(), reads);
}

#[tokio::test]
async fn test_negative_hint_still_reads() {
    let rig = connected_rig().await;

    let outcome = rig.controller.attempt_cycle(Some(false)).await;

    assert_eq!(outcome, CycleOutcome::NotTriggered { observed: 0 });
    assert_eq!(rig.plc.read_count(), 1);
}

#[tokio::test]
async fn test_own_write_back_supersedes_reading() {
    let rig = connected_rig().await;
    rig.plc.set_word(0, STATUS_TRIGGERED);
    rig.controller.registers().read_trigger().await;

    assert!(matches!(
        rig.controller.attempt_cycle(None).await,
        CycleOutcome::Completed { .. }
    ));
    // The earlier reading of 1 predates the write of 2 and is not reused.
    assert_eq!(
        rig.controller.attempt_cycle(None).await,
        CycleOutcome::NotTriggered { observed: STATUS_DONE }
    );
    assert_eq!(rig.plc.writes().len(), 1);
}

// ============================================================================
// Device failures
// ============================================================================

#[tokio::test]
async fn test_capture_failure_writes_idle_fallback() {
    let rig = connected_rig().await;
    rig.plc.set_word(0, STATUS_TRIGGERED);
    rig.camera.fail_next("camera unplugged").unwrap();

    let outcome = rig.controller.attempt_cycle(None).await;

    assert_eq!(outcome, CycleOutcome::CaptureFailed { fallback_written: true });
    assert_eq!(rig.plc.writes(), vec![combined_write(STATUS_DONE, 2)]);
    assert_eq!(rig.detector().calls(), 0);

    let state = rig.controller.registers().state();
    assert_eq!(state.exec_count, 0);
    assert_eq!(state.last_result, None);
}

#[tokio::test(start_paused = true)]
async fn test_capture_failure_with_dead_link() {
    let rig = connected_rig().await;
    rig.plc.set_word(0, STATUS_TRIGGERED);
    rig.camera.fail_next("camera unplugged").unwrap();
    rig.plc.fail_next_writes(3);

    let outcome = rig.controller.attempt_cycle(None).await;

    assert_eq!(outcome, CycleOutcome::CaptureFailed { fallback_written: false });
    assert_eq!(rig.link().state(), LinkState::Faulted);
}

#[tokio::test(start_paused = true)]
async fn test_write_retries_exhausted_faults_link() {
    let rig = connected_rig().await;
    rig.plc.set_word(0, STATUS_TRIGGERED);
    rig.detector().push(vec![detection(4, 0.92)]);
    rig.plc.fail_next_writes(3);

    let outcome = rig.controller.attempt_cycle(None).await;

    let CycleOutcome::WriteFailed { decision } = outcome else {
        panic!("expected write failure, got {outcome:?}");
    };
    assert_eq!(decision.class_id, class(4));
    assert_eq!(rig.plc.write_attempts(), 3);
    assert_eq!(rig.link().state(), LinkState::Faulted);
    assert!(!rig.link().last_error().unwrap().is_empty());
    assert_eq!(rig.controller.registers().state().exec_count, 0);

    let status = rig.controller.status(false).await;
    assert!(!status.connected);
    assert_eq!(status.link_state, LinkState::Faulted);
    assert_eq!(status.cycles.write_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_write_result_reports_failure_directly() {
    let rig = connected_rig().await;
    rig.plc.fail_next_writes(3);

    assert!(!rig.controller.registers().write_result(class(3), 3).await);
    assert_eq!(rig.link().state(), LinkState::Faulted);
    assert!(rig.link().last_error().is_some());
    assert!(!rig.controller.status(false).await.connected);
}

#[tokio::test]
async fn test_faulted_link_reconnects_before_next_cycle() {
    let rig = connected_rig().await;
    rig.plc.fail_next_reads(1);

    assert_eq!(rig.controller.attempt_cycle(None).await, CycleOutcome::ReadFailed);
    assert_eq!(rig.link().state(), LinkState::Faulted);

    rig.plc.set_word(0, STATUS_TRIGGERED);
    let outcome = rig.controller.attempt_cycle(None).await;

    assert!(matches!(outcome, CycleOutcome::Completed { .. }));
    assert_eq!(rig.plc.handshake_count(), 2);
    assert_eq!(rig.link().state(), LinkState::Connected);
}

#[tokio::test]
async fn test_unreachable_controller_is_link_down() {
    let rig = rig_with(ScriptedDetector::new(), policy());
    rig.plc.refuse_connections(true);

    let outcome = rig.controller.attempt_cycle(Some(true)).await;

    assert_eq!(outcome, CycleOutcome::LinkDown);
    assert!(outcome.is_failure());
    assert_eq!(rig.camera.capture_count(), 0);
    assert!(!rig.controller.is_busy());
}

// ============================================================================
// Status
// ============================================================================

#[tokio::test]
async fn test_status_refresh_reads_trigger() {
    let rig = rig_with(ScriptedDetector::new(), policy());
    rig.plc.set_word(0, STATUS_TRIGGERED);

    let cached = rig.controller.status(false).await;
    assert!(!cached.connected);
    assert_eq!(cached.trigger, None);

    // Refreshing never opens the link on its own.
    let unconnected = rig.controller.status(true).await;
    assert!(!unconnected.connected);
    assert_eq!(unconnected.trigger, None);
    assert_eq!(rig.plc.handshake_count(), 0);

    assert!(rig.link().ensure_connected().await);
    let refreshed = rig.controller.status(true).await;
    assert!(refreshed.connected);
    assert_eq!(refreshed.trigger, Some(STATUS_TRIGGERED));
    assert_eq!(refreshed.transport, "mock");
    assert_eq!(refreshed.cycles.per_class.len(), 8);
    assert_eq!(refreshed.headline(), "PLC connected | executions: 0");
}

#[tokio::test(start_paused = true)]
async fn test_status_after_write_fault_stays_disconnected() {
    let rig = connected_rig().await;
    rig.plc.set_word(0, STATUS_TRIGGERED);
    rig.plc.fail_next_writes(3);

    assert!(!rig.controller.registers().write_result(class(3), 3).await);
    assert_eq!(rig.link().state(), LinkState::Faulted);

    let status = rig.controller.status(true).await;
    assert!(!status.connected);
    assert_eq!(status.link_state, LinkState::Faulted);
    assert!(status.last_error.is_some());
    assert_eq!(status.trigger, None);
    assert_eq!(rig.plc.handshake_count(), 1);
    assert_eq!(rig.plc.read_count(), 0);
}

#[tokio::test]
async fn test_connect_while_connected_is_free() {
    let rig = connected_rig().await;
    assert!(rig.link().connect().await);
    rig.controller.status(true).await;
    rig.controller.attempt_cycle(Some(true)).await;
    assert_eq!(rig.plc.handshake_count(), 1);
}
