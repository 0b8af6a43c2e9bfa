//! Inspection cycle orchestration.
//!
//! One cycle walks through these phases while holding the inference gate:
//!
//! ```text
//! Idle → GateCheck → TriggerConfirm → Capturing → Detecting → Deciding → WritingBack
//!   ▲         │             │              │                                  │
//!   └─────────┴─────────────┴──────────────┴──────────────────────────────────┘
//!           busy     not triggered /   capture failed            written / write failed
//!                     link down           (idle fallback)
//! ```
//!
//! Busy and not-triggered are routine outcomes when the poll loop and
//! on-demand callers race; they are logged at `debug`. Capture and write
//! failures point at device trouble and are logged at `warn`.
//!
//! The gate is released on every path, including panics inside a frame
//! source or detector, because the permit lives on the cycle's stack.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, trace, warn};
use visionlink_core::constants::STATUS_DONE;
use visionlink_core::{ClassCatalog, ClassId, Decision, Detection, TriggerStatus};
use visionlink_hardware::traits::{Detector, FrameSource};

use crate::gate::InferenceGate;
use crate::link::{DeviceLink, LinkState};
use crate::registers::RegisterProtocol;
use crate::status::{ClassCount, CycleCounters, StationStatus};

/// Phase of the cycle currently holding the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    /// No cycle holds the gate.
    Idle,
    /// Gate just acquired.
    GateCheck,
    /// Checking that the controller still asserts the trigger.
    TriggerConfirm,
    /// Waiting for the frame source.
    Capturing,
    /// Waiting for the detector.
    Detecting,
    /// Reducing detections to one class.
    Deciding,
    /// Writing status and result back to the controller.
    WritingBack,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            CyclePhase::Idle => "Idle",
            CyclePhase::GateCheck => "GateCheck",
            CyclePhase::TriggerConfirm => "TriggerConfirm",
            CyclePhase::Capturing => "Capturing",
            CyclePhase::Detecting => "Detecting",
            CyclePhase::Deciding => "Deciding",
            CyclePhase::WritingBack => "WritingBack",
        };
        write!(f, "{phase}")
    }
}

impl CyclePhase {
    /// Check if transition to `target` is valid from this phase.
    ///
    /// # Examples
    ///
    /// ```
    /// use visionlink_station::cycle::CyclePhase;
    ///
    /// assert!(CyclePhase::Capturing.can_transition_to(&CyclePhase::Detecting));
    /// assert!(CyclePhase::Capturing.can_transition_to(&CyclePhase::Idle));
    /// assert!(!CyclePhase::Idle.can_transition_to(&CyclePhase::WritingBack));
    /// ```
    pub fn can_transition_to(&self, target: &CyclePhase) -> bool {
        matches!(
            (self, target),
            (CyclePhase::Idle, CyclePhase::GateCheck)
                | (CyclePhase::GateCheck, CyclePhase::TriggerConfirm)
                | (CyclePhase::TriggerConfirm, CyclePhase::Capturing)
                | (CyclePhase::Capturing, CyclePhase::Detecting)
                | (CyclePhase::Detecting, CyclePhase::Deciding)
                | (CyclePhase::Deciding, CyclePhase::WritingBack)
                // Every phase may end the cycle
                | (
                    CyclePhase::GateCheck
                        | CyclePhase::TriggerConfirm
                        | CyclePhase::Capturing
                        | CyclePhase::Detecting
                        | CyclePhase::Deciding
                        | CyclePhase::WritingBack,
                    CyclePhase::Idle
                )
        )
    }

    /// Whether the cycle has committed to an inspection.
    pub fn is_inspecting(&self) -> bool {
        matches!(
            self,
            CyclePhase::Capturing
                | CyclePhase::Detecting
                | CyclePhase::Deciding
                | CyclePhase::WritingBack
        )
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Another cycle holds the gate.
    Busy,
    /// The controller no longer asserts the trigger. `observed` is the raw
    /// status word, which may lie outside the protocol.
    NotTriggered { observed: i16 },
    /// The link was down and one reconnect attempt failed.
    LinkDown,
    /// The trigger could not be read.
    ReadFailed,
    /// No frame; the idle fallback was written if `fallback_written`.
    CaptureFailed { fallback_written: bool },
    /// The decision could not be written; the link is now faulted.
    WriteFailed { decision: Decision },
    Completed { decision: Decision, elapsed: Duration },
}

impl CycleOutcome {
    /// Routine outcomes that need no attention.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Busy | Self::NotTriggered { .. })
    }

    /// Outcomes pointing at device trouble.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::LinkDown | Self::ReadFailed | Self::CaptureFailed { .. } | Self::WriteFailed { .. }
        )
    }

    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Self::WriteFailed { decision } | Self::Completed { decision, .. } => Some(decision),
            _ => None,
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "busy"),
            Self::NotTriggered { observed } => match TriggerStatus::from_word(*observed) {
                Ok(status) => write!(f, "not-triggered (status {observed}, {status})"),
                Err(_) => write!(f, "not-triggered (unknown status {observed})"),
            },
            Self::LinkDown => write!(f, "link-down"),
            Self::ReadFailed => write!(f, "read-failed"),
            Self::CaptureFailed { fallback_written } => {
                if *fallback_written {
                    write!(f, "capture-failed (idle fallback written)")
                } else {
                    write!(f, "capture-failed (idle fallback not written)")
                }
            }
            Self::WriteFailed { decision } => {
                write!(f, "write-failed (class {})", decision.class_id)
            }
            Self::Completed { decision, elapsed } => {
                write!(f, "completed: class {}", decision.class_id)?;
                match decision.confidence {
                    Some(confidence) => write!(f, " (detected, {confidence:.2})")?,
                    None => write!(f, " (fallback)")?,
                }
                write!(f, " in {} ms", elapsed.as_millis())
            }
        }
    }
}

/// Decision and handshake settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CyclePolicy {
    /// Detections below this confidence are discarded.
    pub confidence_floor: f32,
    /// Class written when nothing clears the floor.
    pub fallback_class: ClassId,
    /// Result written with the idle fallback after a capture failure.
    pub capture_fallback_class: ClassId,
    pub trigger_window: Duration,
    /// Write attempts for the result.
    pub max_retries: u32,
}

/// Reduce detector output to one class.
///
/// Records below `floor` are discarded; the highest remaining confidence
/// wins and ties go to the earliest record. With nothing left the decision
/// is `fallback`.
///
/// # Examples
///
/// ```
/// use visionlink_core::{BoundingBox, ClassId, Detection, DecisionSource};
/// use visionlink_station::cycle::decide;
///
/// let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
/// let class = |id| ClassId::new(id).unwrap();
/// let detections = vec![
///     Detection::new(class(3), 0.40, bbox).unwrap(),
///     Detection::new(class(5), 0.85, bbox).unwrap(),
///     Detection::new(class(1), 0.05, bbox).unwrap(),
/// ];
///
/// let decision = decide(&detections, 0.1, class(2));
/// assert_eq!(decision.class_id, class(5));
/// assert_eq!(decision.source, DecisionSource::Detected);
///
/// let decision = decide(&detections[2..], 0.1, class(2));
/// assert_eq!(decision.class_id, class(2));
/// assert!(decision.is_fallback());
/// ```
pub fn decide(detections: &[Detection], floor: f32, fallback: ClassId) -> Decision {
    detections
        .iter()
        .filter(|detection| detection.confidence >= floor)
        .fold(None::<&Detection>, |best, detection| match best {
            Some(best) if best.confidence >= detection.confidence => Some(best),
            _ => Some(detection),
        })
        .map_or_else(|| Decision::fallback(fallback), Decision::detected)
}

/// Running totals, published with every finished attempt.
#[derive(Debug, Clone, Default, PartialEq)]
struct CycleStats {
    accepted: u64,
    completed: u64,
    fallbacks: u64,
    busy: u64,
    not_triggered: u64,
    link_down: u64,
    read_failed: u64,
    capture_failed: u64,
    write_failed: u64,
    per_class: BTreeMap<ClassId, u64>,
    last_decision: Option<Decision>,
    last_elapsed: Option<Duration>,
}

impl CycleStats {
    fn record(&mut self, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Busy => self.busy += 1,
            CycleOutcome::NotTriggered { .. } => self.not_triggered += 1,
            CycleOutcome::LinkDown => self.link_down += 1,
            CycleOutcome::ReadFailed => self.read_failed += 1,
            CycleOutcome::CaptureFailed { .. } => self.capture_failed += 1,
            CycleOutcome::WriteFailed { .. } => self.write_failed += 1,
            CycleOutcome::Completed { decision, elapsed } => {
                self.completed += 1;
                if decision.is_fallback() {
                    self.fallbacks += 1;
                }
                *self.per_class.entry(decision.class_id).or_default() += 1;
                self.last_decision = Some(*decision);
                self.last_elapsed = Some(*elapsed);
            }
        }
    }
}

/// Publishes the phase of the gate holder and resets it to `Idle` on drop.
struct PhaseTracker<'a> {
    phase: &'a watch::Sender<CyclePhase>,
}

impl<'a> PhaseTracker<'a> {
    fn start(phase: &'a watch::Sender<CyclePhase>) -> Self {
        let tracker = Self { phase };
        tracker.advance(CyclePhase::GateCheck);
        tracker
    }

    fn advance(&self, next: CyclePhase) {
        let current = *self.phase.borrow();
        debug_assert!(
            current.can_transition_to(&next),
            "invalid cycle phase transition {current} -> {next}"
        );
        trace!(from = %current, to = %next, "Cycle phase");
        self.phase.send_replace(next);
    }
}

impl Drop for PhaseTracker<'_> {
    fn drop(&mut self) {
        self.phase.send_replace(CyclePhase::Idle);
    }
}

/// Runs inspection cycles for one station.
///
/// Shared by the poll loop and on-demand callers; wrap it in an `Arc`.
#[derive(Debug)]
pub struct InspectionController<F, D> {
    registers: RegisterProtocol,
    frames: F,
    detector: D,
    gate: InferenceGate,
    policy: CyclePolicy,
    catalog: ClassCatalog,
    phase: watch::Sender<CyclePhase>,
    stats: watch::Sender<CycleStats>,
    next_cycle: AtomicU64,
}

impl<F: FrameSource, D: Detector> InspectionController<F, D> {
    pub fn new(
        registers: RegisterProtocol,
        frames: F,
        detector: D,
        policy: CyclePolicy,
        catalog: ClassCatalog,
    ) -> Self {
        let (phase, _) = watch::channel(CyclePhase::Idle);
        let (stats, _) = watch::channel(CycleStats::default());
        Self {
            registers,
            frames,
            detector,
            gate: InferenceGate::new(),
            policy,
            catalog,
            phase,
            stats,
            next_cycle: AtomicU64::new(1),
        }
    }

    pub fn registers(&self) -> &RegisterProtocol {
        &self.registers
    }

    pub fn link(&self) -> &Arc<DeviceLink> {
        self.registers.link()
    }

    pub fn policy(&self) -> &CyclePolicy {
        &self.policy
    }

    pub fn catalog(&self) -> &ClassCatalog {
        &self.catalog
    }

    pub fn frames(&self) -> &F {
        &self.frames
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Whether a cycle currently holds the gate.
    pub fn is_busy(&self) -> bool {
        self.gate.is_held()
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.borrow()
    }

    /// Watch the phase of the gate holder.
    pub fn subscribe_phase(&self) -> watch::Receiver<CyclePhase> {
        self.phase.subscribe()
    }

    /// Try to run one inspection cycle.
    ///
    /// `trigger_hint == Some(true)` accepts the trigger without checking it;
    /// otherwise a reading inside the debounce window is reused, and failing
    /// that the trigger is read again.
    pub async fn attempt_cycle(&self, trigger_hint: Option<bool>) -> CycleOutcome {
        let Some(_permit) = self.gate.try_acquire() else {
            debug!("Inspection busy, attempt dropped");
            self.record(&CycleOutcome::Busy);
            return CycleOutcome::Busy;
        };

        let cycle = self.next_cycle.fetch_add(1, Ordering::Relaxed);
        let outcome = {
            let tracker = PhaseTracker::start(&self.phase);
            self.run_cycle(trigger_hint, &tracker)
                .instrument(info_span!("cycle", cycle))
                .await
        };

        self.record(&outcome);
        outcome
    }

    async fn run_cycle(&self, trigger_hint: Option<bool>, tracker: &PhaseTracker<'_>) -> CycleOutcome {
        let started = Instant::now();

        tracker.advance(CyclePhase::TriggerConfirm);
        if !self.link().ensure_connected().await {
            warn!(error = ?self.link().last_error(), "Controller unreachable, cycle skipped");
            return CycleOutcome::LinkDown;
        }
        if trigger_hint == Some(true) {
            debug!("Trigger asserted by caller");
        } else if self.registers.is_trigger_fresh(self.policy.trigger_window) {
            debug!("Trigger confirmed by recent read");
        } else {
            match self.registers.read_trigger().await {
                None => {
                    warn!(error = ?self.link().last_error(), "Trigger confirmation read failed");
                    return CycleOutcome::ReadFailed;
                }
                Some(observed) => match TriggerStatus::from_word(observed) {
                    Ok(TriggerStatus::Triggered) => {}
                    Ok(status) => {
                        debug!(%status, "Trigger no longer asserted");
                        return CycleOutcome::NotTriggered { observed };
                    }
                    Err(e) => {
                        warn!(error = %e, "Status word outside the handshake, cycle skipped");
                        return CycleOutcome::NotTriggered { observed };
                    }
                },
            }
        }

        tracker.advance(CyclePhase::Capturing);
        let frame = match self.frames.capture().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Frame capture failed, closing handshake with idle fallback");
                let fallback_written = self
                    .registers
                    .write_idle_fallback(STATUS_DONE, self.policy.capture_fallback_class.as_word())
                    .await;
                return CycleOutcome::CaptureFailed { fallback_written };
            }
        };

        tracker.advance(CyclePhase::Detecting);
        let detections = match self.detector.infer(frame).await {
            Ok(detections) => detections,
            Err(e) => {
                warn!(error = %e, "Inference failed, treating frame as empty");
                Vec::new()
            }
        };
        for detection in &detections {
            debug!(
                class = %self.catalog.label(detection.class_id),
                confidence = detection.confidence,
                bbox = ?detection.bbox.as_array(),
                "Detection"
            );
        }

        tracker.advance(CyclePhase::Deciding);
        let decision = decide(
            &detections,
            self.policy.confidence_floor,
            self.policy.fallback_class,
        );

        tracker.advance(CyclePhase::WritingBack);
        if !self
            .registers
            .write_result(decision.class_id, self.policy.max_retries)
            .await
        {
            warn!(
                class = %self.catalog.label(decision.class_id),
                error = ?self.link().last_error(),
                "Result write failed"
            );
            return CycleOutcome::WriteFailed { decision };
        }

        let elapsed = started.elapsed();
        info!(
            class_id = decision.class_id.get(),
            class = %self.catalog.label(decision.class_id),
            confidence = ?decision.confidence,
            fallback = decision.is_fallback(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Inspection completed"
        );
        CycleOutcome::Completed { decision, elapsed }
    }

    fn record(&self, outcome: &CycleOutcome) {
        self.stats.send_modify(|stats| {
            if !matches!(outcome, CycleOutcome::Busy) {
                stats.accepted += 1;
            }
            stats.record(outcome);
        });
    }

    /// Snapshot for status displays, optionally re-reading the trigger first.
    ///
    /// The refresh only happens over a link that is already connected; a
    /// disconnected or faulted link is reported as it is. Callers that want
    /// a live reading connect first with [`DeviceLink::ensure_connected`].
    pub async fn status(&self, refresh_trigger: bool) -> StationStatus {
        if refresh_trigger && self.link().is_connected() {
            self.registers.read_trigger().await;
        }
        self.snapshot()
    }

    fn snapshot(&self) -> StationStatus {
        let link = self.link().status();
        let protocol = self.registers.state();
        let stats = self.stats.borrow().clone();

        let mut per_class: Vec<ClassCount> = self
            .catalog
            .iter()
            .map(|(id, name)| ClassCount {
                class_id: id.get(),
                name: name.to_string(),
                count: stats.per_class.get(&id).copied().unwrap_or(0),
            })
            .collect();
        per_class.extend(
            stats
                .per_class
                .iter()
                .filter(|(id, _)| !self.catalog.contains(**id))
                .map(|(id, count)| ClassCount {
                    class_id: id.get(),
                    name: self.catalog.label(*id),
                    count: *count,
                }),
        );

        StationStatus {
            connected: link.state == LinkState::Connected,
            link_state: link.state,
            endpoint: self.link().endpoint().to_string(),
            transport: self.link().transport_name(),
            last_error: link.last_error,
            exec_count: protocol.exec_count,
            last_result: protocol.last_result.map(|id| id.get()),
            last_result_name: protocol.last_result.map(|id| self.catalog.label(id)),
            trigger: protocol.last_trigger_value(),
            trigger_age_ms: protocol
                .last_trigger
                .map(|reading| reading.at.elapsed().as_millis() as u64),
            phase: self.phase(),
            cycles: CycleCounters {
                accepted: stats.accepted,
                completed: stats.completed,
                fallbacks: stats.fallbacks,
                busy: stats.busy,
                not_triggered: stats.not_triggered,
                link_down: stats.link_down,
                read_failed: stats.read_failed,
                capture_failed: stats.capture_failed,
                write_failed: stats.write_failed,
                per_class,
                last_decision: stats.last_decision,
                last_cycle_ms: stats.last_elapsed.map(|elapsed| elapsed.as_millis() as u64),
            },
            observed_at: chrono::Utc::now(),
        }
    }
}
