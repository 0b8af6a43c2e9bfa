//! Status snapshot for presentation layers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use visionlink_core::Decision;

use crate::cycle::CyclePhase;
use crate::link::LinkState;

/// Inspections decided for one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassCount {
    pub class_id: u16,
    pub name: String,
    pub count: u64,
}

/// Totals over every cycle attempt since startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleCounters {
    /// Attempts that acquired the gate.
    pub accepted: u64,
    pub completed: u64,
    /// Completed cycles that reported the fallback class.
    pub fallbacks: u64,
    pub busy: u64,
    pub not_triggered: u64,
    pub link_down: u64,
    pub read_failed: u64,
    pub capture_failed: u64,
    pub write_failed: u64,
    pub per_class: Vec<ClassCount>,
    pub last_decision: Option<Decision>,
    pub last_cycle_ms: Option<u64>,
}

/// Point-in-time view of the station.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationStatus {
    pub connected: bool,
    pub link_state: LinkState,
    pub endpoint: String,
    pub transport: &'static str,
    pub last_error: Option<String>,
    /// Successful result writes since startup.
    pub exec_count: u64,
    pub last_result: Option<u16>,
    pub last_result_name: Option<String>,
    /// Last status word read from the controller.
    pub trigger: Option<i16>,
    pub trigger_age_ms: Option<u64>,
    pub phase: CyclePhase,
    pub cycles: CycleCounters,
    pub observed_at: DateTime<Utc>,
}

impl StationStatus {
    /// One-line summary, like the operator panel header.
    pub fn headline(&self) -> String {
        if self.connected {
            format!("PLC connected | executions: {}", self.exec_count)
        } else {
            match &self.last_error {
                Some(error) => format!("PLC {} | {error}", self.link_state),
                None => format!("PLC {}", self.link_state),
            }
        }
    }
}
