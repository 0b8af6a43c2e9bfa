//! Station lifecycle: the poll loop and on-demand cycles around one
//! controller instance.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  trigger == 1  ┌──────────────────┐
//! │ Poll loop  │───────────────►│                  │
//! │ (interval) │                │  Cycle workers   │──► InspectionController
//! └────────────┘                │  (JoinSet)       │        (one gate)
//! ┌────────────┐ request_cycle  │                  │
//! │ Callers    │───────────────►│                  │
//! └────────────┘                └──────────────────┘
//! ```
//!
//! Both entry points share the same controller, so there is exactly one
//! connection and one gate. Every accepted attempt runs on its own task;
//! neither the poll cadence nor a caller waits on inference while holding
//! anything but its own outcome.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use visionlink_core::TriggerStatus;
use visionlink_core::constants::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_RECONNECT_INTERVAL_MS};
use visionlink_hardware::traits::{Detector, FrameSource};

use crate::cycle::{CycleOutcome, InspectionController};
use crate::status::StationStatus;
use crate::{Result, StationError};

/// How long shutdown waits for in-flight cycles before aborting them.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

type Workers = Arc<Mutex<JoinSet<CycleOutcome>>>;

/// Poll loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Period between trigger reads.
    pub interval: Duration,
    /// Minimum spacing of reconnect attempts while the link is down.
    pub reconnect_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
        }
    }
}

/// What shutdown found while draining cycle workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub completed: usize,
    /// Cycles that ended in a device failure outcome.
    pub failed: usize,
    pub cancelled: usize,
    pub panicked: usize,
}

impl ShutdownReport {
    fn note(&mut self, termination: TaskTermination) {
        match termination {
            TaskTermination::Success => self.completed += 1,
            TaskTermination::Error => self.failed += 1,
            TaskTermination::Cancelled => self.cancelled += 1,
            TaskTermination::Panic => self.panicked += 1,
        }
    }
}

/// Task termination classification for shutdown handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskTermination {
    /// Cycle ran to an outcome that needs no attention.
    Success,
    /// Cycle ended in a device failure outcome.
    Error,
    /// Cycle was aborted (drain timeout).
    Cancelled,
    /// Cycle panicked.
    Panic,
}

fn classify_task_result(result: std::result::Result<CycleOutcome, JoinError>) -> TaskTermination {
    match result {
        Ok(outcome) if outcome.is_failure() => TaskTermination::Error,
        Ok(_) => TaskTermination::Success,
        Err(e) if e.is_cancelled() => TaskTermination::Cancelled,
        Err(_) => TaskTermination::Panic,
    }
}

/// Collect finished workers so the set does not grow without bound.
fn reap_finished(workers: &mut JoinSet<CycleOutcome>) {
    while let Some(result) = workers.try_join_next() {
        if classify_task_result(result) == TaskTermination::Panic {
            error!("Inspection cycle worker panicked");
        }
    }
}

/// Entry point for running a station.
pub struct Station;

impl Station {
    /// Spawn the poll loop and return the handle owning it.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use visionlink_hardware::{AnyFrameSource, mock::ScriptedDetector};
    /// # use visionlink_station::cycle::InspectionController;
    /// use visionlink_station::station::{PollSettings, Station};
    ///
    /// # async fn example(controller: Arc<InspectionController<AnyFrameSource, ScriptedDetector>>)
    /// # -> visionlink_station::Result<()> {
    /// let handle = Station::start(controller, PollSettings::default());
    /// println!("{}", handle.status(false).await.headline());
    /// handle.shutdown().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn start<F, D>(
        controller: Arc<InspectionController<F, D>>,
        settings: PollSettings,
    ) -> StationHandle<F, D>
    where
        F: FrameSource + 'static,
        D: Detector + 'static,
    {
        let cancel = CancellationToken::new();
        let workers: Workers = Arc::new(Mutex::new(JoinSet::new()));

        let poll_task = tokio::spawn(poll_loop(
            Arc::clone(&controller),
            Arc::clone(&workers),
            settings,
            cancel.clone(),
        ));
        info!(
            endpoint = %controller.link().endpoint(),
            interval_ms = settings.interval.as_millis() as u64,
            "Station started"
        );

        StationHandle {
            controller,
            workers,
            cancel,
            poll_task,
            drain_timeout: DRAIN_TIMEOUT,
        }
    }
}

async fn poll_loop<F, D>(
    controller: Arc<InspectionController<F, D>>,
    workers: Workers,
    settings: PollSettings,
    cancel: CancellationToken,
) where
    F: FrameSource + 'static,
    D: Detector + 'static,
{
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_reconnect: Option<Instant> = None;
    let mut last_seen: Option<i16> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let link = controller.link();
        if !link.is_connected() {
            let due = last_reconnect.is_none_or(|at| at.elapsed() >= settings.reconnect_interval);
            if !due {
                continue;
            }
            last_reconnect = Some(Instant::now());
            if !link.connect().await {
                continue;
            }
        }

        let Some(status) = controller.registers().read_trigger().await else {
            last_seen = None;
            continue;
        };
        let trigger = TriggerStatus::from_word(status);
        if last_seen != Some(status) {
            match &trigger {
                Ok(trigger) => debug!(status, %trigger, "Trigger register changed"),
                Err(e) => warn!(error = %e, "Status word outside the handshake, ignored"),
            }
            last_seen = Some(status);
        }

        if matches!(trigger, Ok(TriggerStatus::Triggered)) && !controller.is_busy() {
            let controller = Arc::clone(&controller);
            let mut workers = workers.lock().await;
            reap_finished(&mut workers);
            workers.spawn(async move { controller.attempt_cycle(None).await });
        }
    }

    debug!("Poll loop stopped");
}

/// Handle to a running station.
pub struct StationHandle<F, D> {
    controller: Arc<InspectionController<F, D>>,
    workers: Workers,
    cancel: CancellationToken,
    poll_task: JoinHandle<()>,
    drain_timeout: Duration,
}

impl<F, D> StationHandle<F, D>
where
    F: FrameSource + 'static,
    D: Detector + 'static,
{
    pub fn controller(&self) -> &Arc<InspectionController<F, D>> {
        &self.controller
    }

    /// Override how long shutdown waits for in-flight cycles.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Whether the poll loop is still running.
    pub fn is_running(&self) -> bool {
        !self.poll_task.is_finished()
    }

    pub async fn status(&self, refresh_trigger: bool) -> StationStatus {
        self.controller.status(refresh_trigger).await
    }

    /// Run one cycle attempt on a worker task and wait for its outcome.
    ///
    /// The attempt keeps running if the caller stops waiting, so the
    /// controller always gets its handshake answered.
    ///
    /// # Errors
    /// Returns `StationError::WorkerLost` if the worker panicked.
    pub async fn request_cycle(&self, trigger_hint: Option<bool>) -> Result<CycleOutcome> {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let controller = Arc::clone(&self.controller);
        {
            let mut workers = self.workers.lock().await;
            reap_finished(&mut workers);
            workers.spawn(async move {
                let outcome = controller.attempt_cycle(trigger_hint).await;
                let _ = outcome_tx.send(outcome.clone());
                outcome
            });
        }

        outcome_rx
            .await
            .map_err(|_| StationError::worker_lost("cycle worker ended without an outcome"))
    }

    /// Stop polling, let in-flight cycles finish and disconnect.
    ///
    /// Cycles still running after the drain timeout are aborted.
    ///
    /// # Errors
    /// Currently infallible; worker failures are counted in the report.
    pub async fn shutdown(self) -> Result<ShutdownReport> {
        self.cancel.cancel();
        let mut report = ShutdownReport::default();

        if let Err(e) = self.poll_task.await
            && e.is_panic()
        {
            error!("Poll loop panicked");
            report.panicked += 1;
        }

        let mut workers = self.workers.lock().await;
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while let Some(result) = workers.join_next().await {
                report.note(classify_task_result(result));
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = workers.len(),
                "Cycles still running after drain timeout, aborting"
            );
            workers.abort_all();
            while let Some(result) = workers.join_next().await {
                report.note(classify_task_result(result));
            }
        }
        drop(workers);

        self.controller.link().disconnect().await;
        info!(
            completed = report.completed,
            failed = report.failed,
            cancelled = report.cancelled,
            panicked = report.panicked,
            "Station stopped"
        );
        Ok(report)
    }
}
