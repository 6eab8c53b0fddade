use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::execution::MonitorState;
use crate::domain::operation::OperationId;

struct Tracked {
    started: Instant,
    timeout: Duration,
    state: MonitorState,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitoredExecution {
    pub operation_id: OperationId,
    pub state: MonitorState,
    pub elapsed_seconds: f64,
    pub timeout_seconds: f64,
}

/// Tracks in-flight executions and flags those that overrun their timeout.
/// Flagging never cancels the execution itself.
pub struct ExecutionMonitor {
    default_timeout: Duration,
    executions: Mutex<HashMap<OperationId, Tracked>>,
}

impl ExecutionMonitor {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout, executions: Mutex::new(HashMap::new()) }
    }

    fn executions(&self) -> MutexGuard<'_, HashMap<OperationId, Tracked>> {
        match self.executions.lock() {
            Ok(executions) => executions,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Starts tracking; `timeout` falls back to the engine default.
    pub fn start(&self, operation_id: &OperationId, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(self.default_timeout);
        self.executions().insert(
            operation_id.clone(),
            Tracked { started: Instant::now(), timeout, state: MonitorState::Executing },
        );
    }

    /// Untracks; returns the elapsed time when the operation was tracked.
    pub fn stop(&self, operation_id: &OperationId) -> Option<Duration> {
        self.executions().remove(operation_id).map(|tracked| tracked.started.elapsed())
    }

    pub fn state_of(&self, operation_id: &OperationId) -> Option<MonitorState> {
        self.executions().get(operation_id).map(|tracked| tracked.state)
    }

    /// Marks overrunning executions TIMED_OUT and returns only the newly marked ids.
    pub fn check_timeouts(&self) -> Vec<OperationId> {
        let mut executions = self.executions();
        let mut timed_out = Vec::new();

        for (operation_id, tracked) in executions.iter_mut() {
            if tracked.state == MonitorState::Executing && tracked.started.elapsed() > tracked.timeout
            {
                tracked.state = MonitorState::TimedOut;
                warn!(
                    event_name = "engine.monitor.timed_out",
                    operation_id = %operation_id,
                    timeout_seconds = tracked.timeout.as_secs_f64(),
                    "execution exceeded its timeout"
                );
                timed_out.push(operation_id.clone());
            }
        }

        timed_out
    }

    pub fn active(&self) -> Vec<MonitoredExecution> {
        let mut active: Vec<MonitoredExecution> = self
            .executions()
            .iter()
            .map(|(operation_id, tracked)| MonitoredExecution {
                operation_id: operation_id.clone(),
                state: tracked.state,
                elapsed_seconds: tracked.started.elapsed().as_secs_f64(),
                timeout_seconds: tracked.timeout.as_secs_f64(),
            })
            .collect();
        active.sort_by(|a, b| a.operation_id.cmp(&b.operation_id));
        active
    }

    /// Runs `check_timeouts` every `interval` until `shutdown` flips to true.
    /// Newly timed-out ids are forwarded to `report` when given.
    pub fn spawn_watchdog(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        report: Option<mpsc::UnboundedSender<OperationId>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                event_name = "engine.monitor.started",
                interval_ms = interval.as_millis() as u64,
                "execution watchdog started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for operation_id in self.check_timeouts() {
                            if let Some(sender) = &report {
                                let _ = sender.send(operation_id);
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!(event_name = "engine.monitor.stopped", "execution watchdog stopped");
        })
    }
}
