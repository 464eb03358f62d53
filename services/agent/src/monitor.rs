//! Process Monitor (Component C, §4.C).
//!
//! Ticker-driven liveness probing of tracked processes using POSIX
//! signal-0 semantics (`kill(pid, 0)`), crash detection with a
//! consecutive-failure threshold, and manual-stop suppression.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use stfleet_events::{ProcessEvent, ProcessEventType};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::MonitorError;

/// Liveness status of a tracked process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Stopped,
}

/// A single process tracked by the monitor.
#[derive(Debug, Clone)]
pub struct TrackedProcess {
    pub name: String,
    pub pid: u32,
    pub role: String,
    pub install_dir: String,
    pub status: ProcessStatus,
    pub consecutive_fails: u32,
    pub manually_stopped: bool,
    /// Set once the `crashed` event has fired, so later dead cycles for the
    /// same crash don't re-emit it.
    pub crash_reported: bool,
}

impl TrackedProcess {
    fn new(name: impl Into<String>, pid: u32, role: impl Into<String>, install_dir: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pid,
            role: role.into(),
            install_dir: install_dir.into(),
            status: ProcessStatus::Running,
            consecutive_fails: 0,
            manually_stopped: false,
            crash_reported: false,
        }
    }
}

/// Invoked with a snapshot of a process the moment it crosses the crash
/// threshold.
pub trait CrashHandler: Send + Sync {
    fn on_crash(&self, process: &TrackedProcess);
}

/// A crash handler that does nothing; the default when the agent only
/// needs the emitted `crashed` event, not a side-effecting callback.
pub struct NoopCrashHandler;

impl CrashHandler for NoopCrashHandler {
    fn on_crash(&self, _process: &TrackedProcess) {}
}

#[cfg(unix)]
fn is_alive(pid: u32) -> bool {
    // SAFETY: signal 0 performs no action beyond existence/permission
    // checks; it never sends an actual signal to the target.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn is_alive(_pid: u32) -> bool {
    // Non-POSIX liveness probing isn't implemented; treat as alive so the
    // monitor degrades to a no-op rather than spuriously crash-reporting.
    true
}

/// The Process Monitor. Holds the tracked-process table and drives the
/// liveness loop.
pub struct ProcessMonitor {
    processes: RwLock<HashMap<String, TrackedProcess>>,
    crash_threshold: u32,
    events_tx: mpsc::Sender<ProcessEvent>,
    crash_handler: Arc<dyn CrashHandler>,
}

impl ProcessMonitor {
    #[must_use]
    pub fn new(
        crash_threshold: u32,
        events_tx: mpsc::Sender<ProcessEvent>,
        crash_handler: Arc<dyn CrashHandler>,
    ) -> Self {
        Self { processes: RwLock::new(HashMap::new()), crash_threshold, events_tx, crash_handler }
    }

    /// Begins tracking a process and emits a `started` event.
    pub async fn track(&self, name: &str, pid: u32, role: &str, install_dir: &str) {
        let process = TrackedProcess::new(name, pid, role, install_dir);
        self.processes.write().await.insert(name.to_string(), process);
        let _ = self
            .events_tx
            .send(ProcessEvent::new(ProcessEventType::Started, name, Some(pid)))
            .await;
    }

    /// Stops tracking a process and emits a `stopped` event.
    pub async fn untrack(&self, name: &str) -> Result<(), MonitorError> {
        let removed = self.processes.write().await.remove(name);
        let process = removed.ok_or_else(|| MonitorError::NotTracked(name.to_string()))?;
        let _ = self
            .events_tx
            .send(ProcessEvent::new(ProcessEventType::Stopped, name, Some(process.pid)))
            .await;
        Ok(())
    }

    pub async fn mark_manually_stopped(&self, name: &str) -> Result<(), MonitorError> {
        let mut guard = self.processes.write().await;
        let process = guard.get_mut(name).ok_or_else(|| MonitorError::NotTracked(name.to_string()))?;
        process.manually_stopped = true;
        Ok(())
    }

    pub async fn clear_manually_stopped(&self, name: &str) -> Result<(), MonitorError> {
        let mut guard = self.processes.write().await;
        let process = guard.get_mut(name).ok_or_else(|| MonitorError::NotTracked(name.to_string()))?;
        process.manually_stopped = false;
        process.consecutive_fails = 0;
        process.crash_reported = false;
        Ok(())
    }

    #[must_use]
    pub async fn snapshot(&self) -> Vec<TrackedProcess> {
        self.processes.read().await.values().cloned().collect()
    }

    /// Runs one probe cycle over all tracked processes, mutating status and
    /// emitting `crashed` events as needed (§4.C).
    async fn tick(&self) {
        let mut guard = self.processes.write().await;
        for process in guard.values_mut() {
            if process.manually_stopped {
                continue;
            }

            if is_alive(process.pid) {
                process.status = ProcessStatus::Running;
                process.consecutive_fails = 0;
                continue;
            }

            process.consecutive_fails += 1;
            if process.consecutive_fails >= self.crash_threshold {
                process.status = ProcessStatus::Stopped;
                if !process.crash_reported {
                    process.crash_reported = true;
                    warn!(name = %process.name, pid = process.pid, "process crossed crash threshold");
                    let event = ProcessEvent::new(ProcessEventType::Crashed, &process.name, Some(process.pid))
                        .with_detail("consecutive_fails", process.consecutive_fails.to_string());
                    let _ = self.events_tx.send(event).await;
                    self.crash_handler.on_crash(process);
                }
            }
        }
    }

    /// Spawns the ticker loop; returns its handle so the caller can await
    /// or abort it on shutdown.
    ///
    /// Each tick runs as its own joined child task so a panic inside it
    /// (e.g. from a user-supplied `CrashHandler::on_crash`) is caught as a
    /// `JoinError` rather than aborting the monitor loop; the monitor logs
    /// and continues with the next tick (§7).
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("process monitor shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let this = self.clone();
                        if let Err(join_err) = tokio::spawn(async move { this.tick().await }).await {
                            warn!(error = %join_err, "monitor tick panicked; continuing with next tick");
                        }
                    }
                }
            }
        })
    }
}
