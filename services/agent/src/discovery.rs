//! Cluster Discovery Matcher (Component F, §4.F).
//!
//! Reconciles OS-observed SeaTunnel processes against the locally tracked
//! process table, adopting unknown-but-live processes and resyncing drift
//! on restart without an explicit install/start round-trip.

use serde::{Deserialize, Serialize};

use crate::monitor::{ProcessMonitor, ProcessStatus as TrackedStatus};

/// A process observed directly from the OS process table, already filtered
/// to those whose command line matches the known SeaTunnel launch pattern.
#[derive(Debug, Clone)]
pub struct ObservedProcess {
    pub pid: u32,
    pub role: String,
    pub install_dir: String,
}

/// One row of a `DiscoveryReport`: whether the observed process matched an
/// existing tracked entry or was newly adopted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryEntry {
    pub name: String,
    pub pid: u32,
    pub role: String,
    pub install_dir: String,
    pub matched: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiscoveryReport {
    pub entries: Vec<DiscoveryEntry>,
}

fn tracked_name(role: &str, install_dir: &str) -> String {
    format!("{role}@{install_dir}")
}

/// Enumerates the live OS process table and filters to entries whose
/// command line matches the known SeaTunnel launch pattern: a `java`
/// process whose arguments name an `install_dir` and a `master`/`worker`
/// role (§4.F). Linux-only; other platforms return no observations.
#[cfg(target_os = "linux")]
#[must_use]
pub fn observe_processes() -> Vec<ObservedProcess> {
    let mut observed = Vec::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return observed;
    };

    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let Ok(cmdline) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        let args: Vec<String> =
            cmdline.split(|b| *b == 0).filter(|s| !s.is_empty()).map(|s| String::from_utf8_lossy(s).into_owned()).collect();

        if !args.iter().any(|a| a.contains("seatunnel")) {
            continue;
        }
        let role = if args.iter().any(|a| a.contains("master")) {
            "master"
        } else if args.iter().any(|a| a.contains("worker")) {
            "worker"
        } else {
            continue;
        };
        let Some(install_dir) = args.iter().find_map(|a| a.strip_prefix("-Dseatunnel.install.dir=")) else {
            continue;
        };

        observed.push(ObservedProcess { pid, role: role.to_string(), install_dir: install_dir.to_string() });
    }

    observed
}

#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn observe_processes() -> Vec<ObservedProcess> {
    Vec::new()
}

/// Reconciles `observed` processes against `monitor`'s tracked table
/// in-place: known entries have `pid`/status resynced, unknown ones are
/// adopted as new tracked entries in `running` state (§4.F). Processes
/// tracked but no longer observed are left untouched; the Monitor's normal
/// liveness path ages them out.
pub async fn reconcile(monitor: &ProcessMonitor, observed: &[ObservedProcess]) -> DiscoveryReport {
    let existing = monitor.snapshot().await;
    let mut entries = Vec::with_capacity(observed.len());

    for process in observed {
        let name = tracked_name(&process.role, &process.install_dir);
        let existing_entry = existing.iter().find(|tracked| tracked.name == name);

        match existing_entry {
            Some(tracked) if tracked.pid != process.pid || tracked.status != TrackedStatus::Running => {
                // Drifted: same role + install_dir, different pid or a
                // status mismatch after an agent restart. Re-track to
                // resync; `track` is idempotent on name.
                monitor.track(&name, process.pid, &process.role, &process.install_dir).await;
                entries.push(DiscoveryEntry {
                    name,
                    pid: process.pid,
                    role: process.role.clone(),
                    install_dir: process.install_dir.clone(),
                    matched: true,
                });
            }
            Some(_) => {
                entries.push(DiscoveryEntry {
                    name,
                    pid: process.pid,
                    role: process.role.clone(),
                    install_dir: process.install_dir.clone(),
                    matched: true,
                });
            }
            None => {
                monitor.track(&name, process.pid, &process.role, &process.install_dir).await;
                entries.push(DiscoveryEntry {
                    name,
                    pid: process.pid,
                    role: process.role.clone(),
                    install_dir: process.install_dir.clone(),
                    matched: false,
                });
            }
        }
    }

    DiscoveryReport { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::NoopCrashHandler;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn monitor() -> (ProcessMonitor, mpsc::Receiver<stfleet_events::ProcessEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (ProcessMonitor::new(3, tx, Arc::new(NoopCrashHandler)), rx)
    }

    #[tokio::test]
    async fn unknown_observed_process_is_adopted() {
        let (monitor, mut rx) = monitor();
        let observed = vec![ObservedProcess { pid: 1234, role: "master".into(), install_dir: "/opt/seatunnel".into() }];

        let report = reconcile(&monitor, &observed).await;
        assert_eq!(report.entries.len(), 1);
        assert!(!report.entries[0].matched);

        let snapshot = monitor.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].pid, 1234);
        let _started = rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn known_process_with_same_pid_reports_matched_without_retrack() {
        let (monitor, mut rx) = monitor();
        monitor.track("master@/opt/seatunnel", 1234, "master", "/opt/seatunnel").await;
        let _started = rx.recv().await.unwrap();

        let observed = vec![ObservedProcess { pid: 1234, role: "master".into(), install_dir: "/opt/seatunnel".into() }];
        let report = reconcile(&monitor, &observed).await;

        assert!(report.entries[0].matched);
        assert!(rx.try_recv().is_err(), "no re-adoption event for an unchanged match");
    }

    #[tokio::test]
    async fn drifted_pid_after_restart_is_resynced() {
        let (monitor, mut rx) = monitor();
        monitor.track("master@/opt/seatunnel", 1111, "master", "/opt/seatunnel").await;
        let _started = rx.recv().await.unwrap();

        let observed = vec![ObservedProcess { pid: 2222, role: "master".into(), install_dir: "/opt/seatunnel".into() }];
        let report = reconcile(&monitor, &observed).await;

        assert!(report.entries[0].matched);
        assert_eq!(report.entries[0].pid, 2222);
        let snapshot = monitor.snapshot().await;
        assert_eq!(snapshot[0].pid, 2222);
    }

    #[tokio::test]
    async fn tracked_but_unobserved_process_is_left_for_monitor_to_age_out() {
        let (monitor, mut rx) = monitor();
        monitor.track("master@/opt/seatunnel", 1234, "master", "/opt/seatunnel").await;
        let _started = rx.recv().await.unwrap();

        let report = reconcile(&monitor, &[]).await;
        assert!(report.entries.is_empty());

        let snapshot = monitor.snapshot().await;
        assert_eq!(snapshot.len(), 1, "discovery must not remove untouched tracked entries");
    }
}
