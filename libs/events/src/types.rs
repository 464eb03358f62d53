//! Process event type definitions.
//!
//! A `ProcessEvent` records a single liveness transition observed by the
//! Process Monitor (`started`, `stopped`, `crashed`, `restarted`) for a
//! tracked process on the managed host. Events are ordered per process name
//! by `timestamp`, with ties broken by monotonic creation order (`seq`).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of liveness transition a `ProcessEvent` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessEventType {
    /// The process was tracked and found (or became) live.
    Started,
    /// The process was explicitly untracked or cleanly stopped.
    Stopped,
    /// The process crossed the consecutive-failure threshold.
    Crashed,
    /// The process was restarted after a crash or manual intervention.
    Restarted,
}

impl std::fmt::Display for ProcessEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
            Self::Restarted => "restarted",
        };
        write!(f, "{s}")
    }
}

/// Global monotonic counter used to break timestamp ties between events in
/// creation order, per §3 ("Process Event").
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// A single process liveness event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessEvent {
    /// The kind of transition.
    pub event_type: ProcessEventType,

    /// The OS process id at the time of the event, if known.
    pub pid: Option<u32>,

    /// The tracked process's logical name (role + install directory).
    pub name: String,

    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// Free-form event details (e.g. `consecutive_fails`, `exit_reason`).
    #[serde(default)]
    pub details: BTreeMap<String, String>,

    /// Monotonic creation sequence, used only to break timestamp ties; not
    /// part of the wire contract with the control plane.
    #[serde(skip)]
    pub seq: u64,
}

impl ProcessEvent {
    /// Builds a new event, stamping it with the next creation sequence
    /// number.
    #[must_use]
    pub fn new(event_type: ProcessEventType, name: impl Into<String>, pid: Option<u32>) -> Self {
        Self {
            event_type,
            pid,
            name: name.into(),
            timestamp: Utc::now(),
            details: BTreeMap::new(),
            seq: EVENT_SEQ.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Attaches a detail key/value pair, builder-style.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Total order used for per-process-name event ordering: by `timestamp`,
    /// then by creation sequence.
    #[must_use]
    pub fn ordering_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_created_in_increasing_sequence() {
        let a = ProcessEvent::new(ProcessEventType::Started, "master-1", Some(100));
        let b = ProcessEvent::new(ProcessEventType::Stopped, "master-1", Some(100));
        assert!(b.seq > a.seq);
    }

    #[test]
    fn event_type_serializes_snake_case() {
        let json = serde_json::to_string(&ProcessEventType::Crashed).unwrap();
        assert_eq!(json, "\"crashed\"");
    }

    #[test]
    fn details_builder_accumulates() {
        let event = ProcessEvent::new(ProcessEventType::Crashed, "worker-2", None)
            .with_detail("consecutive_fails", "3")
            .with_detail("install_dir", "/opt/seatunnel");
        assert_eq!(event.details.get("consecutive_fails").unwrap(), "3");
        assert_eq!(event.details.len(), 2);
    }
}
