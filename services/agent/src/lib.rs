//! Agent Client Runtime
//!
//! The agent process runs on each managed host. It maintains a single
//! logical connection to the control plane's Agent Session Manager
//! (`client`), tracks the liveness of locally installed SeaTunnel processes
//! and reports their lifecycle events (`monitor`, `event_reporter`),
//! reconciles OS-observed processes against that tracked table on demand
//! (`discovery`), and drives cluster installs end to end (`installer`).

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod event_reporter;
pub mod installer;
pub mod monitor;

use stfleet_proto::agent::v1::{CommandResponse, CommandStatus};

/// Reserved `command_id` for the agent's first outbound frame on the
/// command stream, carrying its agent id in `output` (§9 Design Notes).
pub const AGENT_INIT: &str = "AGENT_INIT";

/// Reserved `command_id` marking an outbound frame that carries a
/// JSON-encoded `ProcessEvent` in `output` rather than a command result.
pub const PROCESS_EVENT_REPORT: &str = "PROCESS_EVENT_REPORT";

/// Synthesizes a `FAILED` response for a command whose handler panicked or
/// otherwise could not run, so a single bad command never silently drops
/// its reply (§7).
#[must_use]
pub fn failed_response(command_id: impl Into<String>, error: impl Into<String>) -> CommandResponse {
    CommandResponse {
        command_id: command_id.into(),
        status: CommandStatus::Failed as i32,
        output: String::new(),
        error: error.into(),
        timestamp_millis: chrono::Utc::now().timestamp_millis(),
    }
}
