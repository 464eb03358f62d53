//! # stfleet-events
//!
//! Process event type definitions shared by the agent's Process Monitor and
//! the control plane's event consumers.
//!
//! Process events are the unit the Process Monitor (Component C) emits when
//! a tracked process transitions (`started`, `stopped`, `crashed`,
//! `restarted`). They travel over the command stream as
//! `PROCESS_EVENT_REPORT` frames, JSON-encoded in `CommandResponse.output`.

mod error;
mod types;

pub use error::EventError;
pub use types::*;
