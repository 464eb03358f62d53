//! The pending-command registry: `commandId -> PendingCommand` (§3, §4.D).
//!
//! Each record is the rendezvous point between `sendCommand`'s caller and
//! `handleCommandResponse`, which is invoked from the command-stream
//! receiver loop as responses arrive. The reply channel is single-slot
//! (`mpsc::channel(1)`) with a non-blocking `try_send`: at most one reply is
//! ever expected, and a late or duplicate response against a `done` record
//! is silently dropped rather than blocking the stream receiver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use stfleet_proto::agent::v1::{CommandResponse, CommandStatus};
use tokio::sync::mpsc;

/// Statuses that delete the pending record once observed (§3).
fn is_terminal(status: CommandStatus) -> bool {
    matches!(
        status,
        CommandStatus::Success | CommandStatus::Failed | CommandStatus::Cancelled
    )
}

/// A single in-flight command dispatch awaiting a reply.
pub struct PendingCommand {
    pub command_id: String,
    pub agent_id: String,
    pub command_type: String,
    pub created_at: Instant,
    done: AtomicBool,
    reply_tx: mpsc::Sender<CommandResponse>,
}

impl PendingCommand {
    /// Whether this record has already been resolved (reply delivered,
    /// timed out, or cancelled). Racing callers use this to avoid acting
    /// twice on the same command.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Atomically marks the record done, returning whether this call was
    /// the one that made the transition (i.e. it was not already done).
    pub fn mark_done(&self) -> bool {
        self.done.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }
}

/// Concurrent registry of pending commands, keyed by `commandId`.
#[derive(Default)]
pub struct PendingRegistry {
    pending: RwLock<HashMap<String, Arc<PendingCommand>>>,
}

impl PendingRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new pending command with a single-slot reply channel,
    /// returning the receiver the caller should await.
    pub fn register(
        &self,
        command_id: String,
        agent_id: String,
        command_type: String,
    ) -> (Arc<PendingCommand>, mpsc::Receiver<CommandResponse>) {
        let (tx, rx) = mpsc::channel(1);
        let entry = Arc::new(PendingCommand {
            command_id: command_id.clone(),
            agent_id,
            command_type,
            created_at: Instant::now(),
            done: AtomicBool::new(false),
            reply_tx: tx,
        });
        self.pending.write().expect("pending lock poisoned").insert(command_id, entry.clone());
        (entry, rx)
    }

    /// Registers a command dispatched without a reply channel
    /// (`sendCommandAsync`): the caller gets the id back immediately and
    /// responses are expected to be correlated separately, so no entry is
    /// stored here at all — callers that want correlation must call
    /// `register` and discard the receiver, or track ids out-of-band.
    #[must_use]
    pub fn contains(&self, command_id: &str) -> bool {
        self.pending.read().expect("pending lock poisoned").contains_key(command_id)
    }

    pub fn remove(&self, command_id: &str) -> Option<Arc<PendingCommand>> {
        self.pending.write().expect("pending lock poisoned").remove(command_id)
    }

    #[must_use]
    pub fn get(&self, command_id: &str) -> Option<Arc<PendingCommand>> {
        self.pending.read().expect("pending lock poisoned").get(command_id).cloned()
    }

    /// Delivers an incoming `CommandResponse` to its pending record, per
    /// `handleCommandResponse` (§4.D): if the record is absent or already
    /// done, the response is dropped. Otherwise it is delivered
    /// non-blockingly; on a terminal status the record is marked done and
    /// removed.
    pub fn handle_response(&self, response: CommandResponse) {
        let Some(entry) = self.get(&response.command_id) else {
            tracing::debug!(command_id = %response.command_id, "dropping response for unknown command");
            return;
        };
        if entry.is_done() {
            tracing::debug!(command_id = %response.command_id, "dropping response for already-done command");
            return;
        }

        let status = CommandStatus::try_from(response.status).unwrap_or(CommandStatus::Failed);
        let terminal = is_terminal(status);

        if terminal {
            // Mark done before removal so a concurrent timeout cannot also
            // act on this record.
            if !entry.mark_done() {
                return;
            }
        }

        if entry.reply_tx.try_send(response).is_err() {
            tracing::debug!(command_id = %entry.command_id, "reply channel full or closed, dropping response");
        }

        if terminal {
            self.remove(&entry.command_id);
        }
    }

    /// Called by the timeout path: marks done and removes the record,
    /// returning `true` if this call won the race against a concurrent
    /// `handle_response`.
    pub fn expire(&self, command_id: &str) -> bool {
        let Some(entry) = self.get(command_id) else {
            return false;
        };
        let won = entry.mark_done();
        self.remove(command_id);
        won
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.read().expect("pending lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn response_delivered_to_matching_pending_command() {
        let registry = PendingRegistry::new();
        let (_entry, mut rx) = registry.register("cmd-1".into(), "agt_1".into(), "START".into());

        registry.handle_response(CommandResponse {
            command_id: "cmd-1".into(),
            status: CommandStatus::Success as i32,
            output: "ok".into(),
            error: String::new(),
            timestamp_millis: 0,
        });

        let received = rx.recv().await.expect("reply delivered");
        assert_eq!(received.output, "ok");
        assert!(registry.get("cmd-1").is_none(), "terminal status removes the record");
    }

    #[tokio::test]
    async fn unknown_command_id_is_dropped_silently() {
        let registry = PendingRegistry::new();
        // Should not panic even though nothing is registered.
        registry.handle_response(CommandResponse {
            command_id: "ghost".into(),
            status: CommandStatus::Success as i32,
            output: String::new(),
            error: String::new(),
            timestamp_millis: 0,
        });
    }

    #[tokio::test]
    async fn intermediate_status_does_not_remove_record() {
        let registry = PendingRegistry::new();
        let (_entry, mut rx) = registry.register("cmd-2".into(), "agt_1".into(), "INSTALL".into());

        registry.handle_response(CommandResponse {
            command_id: "cmd-2".into(),
            status: CommandStatus::Running as i32,
            output: "50%".into(),
            error: String::new(),
            timestamp_millis: 0,
        });

        assert!(registry.get("cmd-2").is_some());
        let received = rx.recv().await.expect("reply delivered");
        assert_eq!(received.output, "50%");
    }

    #[tokio::test]
    async fn expire_then_late_response_is_dropped() {
        let registry = PendingRegistry::new();
        let (_entry, mut rx) = registry.register("cmd-3".into(), "agt_1".into(), "START".into());

        assert!(registry.expire("cmd-3"));
        assert!(registry.get("cmd-3").is_none());

        // A late response racing the expiry has nothing to deliver to.
        registry.handle_response(CommandResponse {
            command_id: "cmd-3".into(),
            status: CommandStatus::Success as i32,
            output: "too-late".into(),
            error: String::new(),
            timestamp_millis: 0,
        });
        assert!(rx.try_recv().is_err());
    }
}
