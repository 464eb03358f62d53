//! The connection registry: `agentId -> AgentConnection` (§3, §4.D).
//!
//! The registry is the manager's only cross-task shared state besides the
//! pending-command map (`crate::pending`). Per-connection mutable fields are
//! guarded by that connection's own lock, not the registry's; the registry
//! lock only protects the map's shape (insert/remove/iterate).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use stfleet_proto::agent::v1::CommandRequest;
use tokio::sync::mpsc;

/// The lifecycle state of an [`AgentConnection`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Registered and heartbeating within timeout; commands may be
    /// dispatched.
    Connected,
    /// The stream was explicitly torn down (client-initiated disconnect).
    Disconnected,
    /// The heartbeat timeout checker determined the agent is unreachable.
    Offline,
}

/// The send side of an agent's command stream. A dedicated writer task
/// drains this channel's paired receiver onto the tonic stream, so the
/// registry's write-side is serialized per connection (§9: "per-agent
/// command fan-in").
pub type StreamSender = mpsc::Sender<CommandRequest>;

struct Mutable {
    status: ConnectionStatus,
    last_heartbeat_at: Instant,
    stream: Option<StreamSender>,
}

/// A single managed host's connection record.
///
/// `agent_id`, `ip_address`, `hostname`, `version`, and `connected_at` are
/// immutable for the lifetime of the record (a re-registration replaces the
/// whole record rather than mutating these fields in place). `status`,
/// `last_heartbeat_at`, and `stream` are mutable and guarded by an internal
/// lock, per the invariant that a connection in `Connected` state has
/// `stream != None` and `now - last_heartbeat_at <= heartbeat_timeout`.
pub struct AgentConnection {
    pub agent_id: String,
    pub host_id: String,
    pub ip_address: String,
    pub hostname: String,
    pub version: String,
    pub connected_at: Instant,
    mutable: RwLock<Mutable>,
}

impl AgentConnection {
    /// Creates a new connection record in `Connected` state with
    /// `last_heartbeat_at = now`, per registration semantics (§4.D).
    #[must_use]
    pub fn new(
        agent_id: String,
        host_id: String,
        ip_address: String,
        hostname: String,
        version: String,
    ) -> Self {
        let now = Instant::now();
        Self {
            agent_id,
            host_id,
            ip_address,
            hostname,
            version,
            connected_at: now,
            mutable: RwLock::new(Mutable {
                status: ConnectionStatus::Connected,
                last_heartbeat_at: now,
                stream: None,
            }),
        }
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.mutable.read().expect("connection lock poisoned").status
    }

    #[must_use]
    pub fn last_heartbeat_at(&self) -> Instant {
        self.mutable.read().expect("connection lock poisoned").last_heartbeat_at
    }

    /// Clones the current stream sender, if one is attached.
    #[must_use]
    pub fn stream(&self) -> Option<StreamSender> {
        self.mutable.read().expect("connection lock poisoned").stream.clone()
    }

    /// Records a fresh heartbeat timestamp.
    pub fn touch_heartbeat(&self) {
        self.mutable.write().expect("connection lock poisoned").last_heartbeat_at = Instant::now();
    }

    /// Replaces the stream reference (`setAgentStream`). Implicitly marks
    /// the connection `Connected` since a stream can only be (re)bound by
    /// an active `CommandStream` RPC.
    pub fn set_stream(&self, stream: StreamSender) {
        let mut guard = self.mutable.write().expect("connection lock poisoned");
        guard.stream = Some(stream);
        guard.status = ConnectionStatus::Connected;
    }

    /// Tears down the connection on explicit disconnect: clears the stream
    /// and transitions to `Disconnected`.
    pub fn mark_disconnected(&self) {
        let mut guard = self.mutable.write().expect("connection lock poisoned");
        guard.stream = None;
        guard.status = ConnectionStatus::Disconnected;
    }

    /// Transitions to `Offline` (heartbeat timeout checker only). A no-op
    /// if the connection is not currently `Connected` (the checker skips
    /// non-connected connections, but this guards against a racing
    /// concurrent disconnect too).
    ///
    /// Returns `true` if the transition was applied.
    pub fn mark_offline_if_connected(&self) -> bool {
        let mut guard = self.mutable.write().expect("connection lock poisoned");
        if guard.status == ConnectionStatus::Connected {
            guard.status = ConnectionStatus::Offline;
            true
        } else {
            false
        }
    }
}

/// Concurrent registry of agent connections, keyed by `agentId`.
///
/// Lookups by id are O(1); lookup by IP scans the map and returns on first
/// match, per §4.D.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<AgentConnection>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the record for `agent_id` (registration and
    /// re-registration both go through this path).
    pub fn insert(&self, connection: AgentConnection) -> Arc<AgentConnection> {
        let agent_id = connection.agent_id.clone();
        let arc = Arc::new(connection);
        self.connections
            .write()
            .expect("registry lock poisoned")
            .insert(agent_id, arc.clone());
        arc
    }

    #[must_use]
    pub fn get(&self, agent_id: &str) -> Option<Arc<AgentConnection>> {
        self.connections.read().expect("registry lock poisoned").get(agent_id).cloned()
    }

    /// Scans for the first connection whose `ip_address` matches, stopping
    /// at the first match.
    #[must_use]
    pub fn get_by_ip(&self, ip_address: &str) -> Option<Arc<AgentConnection>> {
        self.connections
            .read()
            .expect("registry lock poisoned")
            .values()
            .find(|conn| conn.ip_address == ip_address)
            .cloned()
    }

    /// Snapshot of every currently-registered connection, for the timeout
    /// checker's scan.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<AgentConnection>> {
        self.connections.read().expect("registry lock poisoned").values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().expect("registry lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, agent_id: &str) -> Option<Arc<AgentConnection>> {
        self.connections.write().expect("registry lock poisoned").remove(agent_id)
    }
}
