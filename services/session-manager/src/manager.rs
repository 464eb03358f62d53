//! The Agent Session Manager (§4.D): registration, heartbeat handling,
//! command dispatch, and the heartbeat timeout checker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use stfleet_proto::agent::v1::{CommandRequest, CommandResponse, CommandStatus};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ManagerError;
use crate::host_updater::{HostStatusUpdater, ResourceUsage, SystemInfo};
use crate::pending::PendingRegistry;
use crate::registry::{AgentConnection, ConnectionRegistry, ConnectionStatus, StreamSender};

/// Tunables governing the manager's timeout behavior (§6).
#[derive(Debug, Clone, Copy)]
pub struct ManagerTimeouts {
    /// How long a connection may go without a heartbeat before the
    /// checker marks it `offline`. Default 30s.
    pub heartbeat_timeout: Duration,
    /// How often the timeout checker scans the registry. Default 5s.
    pub check_interval: Duration,
}

impl Default for ManagerTimeouts {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
            check_interval: Duration::from_secs(5),
        }
    }
}

/// The control-plane side of the Agent Session Manager.
///
/// Owns the connection registry and the pending-command registry
/// exclusively (§3 "Ownership"); both are the manager's only cross-task
/// shared state. Instantiable with no global state, per §9.
pub struct SessionManager {
    connections: ConnectionRegistry,
    pending: PendingRegistry,
    host_updater: Arc<dyn HostStatusUpdater>,
    timeouts: ManagerTimeouts,
}

impl SessionManager {
    #[must_use]
    pub fn new(host_updater: Arc<dyn HostStatusUpdater>, timeouts: ManagerTimeouts) -> Self {
        Self {
            connections: ConnectionRegistry::new(),
            pending: PendingRegistry::new(),
            host_updater,
            timeouts,
        }
    }

    #[must_use]
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    #[must_use]
    pub fn pending(&self) -> &PendingRegistry {
        &self.pending
    }

    /// `RegisterRequest` handling (§4.D). Creates a `connected` record,
    /// resolves the host (best-effort — failures are logged but never
    /// block registration), and stores it. A later re-registration with
    /// the same `agent_id` overwrites the record in place.
    pub async fn register(
        &self,
        agent_id: String,
        ip_address: String,
        hostname: String,
        version: String,
        system_info: SystemInfo,
    ) -> Arc<AgentConnection> {
        let host_id = match self
            .host_updater
            .resolve_or_create_host(&ip_address, &agent_id, &version, &system_info)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(
                    agent_id = %agent_id, error = %err,
                    "host updater failed to resolve host at registration; continuing without hostId"
                );
                String::new()
            }
        };

        let connection =
            AgentConnection::new(agent_id.clone(), host_id, ip_address, hostname, version);
        let stored = self.connections.insert(connection);
        tracing::info!(agent_id = %agent_id, "agent registered");
        stored
    }

    /// `HeartbeatRequest` handling (§4.D). Errors with `AgentNotFound` if
    /// the agent never registered. Forwards the resource usage to the host
    /// updater best-effort.
    pub async fn heartbeat(
        &self,
        agent_id: &str,
        usage: ResourceUsage,
    ) -> Result<(), ManagerError> {
        let connection = self
            .connections
            .get(agent_id)
            .ok_or_else(|| ManagerError::AgentNotFound(agent_id.to_string()))?;

        connection.touch_heartbeat();

        if let Err(err) = self.host_updater.update_heartbeat_metrics(agent_id, &usage).await {
            tracing::warn!(agent_id = %agent_id, error = %err, "host updater failed to record heartbeat metrics");
        }

        Ok(())
    }

    /// Binds (or replaces) the stream reference for `agent_id`, per
    /// `setAgentStream`.
    pub fn set_agent_stream(&self, agent_id: &str, stream: StreamSender) -> Result<(), ManagerError> {
        let connection = self
            .connections
            .get(agent_id)
            .ok_or_else(|| ManagerError::AgentNotFound(agent_id.to_string()))?;
        connection.set_stream(stream);
        Ok(())
    }

    /// Explicit stream teardown: sets `disconnected`, clears the stream,
    /// and notifies the host updater best-effort.
    pub async fn handle_disconnect(&self, agent_id: &str) {
        if let Some(connection) = self.connections.get(agent_id) {
            connection.mark_disconnected();
        }
        if let Err(err) = self.host_updater.mark_host_offline(agent_id).await {
            tracing::warn!(agent_id = %agent_id, error = %err, "host updater failed to record disconnect");
        }
    }

    /// Dispatches a command and awaits its terminal reply, honoring
    /// `timeout` and `cancel` (§4.D, §5).
    pub async fn send_command(
        &self,
        cancel: &CancellationToken,
        agent_id: &str,
        command_type: String,
        parameters: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<CommandResponse, ManagerError> {
        let connection = self
            .connections
            .get(agent_id)
            .ok_or_else(|| ManagerError::AgentNotFound(agent_id.to_string()))?;

        if connection.status() != ConnectionStatus::Connected {
            return Err(ManagerError::NotConnected(agent_id.to_string()));
        }
        let stream = connection.stream().ok_or_else(|| ManagerError::StreamNotAvailable(agent_id.to_string()))?;

        let command_id = Uuid::new_v4().to_string();
        let (_entry, mut rx) =
            self.pending.register(command_id.clone(), agent_id.to_string(), command_type.clone());

        let request = CommandRequest {
            command_id: command_id.clone(),
            r#type: command_type,
            parameters,
            timeout_seconds: timeout.as_secs() as u32,
        };

        if stream.send(request).await.is_err() {
            self.pending.remove(&command_id);
            return Err(ManagerError::SendFailed(agent_id.to_string()));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.pending.expire(&command_id);
                Err(ManagerError::Cancelled(command_id))
            }
            response = rx.recv() => {
                match response {
                    Some(response) => Ok(response),
                    None => {
                        // Sender dropped without a terminal reply: treat as
                        // a timeout-shaped failure rather than panicking.
                        self.pending.expire(&command_id);
                        Err(ManagerError::CommandTimeout {
                            command_id,
                            timeout_secs: timeout.as_secs(),
                        })
                    }
                }
            }
            () = tokio::time::sleep(timeout) => {
                self.pending.expire(&command_id);
                Err(ManagerError::CommandTimeout { command_id, timeout_secs: timeout.as_secs() })
            }
        }
    }

    /// Dispatches a command without waiting for a reply, returning the
    /// generated `commandId` immediately. Correlation of the eventual
    /// response is the caller's responsibility via `handle_command_response`.
    pub async fn send_command_async(
        &self,
        agent_id: &str,
        command_type: String,
        parameters: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<String, ManagerError> {
        let connection = self
            .connections
            .get(agent_id)
            .ok_or_else(|| ManagerError::AgentNotFound(agent_id.to_string()))?;

        if connection.status() != ConnectionStatus::Connected {
            return Err(ManagerError::NotConnected(agent_id.to_string()));
        }
        let stream = connection.stream().ok_or_else(|| ManagerError::StreamNotAvailable(agent_id.to_string()))?;

        let command_id = Uuid::new_v4().to_string();
        let request = CommandRequest {
            command_id: command_id.clone(),
            r#type: command_type,
            parameters,
            timeout_seconds: timeout.as_secs() as u32,
        };

        if stream.send(request).await.is_err() {
            return Err(ManagerError::SendFailed(agent_id.to_string()));
        }

        Ok(command_id)
    }

    /// Routes an inbound `CommandResponse` frame (received off the command
    /// stream) to its pending record, if any.
    pub fn handle_command_response(&self, response: CommandResponse) {
        self.pending.handle_response(response);
    }

    /// One pass of the heartbeat timeout checker (§4.D): scans `connected`
    /// connections, transitions stale ones to `offline`, and notifies the
    /// host updater best-effort. Connections already non-connected are
    /// skipped.
    pub async fn check_heartbeat_timeouts(&self) {
        let now = std::time::Instant::now();
        for connection in self.connections.snapshot() {
            if connection.status() != ConnectionStatus::Connected {
                continue;
            }
            let elapsed = now.duration_since(connection.last_heartbeat_at());
            if elapsed > self.timeouts.heartbeat_timeout && connection.mark_offline_if_connected() {
                tracing::warn!(
                    agent_id = %connection.agent_id,
                    elapsed_secs = elapsed.as_secs(),
                    "agent heartbeat timed out, marking offline"
                );
                if let Err(err) = self.host_updater.mark_host_offline(&connection.agent_id).await {
                    tracing::warn!(agent_id = %connection.agent_id, error = %err, "host updater failed to record offline transition");
                }
            }
        }
    }

    /// Spawns the periodic timeout-checker task, running until `cancel` is
    /// triggered.
    pub fn spawn_timeout_checker(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = manager.timeouts.check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => manager.check_heartbeat_timeouts().await,
                }
            }
        })
    }
}

fn _assert_status_exhaustive(status: CommandStatus) -> CommandStatus {
    // Compile-time reminder to keep the taxonomy in sync with the proto.
    match status {
        CommandStatus::Unspecified
        | CommandStatus::Pending
        | CommandStatus::Running
        | CommandStatus::Success
        | CommandStatus::Failed
        | CommandStatus::Cancelled => status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_updater::InMemoryHostStatusUpdater;

    fn system_info() -> SystemInfo {
        SystemInfo {
            os_type: "linux".into(),
            arch: "x86_64".into(),
            cpu_cores: 8,
            total_memory_bytes: 16 * 1024 * 1024 * 1024,
            total_disk_bytes: 512 * 1024 * 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn register_creates_connected_record() {
        let updater = Arc::new(InMemoryHostStatusUpdater::new());
        let manager = SessionManager::new(updater.clone(), ManagerTimeouts::default());
        let conn = manager
            .register("agt_1".into(), "10.0.0.1".into(), "host1".into(), "1.0.0".into(), system_info())
            .await;
        assert_eq!(conn.status(), ConnectionStatus::Connected);
        assert_eq!(updater.host_count(), 1);
    }

    #[tokio::test]
    async fn heartbeat_on_unknown_agent_errors() {
        let updater = Arc::new(InMemoryHostStatusUpdater::new());
        let manager = SessionManager::new(updater, ManagerTimeouts::default());
        let result = manager
            .heartbeat("agt_missing", ResourceUsage { cpu_pct: 1.0, mem_pct: 1.0, disk_pct: 1.0 })
            .await;
        assert!(matches!(result, Err(ManagerError::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn heartbeat_updates_timestamp_and_metrics() {
        let updater = Arc::new(InMemoryHostStatusUpdater::new());
        let manager = SessionManager::new(updater.clone(), ManagerTimeouts::default());
        manager
            .register("agt_1".into(), "10.0.0.1".into(), "host1".into(), "1.0.0".into(), system_info())
            .await;

        let before = manager.connections().get("agt_1").unwrap().last_heartbeat_at();
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager
            .heartbeat("agt_1", ResourceUsage { cpu_pct: 42.0, mem_pct: 10.0, disk_pct: 5.0 })
            .await
            .unwrap();
        let after = manager.connections().get("agt_1").unwrap().last_heartbeat_at();
        assert!(after > before);
        assert_eq!(updater.get("agt_1").unwrap().last_usage.unwrap().cpu_pct, 42.0);
    }

    #[tokio::test]
    async fn send_command_without_stream_errors() {
        let updater = Arc::new(InMemoryHostStatusUpdater::new());
        let manager = SessionManager::new(updater, ManagerTimeouts::default());
        manager
            .register("agt_1".into(), "10.0.0.1".into(), "host1".into(), "1.0.0".into(), system_info())
            .await;

        let cancel = CancellationToken::new();
        let result = manager
            .send_command(&cancel, "agt_1", "START".into(), HashMap::new(), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(ManagerError::StreamNotAvailable(_))));
    }

    #[tokio::test]
    async fn send_command_not_connected_errors() {
        let updater = Arc::new(InMemoryHostStatusUpdater::new());
        let manager = SessionManager::new(updater, ManagerTimeouts::default());
        let conn = manager
            .register("agt_1".into(), "10.0.0.1".into(), "host1".into(), "1.0.0".into(), system_info())
            .await;
        conn.mark_disconnected();

        let cancel = CancellationToken::new();
        let result = manager
            .send_command(&cancel, "agt_1", "START".into(), HashMap::new(), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(ManagerError::NotConnected(_))));
    }

    #[tokio::test]
    async fn send_command_dispatches_and_awaits_reply() {
        let updater = Arc::new(InMemoryHostStatusUpdater::new());
        let manager = Arc::new(SessionManager::new(updater, ManagerTimeouts::default()));
        let conn = manager
            .register("agt_1".into(), "10.0.0.1".into(), "host1".into(), "1.0.0".into(), system_info())
            .await;

        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        conn.set_stream(tx);

        let manager2 = manager.clone();
        let dispatch = tokio::spawn(async move {
            let cancel = CancellationToken::new();
            manager2
                .send_command(&cancel, "agt_1", "START".into(), HashMap::new(), Duration::from_secs(5))
                .await
        });

        let sent = rx.recv().await.expect("command sent on stream");
        manager.handle_command_response(CommandResponse {
            command_id: sent.command_id,
            status: CommandStatus::Success as i32,
            output: "done".into(),
            error: String::new(),
            timestamp_millis: 0,
        });

        let result = dispatch.await.unwrap().unwrap();
        assert_eq!(result.output, "done");
    }

    #[tokio::test]
    async fn send_command_times_out_when_no_reply() {
        let updater = Arc::new(InMemoryHostStatusUpdater::new());
        let manager = SessionManager::new(updater, ManagerTimeouts::default());
        let conn = manager
            .register("agt_1".into(), "10.0.0.1".into(), "host1".into(), "1.0.0".into(), system_info())
            .await;
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        conn.set_stream(tx);

        let cancel = CancellationToken::new();
        let result = manager
            .send_command(&cancel, "agt_1", "START".into(), HashMap::new(), Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(ManagerError::CommandTimeout { .. })));
        assert!(manager.pending().is_empty(), "timed-out record must be removed");
    }

    #[tokio::test]
    async fn send_command_honors_cancellation() {
        let updater = Arc::new(InMemoryHostStatusUpdater::new());
        let manager = SessionManager::new(updater, ManagerTimeouts::default());
        let conn = manager
            .register("agt_1".into(), "10.0.0.1".into(), "host1".into(), "1.0.0".into(), system_info())
            .await;
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        conn.set_stream(tx);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = manager
            .send_command(&cancel, "agt_1", "START".into(), HashMap::new(), Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(ManagerError::Cancelled(_))));
    }

    #[tokio::test]
    async fn late_reply_after_timeout_is_dropped_silently() {
        let updater = Arc::new(InMemoryHostStatusUpdater::new());
        let manager = SessionManager::new(updater, ManagerTimeouts::default());
        let conn = manager
            .register("agt_1".into(), "10.0.0.1".into(), "host1".into(), "1.0.0".into(), system_info())
            .await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        conn.set_stream(tx);

        let cancel = CancellationToken::new();
        let _ = manager
            .send_command(&cancel, "agt_1", "START".into(), HashMap::new(), Duration::from_millis(10))
            .await;

        let sent = rx.recv().await.expect("command was sent before timeout");
        // Arriving after the record was already expired; must not panic.
        manager.handle_command_response(CommandResponse {
            command_id: sent.command_id,
            status: CommandStatus::Success as i32,
            output: "late".into(),
            error: String::new(),
            timestamp_millis: 0,
        });
    }

    #[tokio::test]
    async fn timeout_checker_marks_stale_connection_offline() {
        let updater = Arc::new(InMemoryHostStatusUpdater::new());
        let manager = SessionManager::new(
            updater.clone(),
            ManagerTimeouts { heartbeat_timeout: Duration::from_millis(20), check_interval: Duration::from_millis(5) },
        );
        manager
            .register("agt_1".into(), "10.0.0.1".into(), "host1".into(), "1.0.0".into(), system_info())
            .await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        manager.check_heartbeat_timeouts().await;

        assert_eq!(manager.connections().get("agt_1").unwrap().status(), ConnectionStatus::Offline);
        assert_eq!(updater.get("agt_1").unwrap().offline_calls, 1);
    }

    #[tokio::test]
    async fn timeout_checker_skips_already_disconnected() {
        let updater = Arc::new(InMemoryHostStatusUpdater::new());
        let manager = SessionManager::new(
            updater.clone(),
            ManagerTimeouts { heartbeat_timeout: Duration::from_millis(1), check_interval: Duration::from_millis(5) },
        );
        let conn = manager
            .register("agt_1".into(), "10.0.0.1".into(), "host1".into(), "1.0.0".into(), system_info())
            .await;
        conn.mark_disconnected();

        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.check_heartbeat_timeouts().await;

        assert_eq!(manager.connections().get("agt_1").unwrap().status(), ConnectionStatus::Disconnected);
        assert_eq!(updater.get("agt_1").unwrap().offline_calls, 0);
    }

    #[tokio::test]
    async fn command_ids_are_unique_across_dispatches() {
        let updater = Arc::new(InMemoryHostStatusUpdater::new());
        let manager = Arc::new(SessionManager::new(updater, ManagerTimeouts::default()));
        let conn = manager
            .register("agt_1".into(), "10.0.0.1".into(), "host1".into(), "1.0.0".into(), system_info())
            .await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        conn.set_stream(tx);

        for _ in 0..2 {
            let manager = manager.clone();
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let _ = manager
                    .send_command(&cancel, "agt_1", "DISCOVER".into(), HashMap::new(), Duration::from_millis(5))
                    .await;
            });
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut ids = std::collections::HashSet::new();
        while let Ok(req) = rx.try_recv() {
            assert!(ids.insert(req.command_id), "command ids must be unique");
        }
    }
}
