//! Agent Connection Client (Component B, §4.B).
//!
//! Maintains exactly one live logical connection to the control plane
//! chosen from a list of endpoints, emits heartbeats on a configurable
//! interval, multiplexes a single command stream with per-command response
//! dispatch, and surfaces connection state.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use stfleet_backoff::Backoff;
use stfleet_proto::agent::v1::agent_service_client::AgentServiceClient;
use stfleet_proto::agent::v1::{
    CommandRequest, CommandResponse, CommandStatus, HeartbeatRequest, HeartbeatResponse,
    ProcessStatus, RegisterRequest, RegisterResponse, ResourceUsage, SystemInfo,
};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tracing::{error, info, warn};

use crate::error::ClientError;

/// The client's connection lifecycle state (§4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Reconnecting,
}

/// Handles a single inbound `CommandRequest`, returning the response to
/// send back on the stream. Implementations must not panic across this
/// boundary; a panic or error is converted by the caller into a `FAILED`
/// response so the stream itself is never brought down (§7).
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, request: CommandRequest) -> CommandResponse;
}

/// Produces the point-in-time resource usage and process list sent on each
/// heartbeat.
#[async_trait]
pub trait HeartbeatSampler: Send + Sync {
    async fn sample(&self) -> (ResourceUsage, Vec<ProcessStatus>);
}

struct Inner {
    state: ClientState,
    agent_id: String,
}

/// The Agent Connection Client. One instance per agent process.
pub struct AgentClient {
    endpoints: Vec<String>,
    hostname: String,
    ip_address: String,
    version: String,
    system_info: SystemInfo,
    inner: RwLock<Inner>,
    channel: Mutex<Option<AgentServiceClient<Channel>>>,
    outbound: Mutex<Option<mpsc::Sender<CommandResponse>>>,
    backoff: Backoff,
    heartbeat_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AgentClient {
    #[must_use]
    pub fn new(
        endpoints: Vec<String>,
        agent_id: String,
        hostname: String,
        ip_address: String,
        version: String,
        system_info: SystemInfo,
    ) -> Self {
        Self {
            endpoints,
            hostname,
            ip_address,
            version,
            system_info,
            inner: RwLock::new(Inner { state: ClientState::Idle, agent_id }),
            channel: Mutex::new(None),
            outbound: Mutex::new(None),
            backoff: Backoff::default(),
            heartbeat_task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        self.inner.read().expect("client lock poisoned").state
    }

    #[must_use]
    pub fn agent_id(&self) -> String {
        self.inner.read().expect("client lock poisoned").agent_id.clone()
    }

    fn set_state(&self, state: ClientState) {
        self.inner.write().expect("client lock poisoned").state = state;
    }

    /// Attempts each configured endpoint in order; fails only after all
    /// fail, returning the last error. On success, registers, adopts any
    /// server-assigned id, sets state `Connected`, and resets backoff.
    /// Idempotent when already connected.
    pub async fn connect(&self) -> Result<RegisterResponse, ClientError> {
        if self.state() == ClientState::Connected {
            return Ok(RegisterResponse {
                success: true,
                assigned_id: self.agent_id(),
                message: "already connected".to_string(),
            });
        }
        self.set_state(ClientState::Connecting);

        let mut last_err: Option<String> = None;
        for endpoint in &self.endpoints {
            match AgentServiceClient::connect(endpoint.clone()).await {
                Ok(mut client) => {
                    let request = RegisterRequest {
                        agent_id: self.agent_id(),
                        ip_address: self.ip_address.clone(),
                        hostname: self.hostname.clone(),
                        agent_version: self.version.clone(),
                        system_info: Some(self.system_info.clone()),
                    };
                    match client.register(request).await {
                        Ok(response) => {
                            let response = response.into_inner();
                            if !response.assigned_id.is_empty() {
                                self.inner.write().expect("client lock poisoned").agent_id =
                                    response.assigned_id.clone();
                            }
                            *self.channel.lock().await = Some(client);
                            self.set_state(ClientState::Connected);
                            self.backoff.reset();
                            info!(endpoint = %endpoint, agent_id = %self.agent_id(), "connected to control plane");
                            return Ok(response);
                        }
                        Err(err) => last_err = Some(err.to_string()),
                    }
                }
                Err(err) => last_err = Some(err.to_string()),
            }
        }

        self.set_state(ClientState::Idle);
        Err(ClientError::NoReachableEndpoint(last_err.unwrap_or_else(|| "no endpoints configured".into())))
    }

    /// Tears down, then loops: wait `nextBackoff`, attempt `connect`;
    /// terminates on cancellation or success.
    pub async fn reconnect(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.set_state(ClientState::Reconnecting);
        *self.channel.lock().await = None;

        loop {
            let delay = self.backoff.next();
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::NotConnected),
                _ = tokio::time::sleep(delay) => {}
            }

            match self.connect().await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    warn!(error = %err, delay_ms = delay.as_millis(), "reconnect attempt failed, backing off");
                    if cancel.is_cancelled() {
                        return Err(ClientError::NotConnected);
                    }
                }
            }
        }
    }

    /// Sends a single heartbeat RPC, updating `lastHeartbeatAt` implicitly
    /// via the control plane and surfacing the response to the caller.
    pub async fn send_heartbeat(
        &self,
        usage: ResourceUsage,
        processes: Vec<ProcessStatus>,
    ) -> Result<HeartbeatResponse, ClientError> {
        let mut guard = self.channel.lock().await;
        let client = guard.as_mut().ok_or(ClientError::NotConnected)?;

        let request = HeartbeatRequest {
            agent_id: self.agent_id(),
            timestamp_millis: chrono::Utc::now().timestamp_millis(),
            resource_usage: Some(usage),
            processes,
        };

        client
            .heartbeat(request)
            .await
            .map(tonic::Response::into_inner)
            .map_err(|e| ClientError::HeartbeatFailed(e.to_string()))
    }

    /// Spawns a periodic heartbeat task. At most one heartbeat task exists
    /// at a time; calling this again replaces the previous timer.
    pub async fn start_heartbeat(
        self: &Arc<Self>,
        cancel: CancellationToken,
        interval: Duration,
        sampler: Arc<dyn HeartbeatSampler>,
    ) {
        self.stop_heartbeat().await;
        let client = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let (usage, processes) = sampler.sample().await;
                        if let Err(err) = client.send_heartbeat(usage, processes).await {
                            // Heartbeat RPC failure is logged and the loop
                            // continues, never terminating it (§7).
                            error!(error = %err, "heartbeat failed");
                        }
                    }
                }
            }
        });
        *self.heartbeat_task.lock().await = Some(handle);
    }

    pub async fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat_task.lock().await.take() {
            handle.abort();
        }
    }

    /// Opens the bidirectional command stream: sends the reserved
    /// `AGENT_INIT` frame, then concurrently consumes inbound commands,
    /// dispatching each to `handler` on its own task and sending the
    /// (possibly synthesized) response back on the same stream.
    ///
    /// Returns an error (terminating the stream) only when the receive
    /// side itself fails or closes; per-command handler failures become
    /// `FAILED` responses and never terminate the loop.
    pub async fn start_command_stream(
        &self,
        cancel: CancellationToken,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<(), ClientError> {
        let mut guard = self.channel.lock().await;
        let client = guard.as_mut().ok_or(ClientError::NotConnected)?;

        let (outbound_tx, outbound_rx) = mpsc::channel::<CommandResponse>(64);
        outbound_tx
            .send(CommandResponse {
                command_id: crate::AGENT_INIT.to_string(),
                status: CommandStatus::Success as i32,
                output: self.agent_id(),
                error: String::new(),
                timestamp_millis: chrono::Utc::now().timestamp_millis(),
            })
            .await
            .map_err(|_| ClientError::NotConnected)?;

        *self.outbound.lock().await = Some(outbound_tx.clone());

        let outbound = tokio_stream::wrappers::ReceiverStream::new(outbound_rx);
        let mut inbound = client
            .command_stream(outbound)
            .await
            .map_err(|e| ClientError::StreamError(e.to_string()))?
            .into_inner();
        drop(guard);

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                message = inbound.message() => {
                    match message {
                        Ok(Some(request)) => {
                            let handler = handler.clone();
                            let tx = outbound_tx.clone();
                            tokio::spawn(async move {
                                let command_id = request.command_id.clone();
                                let response = tokio::spawn(async move { handler.handle(request).await })
                                    .await
                                    .unwrap_or_else(|join_err| crate::failed_response(command_id, join_err.to_string()));
                                let _ = tx.send(response).await;
                            });
                        }
                        Ok(None) => break Ok(()),
                        Err(status) => break Err(ClientError::StreamError(status.to_string())),
                    }
                }
            }
        };
        *self.outbound.lock().await = None;
        result
    }

    /// Reports a process event as a `PROCESS_EVENT_REPORT` frame on the
    /// currently active command stream, if any. Errors with `NotConnected`
    /// when no stream is open; the caller (the event reporter) is
    /// expected to buffer in that case rather than propagate.
    pub async fn report_process_event(&self, event: &stfleet_events::ProcessEvent) -> Result<(), ClientError> {
        let guard = self.outbound.lock().await;
        let tx = guard.as_ref().ok_or(ClientError::NotConnected)?;

        let payload = serde_json::to_string(event).map_err(|e| ClientError::StreamError(e.to_string()))?;
        tx.send(CommandResponse {
            command_id: crate::PROCESS_EVENT_REPORT.to_string(),
            status: CommandStatus::Success as i32,
            output: payload,
            error: String::new(),
            timestamp_millis: chrono::Utc::now().timestamp_millis(),
        })
        .await
        .map_err(|_| ClientError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system_info() -> SystemInfo {
        SystemInfo {
            os_type: "linux".into(),
            arch: "x86_64".into(),
            cpu_cores: 4,
            total_memory_bytes: 8 << 30,
            total_disk_bytes: 100 << 30,
        }
    }

    #[tokio::test]
    async fn connect_fails_with_no_reachable_endpoint() {
        let client = AgentClient::new(
            vec!["http://127.0.0.1:1".into()],
            String::new(),
            "host".into(),
            "10.0.0.1".into(),
            "1.0.0".into(),
            system_info(),
        );
        let result = client.connect().await;
        assert!(matches!(result, Err(ClientError::NoReachableEndpoint(_))));
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn initial_state_is_idle() {
        let client = AgentClient::new(
            vec!["http://127.0.0.1:7443".into()],
            "agt_1".into(),
            "host".into(),
            "10.0.0.1".into(),
            "1.0.0".into(),
            system_info(),
        );
        assert_eq!(client.state(), ClientState::Idle);
        assert_eq!(client.agent_id(), "agt_1");
    }
}
