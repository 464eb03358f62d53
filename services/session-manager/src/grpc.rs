//! The `AgentService` gRPC surface (§4.D): thin adapters from proto
//! messages to the manager's native types, mapping `ManagerError` onto
//! `tonic::Status` codes.

use std::pin::Pin;

use futures_util::Stream;
use stfleet_proto::agent::v1::agent_service_server::AgentService;
use stfleet_proto::agent::v1::{
    CommandRequest, CommandResponse, CommandStatus, HeartbeatRequest, HeartbeatResponse,
    RegisterRequest, RegisterResponse, SystemInfo as ProtoSystemInfo,
};
use tonic::{Request, Response, Status, Streaming};

use crate::host_updater::{ResourceUsage, SystemInfo};
use crate::manager::SessionManager;

/// Reserved `command_id` for an agent's first outbound frame on the command
/// stream, carrying its (possibly freshly-assigned) agent id in `output`
/// (§6, §9).
pub const AGENT_INIT: &str = "AGENT_INIT";

/// Reserved `command_id` for a `ProcessEvent` frame, JSON-encoded in
/// `output` (§6).
pub const PROCESS_EVENT_REPORT: &str = "PROCESS_EVENT_REPORT";

type CommandRequestStream = Pin<Box<dyn Stream<Item = Result<CommandRequest, Status>> + Send + 'static>>;

/// Adapter between the `AgentService` RPC surface and [`SessionManager`].
pub struct AgentServiceImpl {
    manager: std::sync::Arc<SessionManager>,
}

impl AgentServiceImpl {
    #[must_use]
    pub fn new(manager: std::sync::Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

fn from_proto_system_info(info: Option<ProtoSystemInfo>) -> SystemInfo {
    let info = info.unwrap_or_default();
    SystemInfo {
        os_type: info.os_type,
        arch: info.arch,
        cpu_cores: info.cpu_cores,
        total_memory_bytes: info.total_memory_bytes,
        total_disk_bytes: info.total_disk_bytes,
    }
}

#[tonic::async_trait]
impl AgentService for AgentServiceImpl {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let remote_ip = request
            .remote_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default();
        let req = request.into_inner();

        let ip_address = if req.ip_address.is_empty() { remote_ip } else { req.ip_address };
        let agent_id = if req.agent_id.is_empty() {
            stfleet_id::AgentId::new().to_string()
        } else {
            req.agent_id
        };

        self.manager
            .register(
                agent_id.clone(),
                ip_address,
                req.hostname,
                req.agent_version,
                from_proto_system_info(req.system_info),
            )
            .await;

        Ok(Response::new(RegisterResponse {
            success: true,
            assigned_id: agent_id,
            message: "registered".to_string(),
        }))
    }

    async fn heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        let req = request.into_inner();
        let usage = req.resource_usage.unwrap_or_default();

        self.manager
            .heartbeat(
                &req.agent_id,
                ResourceUsage { cpu_pct: usage.cpu_pct, mem_pct: usage.mem_pct, disk_pct: usage.disk_pct },
            )
            .await
            .map_err(Status::from)?;

        Ok(Response::new(HeartbeatResponse {
            acknowledged: true,
            message: String::new(),
            directives: Default::default(),
        }))
    }

    type CommandStreamStream = CommandRequestStream;

    async fn command_stream(
        &self,
        request: Request<Streaming<CommandResponse>>,
    ) -> Result<Response<Self::CommandStreamStream>, Status> {
        let mut inbound = request.into_inner();

        let first = inbound
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("command stream closed before AGENT_INIT"))?;
        if first.command_id != AGENT_INIT {
            return Err(Status::invalid_argument("first frame on command stream must be AGENT_INIT"));
        }
        let agent_id = first.output;

        let (tx, rx) = tokio::sync::mpsc::channel::<CommandRequest>(64);
        self.manager.set_agent_stream(&agent_id, tx).map_err(Status::from)?;

        let manager = self.manager.clone();
        let agent_id_for_task = agent_id.clone();
        tokio::spawn(async move {
            loop {
                match inbound.message().await {
                    Ok(Some(response)) => {
                        if response.command_id == PROCESS_EVENT_REPORT {
                            tracing::debug!(agent_id = %agent_id_for_task, event = %response.output, "received process event report");
                            continue;
                        }
                        manager.handle_command_response(response);
                    }
                    Ok(None) => {
                        tracing::info!(agent_id = %agent_id_for_task, "command stream closed by agent");
                        manager.handle_disconnect(&agent_id_for_task).await;
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(agent_id = %agent_id_for_task, error = %err, "command stream receive error");
                        manager.handle_disconnect(&agent_id_for_task).await;
                        break;
                    }
                }
            }
        });

        let outbound = tokio_stream::wrappers::ReceiverStream::new(rx).map(Ok);
        Ok(Response::new(Box::pin(outbound) as Self::CommandStreamStream))
    }
}

use tokio_stream::StreamExt as _;

/// Synthesizes a `FAILED` response for a command that errored or panicked
/// in an isolated handler, per §7 ("a handler's failure becomes a `FAILED`
/// response, never crashes the stream").
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
