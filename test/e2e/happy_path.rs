//! End-to-end happy path test driving the agent and the session manager
//! as two independent processes would: a real `AgentClient` registers and
//! streams against a real `AgentServiceImpl` gRPC server, then the
//! manager dispatches a command and observes the agent's reply.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p stfleet-e2e --test happy_path
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stfleet_agent::client::{AgentClient, CommandHandler, HeartbeatSampler};
use stfleet_proto::agent::v1::agent_service_server::AgentServiceServer;
use stfleet_proto::agent::v1::{CommandRequest, CommandResponse, CommandStatus, ProcessStatus, ResourceUsage, SystemInfo};
use stfleet_session_manager::grpc::AgentServiceImpl;
use stfleet_session_manager::host_updater::{HostStatusUpdater as _, InMemoryHostStatusUpdater};
use stfleet_session_manager::manager::{ManagerTimeouts, SessionManager};
use stfleet_testing::LoopbackServer;
use tokio_util::sync::CancellationToken;

struct EmptySampler;

#[async_trait]
impl HeartbeatSampler for EmptySampler {
    async fn sample(&self) -> (ResourceUsage, Vec<ProcessStatus>) {
        (ResourceUsage { cpu_pct: 1.0, mem_pct: 2.0, disk_pct: 3.0 }, vec![])
    }
}

struct EchoHandler;

#[async_trait]
impl CommandHandler for EchoHandler {
    async fn handle(&self, request: CommandRequest) -> CommandResponse {
        CommandResponse {
            command_id: request.command_id,
            status: CommandStatus::Success as i32,
            output: format!("handled {}", request.r#type),
            error: String::new(),
            timestamp_millis: 0,
        }
    }
}

#[tokio::test]
async fn agent_registers_heartbeats_and_executes_a_dispatched_command() {
    let updater = Arc::new(InMemoryHostStatusUpdater::new());
    let manager = Arc::new(SessionManager::new(updater.clone(), ManagerTimeouts::default()));

    let service = AgentServiceImpl::new(manager.clone());
    let router = tonic::transport::Server::builder().add_service(AgentServiceServer::new(service));
    let server = LoopbackServer::spawn(router).await.expect("server binds");

    let client = Arc::new(AgentClient::new(
        vec![server.url()],
        String::new(),
        "host-e2e".to_string(),
        "10.9.9.9".to_string(),
        "1.0.0".to_string(),
        SystemInfo { os_type: "linux".into(), arch: "x86_64".into(), cpu_cores: 4, total_memory_bytes: 0, total_disk_bytes: 0 },
    ));

    client.connect().await.expect("agent registers with the control plane");
    let agent_id = client.agent_id();
    assert!(!agent_id.is_empty());

    let cancel = CancellationToken::new();
    client.start_heartbeat(cancel.clone(), Duration::from_millis(50), Arc::new(EmptySampler)).await;

    let stream_client = client.clone();
    let stream_cancel = cancel.clone();
    let stream_handle =
        tokio::spawn(async move { stream_client.start_command_stream(stream_cancel, Arc::new(EchoHandler)).await });

    // Give the handshake a moment to land before the manager dispatches.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(updater.get(&agent_id).is_some(), "registration reached the host updater");

    let response = manager
        .send_command(&CancellationToken::new(), &agent_id, "DISCOVER".to_string(), Default::default(), Duration::from_secs(5))
        .await
        .expect("dispatched command completes");
    assert_eq!(response.output, "handled DISCOVER");

    // Let at least one heartbeat land before tearing down.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(updater.get(&agent_id).unwrap().last_usage.is_some());

    cancel.cancel();
    client.stop_heartbeat().await;
    let _ = stream_handle.await;
}
