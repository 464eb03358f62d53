//! Agent Session Manager
//!
//! The control-plane binary that maintains the agent connection registry,
//! runs the heartbeat timeout checker, and serves the `AgentService` gRPC
//! contract agents register and stream commands over.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use stfleet_proto::agent::v1::agent_service_server::AgentServiceServer;
use stfleet_session_manager::config::{CliArgs, ManagerConfig};
use stfleet_session_manager::grpc::AgentServiceImpl;
use stfleet_session_manager::host_updater::NullHostStatusUpdater;
use stfleet_session_manager::manager::{ManagerTimeouts, SessionManager};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliArgs::parse();
    let config = ManagerConfig::load(&cli)?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(listen_addr = %config.listen_addr, "starting session-manager");

    // The core ships no SQL-backed HostStatusUpdater (§6); a real deployment
    // wires a persistence-backed implementation in here.
    let host_updater = Arc::new(NullHostStatusUpdater);
    let timeouts = ManagerTimeouts {
        heartbeat_timeout: config.heartbeat_timeout(),
        check_interval: config.check_interval(),
    };
    let manager = Arc::new(SessionManager::new(host_updater, timeouts));

    let shutdown = CancellationToken::new();
    let checker_handle = manager.spawn_timeout_checker(shutdown.clone());

    let service = AgentServiceImpl::new(manager.clone());
    let server = tonic::transport::Server::builder()
        .add_service(AgentServiceServer::new(service))
        .serve_with_shutdown(config.listen_addr, async {
            shutdown.cancelled().await;
        });

    tokio::select! {
        result = server => {
            if let Err(err) = result {
                warn!(error = %err, "gRPC server exited with an error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            shutdown.cancel();
        }
    }

    shutdown.cancel();
    let _ = checker_handle.await;
    info!("session-manager shutdown complete");
    Ok(())
}
