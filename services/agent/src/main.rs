//! Agent Client Runtime binary.
//!
//! Connects to the control plane, runs the heartbeat and command-stream
//! loops, tracks locally managed SeaTunnel processes, and dispatches
//! installer/discovery commands received over the stream.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use stfleet_agent::client::{AgentClient, CommandHandler, HeartbeatSampler};
use stfleet_agent::config::{AgentConfig, CliArgs};
use stfleet_agent::discovery::{self, DiscoveryReport};
use stfleet_agent::error::InstallerError;
use stfleet_agent::event_reporter::{EventReporter, EventSink};
use stfleet_agent::failed_response;
use stfleet_agent::installer::configure::DeploymentMode;
use stfleet_agent::installer::progress::ChannelProgressReporter;
use stfleet_agent::installer::{acquire, configure, extract, InstallStep, InstallWorkflow, StepOutcome};
use stfleet_agent::monitor::{NoopCrashHandler, ProcessMonitor};
use stfleet_events::ProcessEvent;
use stfleet_proto::agent::v1::{CommandRequest, CommandResponse, CommandStatus, ProcessStatus, ResourceUsage, SystemInfo};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Forwards drained event batches onto the live command stream via the
/// connection client; a disconnected client surfaces as a log rather than
/// an error since the reporter itself has already buffered the event.
struct StreamEventSink {
    client: Arc<AgentClient>,
}

#[async_trait]
impl EventSink for StreamEventSink {
    async fn send_batch(&self, events: Vec<ProcessEvent>) {
        for event in events {
            if let Err(err) = self.client.report_process_event(&event).await {
                error!(error = %err, name = %event.name, "failed to report process event");
            }
        }
    }
}

struct StaticSampler {
    monitor: Arc<ProcessMonitor>,
}

#[async_trait]
impl HeartbeatSampler for StaticSampler {
    async fn sample(&self) -> (ResourceUsage, Vec<ProcessStatus>) {
        let processes = self
            .monitor
            .snapshot()
            .await
            .into_iter()
            .map(|p| ProcessStatus {
                name: p.name,
                pid: p.pid,
                role: p.role,
                status: format!("{:?}", p.status).to_lowercase(),
            })
            .collect();
        // Host resource sampling (cpu/mem/disk) beyond this point is an
        // external concern this runtime does not own; report zeroed
        // usage rather than fabricating numbers.
        (ResourceUsage::default(), processes)
    }
}

struct AgentCommandHandler {
    monitor: Arc<ProcessMonitor>,
}

#[async_trait]
impl CommandHandler for AgentCommandHandler {
    async fn handle(&self, request: CommandRequest) -> CommandResponse {
        let command_id = request.command_id.clone();
        match request.r#type.as_str() {
            "DISCOVER" | "DISCOVER_PROCESSES" => {
                let observed = discovery::observe_processes();
                let report: DiscoveryReport = discovery::reconcile(&self.monitor, &observed).await;
                match serde_json::to_string(&report) {
                    Ok(output) => success_response(command_id, output),
                    Err(err) => failed_response(command_id, err.to_string()),
                }
            }
            "MARK_MANUALLY_STOPPED" => {
                let Some(name) = request.parameters.get("name") else {
                    return failed_response(command_id, "missing 'name' parameter".to_string());
                };
                match self.monitor.mark_manually_stopped(name).await {
                    Ok(()) => success_response(command_id, String::new()),
                    Err(err) => failed_response(command_id, err.to_string()),
                }
            }
            "INSTALL" => self.handle_install(command_id, &request.parameters).await,
            other => failed_response(command_id, format!("unsupported command type: {other}")),
        }
    }
}

impl AgentCommandHandler {
    /// Drives the Installer Workflow Engine's nine steps for a single
    /// `INSTALL` command, returning the final response once the workflow
    /// completes or halts on a step failure (§4.E, §2: installs run on the
    /// agent side under the command handler).
    async fn handle_install(&self, command_id: String, parameters: &HashMap<String, String>) -> CommandResponse {
        let params = match InstallParams::from_parameters(parameters) {
            Ok(params) => params,
            Err(err) => return failed_response(command_id, err.to_string()),
        };

        let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel(64);
        let task_id = params.task_id.clone();
        let drain_handle = tokio::spawn(async move {
            while let Some(event) = progress_rx.recv().await {
                info!(task_id = %task_id, event = ?event, "install progress");
            }
        });

        let mut workflow = InstallWorkflow::new(params.task_id.clone(), Arc::new(ChannelProgressReporter::new(progress_tx)));
        let cancel = CancellationToken::new();
        let result = run_install_steps(&mut workflow, &cancel, &params).await;
        drain_handle.abort();

        match result {
            Ok(()) => success_response(
                command_id,
                format!("install {} reached {}% progress", params.task_id, workflow.progress()),
            ),
            Err(err) => failed_response(command_id, err.to_string()),
        }
    }
}

/// Parameters for an `INSTALL` command, parsed from its flat
/// string-to-string parameter map (§3, §6).
struct InstallParams {
    task_id: String,
    package_url: Option<String>,
    local_path: Option<String>,
    sha256: Option<String>,
    install_dir: PathBuf,
    deployment_mode: DeploymentMode,
    masters: Vec<String>,
    workers: Vec<String>,
    master_port: u16,
    worker_port: u16,
    heap_gb: u32,
    cluster_name: String,
    checkpoint_dir: Option<String>,
    plugins: Vec<String>,
}

impl InstallParams {
    fn from_parameters(parameters: &HashMap<String, String>) -> Result<Self, InstallerError> {
        let get = |key: &str| parameters.get(key).cloned();
        let csv = |key: &str| -> Vec<String> {
            get(key).unwrap_or_default().split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
        };
        let install_dir =
            get("install_dir").ok_or_else(|| InstallerError::ConfigPathNotFound("install_dir".to_string()))?;

        Ok(Self {
            task_id: get("task_id").unwrap_or_else(|| stfleet_id::TaskId::new().to_string()),
            package_url: get("package_url"),
            local_path: get("local_path"),
            sha256: get("sha256"),
            install_dir: PathBuf::from(install_dir),
            deployment_mode: get("deployment_mode").unwrap_or_else(|| "hybrid".to_string()).parse()?,
            masters: csv("masters"),
            workers: csv("workers"),
            master_port: get("master_port").and_then(|v| v.parse().ok()).unwrap_or(5701),
            worker_port: get("worker_port").and_then(|v| v.parse().ok()).unwrap_or(5702),
            heap_gb: get("heap_gb").and_then(|v| v.parse().ok()).unwrap_or(2),
            cluster_name: get("cluster_name").unwrap_or_else(|| "seatunnel".to_string()),
            checkpoint_dir: get("checkpoint_dir"),
            plugins: csv("plugins"),
        })
    }
}

/// Drives the nine canonical install steps (§3, §4.E) against the real
/// acquisition/verification/extraction/configuration implementations.
async fn run_install_steps(
    workflow: &mut InstallWorkflow,
    cancel: &CancellationToken,
    params: &InstallParams,
) -> Result<(), InstallerError> {
    let package_path = params.install_dir.join("package.tar.gz");

    workflow
        .execute_step(InstallStep::Download, cancel, |progress| {
            let package_path = package_path.clone();
            let package_url = params.package_url.clone();
            let local_path = params.local_path.clone();
            async move {
                if let Some(url) = package_url {
                    let progress_for_download = progress.clone();
                    let result = acquire::fetch_url(&url, &package_path, move |received, total| {
                        let percent = total
                            .filter(|&t| t > 0)
                            .map(|t| ((received.saturating_mul(100)) / t).min(100) as u8)
                            .unwrap_or(0);
                        let progress = progress_for_download.clone();
                        tokio::spawn(async move { progress.running(percent, format!("{received} bytes received")).await });
                    })
                    .await;
                    match result {
                        Ok(()) => StepOutcome::Succeeded,
                        Err(err) => StepOutcome::Failed(err),
                    }
                } else if let Some(local) = local_path {
                    match acquire::verify_local(Path::new(&local)) {
                        Ok(()) => match std::fs::copy(&local, &package_path) {
                            Ok(_) => StepOutcome::Succeeded,
                            Err(err) => StepOutcome::Failed(err.into()),
                        },
                        Err(err) => StepOutcome::Failed(err),
                    }
                } else {
                    StepOutcome::Failed(InstallerError::Http("no package source configured".to_string()))
                }
            }
        })
        .await?;

    workflow
        .execute_step(InstallStep::Verify, cancel, |_progress| {
            let package_path = package_path.clone();
            let sha256 = params.sha256.clone();
            async move {
                match sha256 {
                    Some(expected) => match acquire::verify_checksum(&package_path, &expected) {
                        Ok(()) => StepOutcome::Succeeded,
                        Err(err) => StepOutcome::Failed(err),
                    },
                    None => StepOutcome::Skipped("no checksum supplied with the install request".to_string()),
                }
            }
        })
        .await?;

    workflow
        .execute_step(InstallStep::Extract, cancel, |_progress| {
            let package_path = package_path.clone();
            let install_dir = params.install_dir.clone();
            async move {
                match extract::extract_tar_gz(&package_path, &install_dir) {
                    Ok(()) => StepOutcome::Succeeded,
                    Err(err) => StepOutcome::Failed(err),
                }
            }
        })
        .await?;

    workflow
        .execute_step(InstallStep::ConfigureCluster, cancel, |_progress| {
            let install_dir = params.install_dir.clone();
            let mode = params.deployment_mode;
            let masters = params.masters.clone();
            let workers = params.workers.clone();
            let master_port = params.master_port;
            let worker_port = params.worker_port;
            let cluster_name = params.cluster_name.clone();
            async move {
                let config_file = install_dir.join("config/hazelcast.yaml");
                let members = configure::member_list(mode, &masters, &workers, master_port, worker_port);
                let rewrite = (|| -> Result<(), InstallerError> {
                    configure::set_value(&config_file, "hazelcast.cluster-name", serde_yaml::Value::from(cluster_name))?;
                    configure::set_value(
                        &config_file,
                        "hazelcast.network.join.tcp-ip.member-list",
                        serde_yaml::Value::Sequence(members.into_iter().map(serde_yaml::Value::from).collect()),
                    )
                })();
                match rewrite {
                    Ok(()) => StepOutcome::Succeeded,
                    Err(err) => StepOutcome::Failed(err),
                }
            }
        })
        .await?;

    workflow
        .execute_step(InstallStep::ConfigureCheckpoint, cancel, |_progress| {
            let install_dir = params.install_dir.clone();
            let checkpoint_dir = params.checkpoint_dir.clone();
            async move {
                match checkpoint_dir {
                    Some(dir) => {
                        let config_file = install_dir.join("config/seatunnel.yaml");
                        match configure::set_value(&config_file, "seatunnel.checkpoint.storage.path", serde_yaml::Value::from(dir))
                        {
                            Ok(()) => StepOutcome::Succeeded,
                            Err(err) => StepOutcome::Failed(err),
                        }
                    }
                    None => StepOutcome::Skipped("no checkpoint directory configured".to_string()),
                }
            }
        })
        .await?;

    workflow
        .execute_step(InstallStep::ConfigureJvm, cancel, |_progress| {
            let jvm_options = params.install_dir.join("config/jvm_options");
            let heap_gb = params.heap_gb;
            async move {
                match configure::rewrite_jvm_options(&jvm_options, heap_gb) {
                    Ok(()) => StepOutcome::Succeeded,
                    Err(err) => StepOutcome::Failed(err),
                }
            }
        })
        .await?;

    workflow
        .execute_step(InstallStep::InstallPlugins, cancel, |_progress| {
            let install_dir = params.install_dir.clone();
            let plugins = params.plugins.clone();
            async move {
                if plugins.is_empty() {
                    return StepOutcome::Skipped("no plugins requested".to_string());
                }
                match std::fs::write(install_dir.join("config/plugin_config"), plugins.join("\n")) {
                    Ok(()) => StepOutcome::Succeeded,
                    Err(err) => StepOutcome::Failed(err.into()),
                }
            }
        })
        .await?;

    workflow
        .execute_step(InstallStep::RegisterCluster, cancel, |_progress| {
            let install_dir = params.install_dir.clone();
            let manifest = serde_json::json!({
                "task_id": params.task_id,
                "cluster_name": params.cluster_name,
                "masters": params.masters,
                "workers": params.workers,
            });
            async move {
                let body = match serde_json::to_string_pretty(&manifest) {
                    Ok(body) => body,
                    Err(err) => return StepOutcome::Failed(err.into()),
                };
                match std::fs::write(install_dir.join(".stfleet-install.json"), body) {
                    Ok(()) => StepOutcome::Succeeded,
                    Err(err) => StepOutcome::Failed(err.into()),
                }
            }
        })
        .await?;

    workflow.execute_step(InstallStep::Complete, cancel, |_progress| async { StepOutcome::Succeeded }).await?;

    Ok(())
}

fn success_response(command_id: String, output: String) -> CommandResponse {
    CommandResponse {
        command_id,
        status: CommandStatus::Success as i32,
        output,
        error: String::new(),
        timestamp_millis: chrono::Utc::now().timestamp_millis(),
    }
}

fn local_system_info() -> SystemInfo {
    SystemInfo {
        os_type: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        cpu_cores: std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1),
        total_memory_bytes: 0,
        total_disk_bytes: 0,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cli = CliArgs::parse();
    let config = AgentConfig::load(&cli)?;
    info!(endpoints = ?config.endpoints, "starting agent client runtime");

    let hostname = hostname_or_unknown();
    let ip_address = std::env::var("AGENT_IP_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string());

    let client = Arc::new(AgentClient::new(
        config.endpoints.clone(),
        String::new(),
        hostname,
        ip_address,
        env!("CARGO_PKG_VERSION").to_string(),
        local_system_info(),
    ));

    let shutdown = CancellationToken::new();

    client.connect().await?;
    info!(agent_id = %client.agent_id(), "registered with control plane");

    let (events_tx, mut events_rx) = tokio::sync::mpsc::channel(256);
    let monitor = Arc::new(ProcessMonitor::new(config.crash_threshold, events_tx, Arc::new(NoopCrashHandler)));
    let monitor_handle = monitor.clone().spawn(shutdown.clone(), config.monitor_interval());

    let reporter = Arc::new(EventReporter::new(
        config.event_cache_capacity,
        config.event_batch_size,
        Arc::new(StreamEventSink { client: client.clone() }),
    ));
    reporter.set_connected(true).await;

    let feed_handle = tokio::spawn({
        let reporter = reporter.clone();
        async move {
            while let Some(event) = events_rx.recv().await {
                info!(event_type = %event.event_type, name = %event.name, "process event");
                reporter.submit(event).await;
            }
        }
    });

    let handler = Arc::new(AgentCommandHandler { monitor: monitor.clone() });
    let sampler = Arc::new(StaticSampler { monitor: monitor.clone() });

    // Supervisor loop (§4.B): run heartbeat + command stream under this
    // session's connection until the stream is lost, then reconnect and
    // re-enter; a shutdown signal breaks out unconditionally.
    loop {
        let session_cancel = CancellationToken::new();
        client.start_heartbeat(session_cancel.clone(), config.heartbeat_interval(), sampler.clone()).await;

        let stream_client = client.clone();
        let stream_handler = handler.clone();
        let stream_cancel = session_cancel.clone();
        let mut stream_handle =
            tokio::spawn(async move { stream_client.start_command_stream(stream_cancel, stream_handler).await });

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                session_cancel.cancel();
                let _ = stream_handle.await;
                break;
            }
            _ = shutdown.cancelled() => {
                session_cancel.cancel();
                let _ = stream_handle.await;
                break;
            }
            result = &mut stream_handle => {
                session_cancel.cancel();
                client.stop_heartbeat().await;
                match result {
                    Ok(Ok(())) => info!("command stream closed"),
                    Ok(Err(err)) => warn!(error = %err, "command stream lost"),
                    Err(err) => warn!(error = %err, "command stream task panicked"),
                }
                reporter.set_connected(false).await;
                if client.reconnect(&shutdown).await.is_err() {
                    info!("reconnect aborted by shutdown");
                    break;
                }
                reporter.set_connected(true).await;
            }
        }
    }

    shutdown.cancel();
    client.stop_heartbeat().await;
    let _ = monitor_handle.await;
    feed_handle.abort();

    Ok(())
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").or_else(|_| std::env::var("COMPUTERNAME")).unwrap_or_else(|_| "unknown-host".to_string())
}
