//! The `HostStatusUpdater` persistence seam (§6).
//!
//! The manager is deliberately ignorant of how (or whether) host rows are
//! persisted; it only calls through this trait, best-effort, and continues
//! regardless of the outcome. A real SQL-backed implementation lives outside
//! this core — only the trait boundary, a no-op, and an in-memory test
//! double are shipped here.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

/// System information reported at registration time.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemInfo {
    pub os_type: String,
    pub arch: String,
    pub cpu_cores: u32,
    pub total_memory_bytes: u64,
    pub total_disk_bytes: u64,
}

/// Resource usage reported on every heartbeat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_pct: f64,
}

/// External collaborator the Agent Session Manager consumes to resolve
/// hosts by IP and record their status. All three operations are
/// best-effort from the manager's perspective: a failure is logged, never
/// propagated to the agent-facing RPC.
#[async_trait]
pub trait HostStatusUpdater: Send + Sync {
    /// Resolves (or creates) the host row for `ip_address`, recording the
    /// agent's id, version, and system info against it. Returns the
    /// resolved `hostId` on success.
    async fn resolve_or_create_host(
        &self,
        ip_address: &str,
        agent_id: &str,
        agent_version: &str,
        system_info: &SystemInfo,
    ) -> anyhow::Result<String>;

    /// Records the latest resource usage sample for the agent's host.
    async fn update_heartbeat_metrics(
        &self,
        agent_id: &str,
        usage: &ResourceUsage,
    ) -> anyhow::Result<()>;

    /// Marks the agent's host offline (timeout checker) or disconnected
    /// (explicit stream teardown).
    async fn mark_host_offline(&self, agent_id: &str) -> anyhow::Result<()>;
}

/// A no-op updater for tests and standalone runs that have no persistence
/// layer wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHostStatusUpdater;

#[async_trait]
impl HostStatusUpdater for NullHostStatusUpdater {
    async fn resolve_or_create_host(
        &self,
        _ip_address: &str,
        _agent_id: &str,
        _agent_version: &str,
        _system_info: &SystemInfo,
    ) -> anyhow::Result<String> {
        Ok(String::new())
    }

    async fn update_heartbeat_metrics(
        &self,
        _agent_id: &str,
        _usage: &ResourceUsage,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn mark_host_offline(&self, _agent_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A single recorded call to `mark_host_offline`, for assertions in
/// integration tests.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedHost {
    pub host_id: String,
    pub agent_version: String,
    pub system_info: SystemInfo,
    pub last_usage: Option<ResourceUsage>,
    pub offline_calls: u32,
}

/// An in-memory double that records every call, for integration tests
/// asserting the manager invokes the updater correctly.
#[derive(Debug, Default)]
pub struct InMemoryHostStatusUpdater {
    hosts: Mutex<HashMap<String, RecordedHost>>,
}

impl InMemoryHostStatusUpdater {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded state for `agent_id`, if any.
    #[must_use]
    pub fn get(&self, agent_id: &str) -> Option<RecordedHost> {
        self.hosts.lock().expect("host updater mutex poisoned").get(agent_id).cloned()
    }

    /// Total number of distinct agents ever resolved.
    #[must_use]
    pub fn host_count(&self) -> usize {
        self.hosts.lock().expect("host updater mutex poisoned").len()
    }
}

#[async_trait]
impl HostStatusUpdater for InMemoryHostStatusUpdater {
    async fn resolve_or_create_host(
        &self,
        _ip_address: &str,
        agent_id: &str,
        agent_version: &str,
        system_info: &SystemInfo,
    ) -> anyhow::Result<String> {
        let mut hosts = self.hosts.lock().expect("host updater mutex poisoned");
        let host_id = format!("host_{agent_id}");
        hosts
            .entry(agent_id.to_string())
            .and_modify(|h| {
                h.agent_version = agent_version.to_string();
                h.system_info = system_info.clone();
            })
            .or_insert_with(|| RecordedHost {
                host_id: host_id.clone(),
                agent_version: agent_version.to_string(),
                system_info: system_info.clone(),
                last_usage: None,
                offline_calls: 0,
            });
        Ok(host_id)
    }

    async fn update_heartbeat_metrics(
        &self,
        agent_id: &str,
        usage: &ResourceUsage,
    ) -> anyhow::Result<()> {
        if let Some(host) = self.hosts.lock().expect("host updater mutex poisoned").get_mut(agent_id) {
            host.last_usage = Some(*usage);
        }
        Ok(())
    }

    async fn mark_host_offline(&self, agent_id: &str) -> anyhow::Result<()> {
        if let Some(host) = self.hosts.lock().expect("host updater mutex poisoned").get_mut(agent_id) {
            host.offline_calls += 1;
        }
        Ok(())
    }
}
