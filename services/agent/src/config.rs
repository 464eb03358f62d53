//! Layered configuration for the `agent` binary (§6).
//!
//! Precedence, highest wins: command-line overrides (`clap`), environment
//! variables (prefix `AGENT_`, e.g. `AGENT_LOG_LEVEL` for `log_level`), a
//! TOML config file located via `--config`/`AGENT_CONFIG_FILE`, then
//! compiled defaults.

use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Parser, Default)]
#[command(name = "agent", about = "Agent Client Runtime binary")]
pub struct CliArgs {
    /// Path to a TOML config file.
    #[arg(long)]
    pub config: Option<String>,

    /// Control-plane endpoints, tried in order (repeatable).
    #[arg(long = "endpoint")]
    pub endpoints: Vec<String>,

    /// Heartbeat interval in seconds.
    #[arg(long)]
    pub heartbeat_interval_secs: Option<u64>,

    /// Process monitor tick interval in seconds.
    #[arg(long)]
    pub monitor_interval_secs: Option<u64>,

    /// Consecutive liveness-probe failures before a process is considered
    /// crashed.
    #[arg(long)]
    pub crash_threshold: Option<u32>,

    /// Event cache capacity while disconnected.
    #[arg(long)]
    pub event_cache_capacity: Option<usize>,

    /// Event cache flush batch size.
    #[arg(long)]
    pub event_batch_size: Option<usize>,

    /// Whether to enable TLS on the control-plane connection.
    #[arg(long)]
    pub tls_enabled: Option<bool>,

    /// TLS client certificate path (required if TLS is enabled).
    #[arg(long)]
    pub tls_cert_file: Option<String>,

    /// TLS client key path (required if TLS is enabled).
    #[arg(long)]
    pub tls_key_file: Option<String>,

    /// Log level: debug, info, warn, error.
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Fully resolved agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AgentConfig {
    #[validate(length(min = 1, message = "at least one control-plane endpoint is required"))]
    pub endpoints: Vec<String>,

    #[validate(range(min = 1, message = "heartbeat_interval_secs must be >= 1"))]
    pub heartbeat_interval_secs: u64,

    pub monitor_interval_secs: u64,
    pub crash_threshold: u32,
    pub event_cache_capacity: usize,
    pub event_batch_size: usize,

    pub tls_enabled: bool,
    pub tls_cert_file: Option<String>,
    pub tls_key_file: Option<String>,

    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,
}

fn validate_log_level(level: &str) -> Result<(), validator::ValidationError> {
    match level {
        "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_log_level")),
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:7443".to_string()],
            heartbeat_interval_secs: 10,
            monitor_interval_secs: 5,
            crash_threshold: 3,
            event_cache_capacity: 1000,
            event_batch_size: 50,
            tls_enabled: false,
            tls_cert_file: None,
            tls_key_file: None,
            log_level: "info".to_string(),
        }
    }
}

impl AgentConfig {
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    #[must_use]
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    /// Cross-field validation beyond what `validator`'s derive macro
    /// expresses: TLS requires both cert and key (§6).
    fn validate_tls(&self) -> Result<(), validator::ValidationErrors> {
        if self.tls_enabled && (self.tls_cert_file.is_none() || self.tls_key_file.is_none()) {
            let mut errors = validator::ValidationErrors::new();
            errors.add(
                "tls_cert_file",
                validator::ValidationError::new("tls_enabled requires both cert and key files"),
            );
            return Err(errors);
        }
        Ok(())
    }

    pub fn validate_all(&self) -> Result<(), validator::ValidationErrors> {
        self.validate()?;
        self.validate_tls()
    }

    /// Loads the file+env+default layers, then applies any CLI overrides,
    /// then validates (§6).
    pub fn load(cli: &CliArgs) -> anyhow::Result<Self> {
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("AGENT_CONFIG_FILE").ok())
            .unwrap_or_else(|| "agent.toml".to_string());

        let defaults = AgentConfig::default();
        let mut builder = config::Config::builder()
            .set_default("endpoints", defaults.endpoints.clone())?
            .set_default("heartbeat_interval_secs", defaults.heartbeat_interval_secs)?
            .set_default("monitor_interval_secs", defaults.monitor_interval_secs)?
            .set_default("crash_threshold", defaults.crash_threshold)?
            .set_default("event_cache_capacity", defaults.event_cache_capacity as i64)?
            .set_default("event_batch_size", defaults.event_batch_size as i64)?
            .set_default("tls_enabled", defaults.tls_enabled)?
            .set_default("log_level", defaults.log_level.clone())?;

        if std::path::Path::new(&config_path).exists() {
            builder = builder.add_source(config::File::with_name(&config_path));
        }
        // No `.separator()`: fields are flat snake_case, so `AGENT_LOG_LEVEL`
        // must bind directly to `log_level`, not split into `log.level`.
        builder = builder.add_source(config::Environment::with_prefix("AGENT"));

        let mut resolved: AgentConfig = builder.build()?.try_deserialize()?;

        if !cli.endpoints.is_empty() {
            resolved.endpoints = cli.endpoints.clone();
        }
        if let Some(v) = cli.heartbeat_interval_secs {
            resolved.heartbeat_interval_secs = v;
        }
        if let Some(v) = cli.monitor_interval_secs {
            resolved.monitor_interval_secs = v;
        }
        if let Some(v) = cli.crash_threshold {
            resolved.crash_threshold = v;
        }
        if let Some(v) = cli.event_cache_capacity {
            resolved.event_cache_capacity = v;
        }
        if let Some(v) = cli.event_batch_size {
            resolved.event_batch_size = v;
        }
        if let Some(v) = cli.tls_enabled {
            resolved.tls_enabled = v;
        }
        if let Some(v) = &cli.tls_cert_file {
            resolved.tls_cert_file = Some(v.clone());
        }
        if let Some(v) = &cli.tls_key_file {
            resolved.tls_key_file = Some(v.clone());
        }
        if let Some(v) = &cli.log_level {
            resolved.log_level = v.clone();
        }

        resolved.validate_all()?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        assert!(AgentConfig::default().validate_all().is_ok());
    }

    #[test]
    fn tls_enabled_without_cert_fails() {
        let mut cfg = AgentConfig::default();
        cfg.tls_enabled = true;
        assert!(cfg.validate_all().is_err());
    }

    #[test]
    fn tls_enabled_with_both_files_passes() {
        let mut cfg = AgentConfig::default();
        cfg.tls_enabled = true;
        cfg.tls_cert_file = Some("/etc/agent/cert.pem".into());
        cfg.tls_key_file = Some("/etc/agent/key.pem".into());
        assert!(cfg.validate_all().is_ok());
    }

    #[test]
    fn empty_endpoints_fails() {
        let mut cfg = AgentConfig::default();
        cfg.endpoints.clear();
        assert!(cfg.validate_all().is_err());
    }

    #[test]
    fn cli_endpoints_override_file_and_default() {
        let cli = CliArgs { endpoints: vec!["http://10.0.0.9:7443".into()], ..Default::default() };
        let resolved = AgentConfig::load(&cli).expect("loads");
        assert_eq!(resolved.endpoints, vec!["http://10.0.0.9:7443".to_string()]);
    }

    #[test]
    fn env_takes_precedence_over_default_when_no_cli() {
        std::env::set_var("AGENT_LOG_LEVEL", "warn");
        let resolved = AgentConfig::load(&CliArgs::default()).expect("loads");
        assert_eq!(resolved.log_level, "warn");
        std::env::remove_var("AGENT_LOG_LEVEL");
    }

    #[test]
    fn cli_log_level_overrides_env() {
        std::env::set_var("AGENT_LOG_LEVEL", "warn");
        let cli = CliArgs { log_level: Some("error".to_string()), ..Default::default() };
        let resolved = AgentConfig::load(&cli).expect("loads");
        assert_eq!(resolved.log_level, "error");
        std::env::remove_var("AGENT_LOG_LEVEL");
    }

    #[test]
    fn env_binds_multi_word_snake_case_field() {
        std::env::set_var("AGENT_HEARTBEAT_INTERVAL_SECS", "42");
        let resolved = AgentConfig::load(&CliArgs::default()).expect("loads");
        assert_eq!(resolved.heartbeat_interval_secs, 42);
        std::env::remove_var("AGENT_HEARTBEAT_INTERVAL_SECS");
    }
}
