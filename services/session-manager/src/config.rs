//! Layered configuration for the `session-manager` binary (§6).
//!
//! Precedence, highest wins: command-line overrides (`clap`), environment
//! variables (prefix `MANAGER_`, e.g. `MANAGER_LOG_LEVEL` for `log_level`),
//! a TOML config file, then compiled defaults. The `config` crate builds
//! the file+env+default layers; `clap`-parsed CLI flags are applied last
//! since their presence needs to be distinguished from "unset" (an
//! `Option<T>` per flag).

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Command-line overrides. Every field is optional so the loader can tell
/// "explicitly passed" apart from "use a lower-priority source".
#[derive(Debug, Parser, Default)]
#[command(name = "session-manager", about = "Agent Session Manager control-plane binary")]
pub struct CliArgs {
    /// Path to a TOML config file. Defaults to `MANAGER_CONFIG_FILE` or
    /// `./session-manager.toml` if present.
    #[arg(long)]
    pub config: Option<String>,

    /// Address the `AgentService` gRPC server listens on.
    #[arg(long)]
    pub listen_addr: Option<SocketAddr>,

    /// Heartbeat timeout in seconds before a connection is marked offline.
    #[arg(long)]
    pub heartbeat_timeout_secs: Option<u64>,

    /// How often the heartbeat timeout checker scans the registry, in
    /// seconds.
    #[arg(long)]
    pub check_interval_secs: Option<u64>,

    /// Log level: debug, info, warn, error.
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Fully resolved manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ManagerConfig {
    pub listen_addr: SocketAddr,
    #[validate(range(min = 1, message = "heartbeat_timeout_secs must be >= 1"))]
    pub heartbeat_timeout_secs: u64,
    #[validate(range(min = 1, message = "check_interval_secs must be >= 1"))]
    pub check_interval_secs: u64,
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,
}

fn validate_log_level(level: &str) -> Result<(), validator::ValidationError> {
    match level {
        "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_log_level")),
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7443".parse().expect("valid default listen addr"),
            heartbeat_timeout_secs: 30,
            check_interval_secs: 5,
            log_level: "info".to_string(),
        }
    }
}

impl ManagerConfig {
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Loads the file+env+default layers, then applies any CLI overrides,
    /// then validates (§6).
    pub fn load(cli: &CliArgs) -> anyhow::Result<Self> {
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("MANAGER_CONFIG_FILE").ok())
            .unwrap_or_else(|| "session-manager.toml".to_string());

        let defaults = ManagerConfig::default();
        let mut builder = config::Config::builder()
            .set_default("listen_addr", defaults.listen_addr.to_string())?
            .set_default("heartbeat_timeout_secs", defaults.heartbeat_timeout_secs)?
            .set_default("check_interval_secs", defaults.check_interval_secs)?
            .set_default("log_level", defaults.log_level.clone())?;

        if std::path::Path::new(&config_path).exists() {
            builder = builder.add_source(config::File::with_name(&config_path));
        }

        // No `.separator()`: fields are flat snake_case, so `MANAGER_LOG_LEVEL`
        // must bind directly to `log_level`, not split into `log.level`.
        builder = builder.add_source(config::Environment::with_prefix("MANAGER"));

        let mut resolved: ManagerConfig = builder.build()?.try_deserialize()?;

        if let Some(addr) = cli.listen_addr {
            resolved.listen_addr = addr;
        }
        if let Some(secs) = cli.heartbeat_timeout_secs {
            resolved.heartbeat_timeout_secs = secs;
        }
        if let Some(secs) = cli.check_interval_secs {
            resolved.check_interval_secs = secs;
        }
        if let Some(level) = &cli.log_level {
            resolved.log_level = level.clone();
        }

        resolved.validate()?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        assert!(ManagerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_invalid_log_level() {
        let mut cfg = ManagerConfig::default();
        cfg.log_level = "verbose".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_heartbeat_timeout() {
        let mut cfg = ManagerConfig::default();
        cfg.heartbeat_timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn cli_override_takes_precedence_over_env() {
        std::env::set_var("MANAGER_LOG_LEVEL", "warn");
        let cli = CliArgs { log_level: Some("error".to_string()), ..Default::default() };
        let resolved = ManagerConfig::load(&cli).expect("loads");
        assert_eq!(resolved.log_level, "error");
        std::env::remove_var("MANAGER_LOG_LEVEL");
    }

    #[test]
    fn env_takes_precedence_over_default_when_no_cli() {
        std::env::set_var("MANAGER_LOG_LEVEL", "warn");
        let cli = CliArgs::default();
        let resolved = ManagerConfig::load(&cli).expect("loads");
        assert_eq!(resolved.log_level, "warn");
        std::env::remove_var("MANAGER_LOG_LEVEL");
    }
}
