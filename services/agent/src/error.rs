//! Error taxonomy for the agent-side components (§7).

use thiserror::Error;

/// Errors from the Agent Connection Client (Component B).
#[derive(Debug, Error)]
pub enum ClientError {
    /// Every configured endpoint failed to dial; carries the last error.
    #[error("no reachable control-plane endpoint: {0}")]
    NoReachableEndpoint(String),

    /// The command stream's receive side returned an error or closed.
    #[error("command stream error: {0}")]
    StreamError(String),

    /// A heartbeat RPC failed. Logged and retried by the caller, never
    /// fatal.
    #[error("heartbeat RPC failed: {0}")]
    HeartbeatFailed(String),

    /// The client is not connected and the operation requires a live
    /// stream.
    #[error("not connected")]
    NotConnected,
}

/// Errors from the Process Monitor (Component C).
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Attempted an operation on a process name that isn't tracked.
    #[error("process not tracked: {0}")]
    NotTracked(String),
}

/// Errors from the Installer Workflow Engine (Component E).
#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("archive entry escapes install directory: {0}")]
    PathEscape(String),

    #[error("unsupported archive entry type at {0}")]
    UnsupportedEntryType(String),

    #[error("package chunk out of order: expected offset {expected}, got {actual}")]
    ChunkOutOfOrder { expected: u64, actual: u64 },

    #[error("http error: {0}")]
    Http(String),

    #[error("invalid deployment mode: {0}")]
    InvalidDeploymentMode(String),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("step {0} is not retryable")]
    NotRetryable(String),

    #[error("step {0} has not run yet")]
    StepNotStarted(String),

    #[error("a prior step failed; cannot advance past {0}")]
    BlockedByFailure(String),

    #[error("config path not found: {0}")]
    ConfigPathNotFound(String),
}
