//! Error taxonomy for the Agent Session Manager (§7).

use thiserror::Error;

/// Errors returned by [`crate::manager::SessionManager`] operations.
///
/// Each variant maps onto a `tonic::Status` code at the gRPC boundary (see
/// `crate::grpc`); none of these are retried by the manager itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManagerError {
    /// No connection record exists for the given agent id.
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// The connection exists but has no attached command stream.
    #[error("agent has no open command stream: {0}")]
    StreamNotAvailable(String),

    /// The connection exists but is not in the `connected` state.
    #[error("agent is not connected: {0}")]
    NotConnected(String),

    /// A command dispatch did not receive a reply before its timeout.
    #[error("command {command_id} timed out after {timeout_secs}s")]
    CommandTimeout { command_id: String, timeout_secs: u64 },

    /// The caller's context was cancelled before a reply arrived.
    #[error("command {0} dispatch cancelled")]
    Cancelled(String),

    /// The send-side of the connection's stream has closed.
    #[error("failed to send command to agent {0}: stream writer closed")]
    SendFailed(String),
}

impl ManagerError {
    /// The `tonic::Status` code this error maps to at the RPC boundary.
    #[must_use]
    pub fn status_code(&self) -> tonic::Code {
        match self {
            Self::AgentNotFound(_) => tonic::Code::NotFound,
            Self::StreamNotAvailable(_) | Self::NotConnected(_) | Self::SendFailed(_) => {
                tonic::Code::FailedPrecondition
            }
            Self::CommandTimeout { .. } => tonic::Code::DeadlineExceeded,
            Self::Cancelled(_) => tonic::Code::Cancelled,
        }
    }
}

impl From<ManagerError> for tonic::Status {
    fn from(err: ManagerError) -> Self {
        tonic::Status::new(err.status_code(), err.to_string())
    }
}
