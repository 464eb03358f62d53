//! Typed ID definitions for the agent platform's core resources.
//!
//! Each ID type has a unique prefix that identifies the resource type.
//! The ULID-backed ids are sortable and internally generated; `CommandId`
//! is UUID-backed per the wire contract so it matches what ships on the
//! `CommandRequest`/`CommandResponse` frames byte-for-byte.

use crate::define_id;

// =============================================================================
// Agent Session Manager
// =============================================================================

define_id!(AgentId, "agt");

// =============================================================================
// Installer Workflow Engine
// =============================================================================

define_id!(TaskId, "task");

// =============================================================================
// Command dispatch
// =============================================================================

/// A command identifier, generated fresh for every dispatch.
///
/// Unlike the prefixed ids above, `CommandId` serializes as a bare UUID
/// string on the wire (`CommandRequest.command_id`), matching the external
/// RPC contract rather than the platform's internal `{prefix}_{ulid}`
/// convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandId(uuid::Uuid);

impl CommandId {
    /// Generates a fresh, random command id.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Wraps an existing UUID as a `CommandId`.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn uuid(&self) -> uuid::Uuid {
        self.0
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CommandId {
    type Err = crate::IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(crate::IdError::Empty);
        }
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::IdError::InvalidFormat {
                message: e.to_string(),
            })
    }
}

impl serde::Serialize for CommandId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for CommandId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl From<uuid::Uuid> for CommandId {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}

impl From<CommandId> for uuid::Uuid {
    fn from(id: CommandId) -> Self {
        id.0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_roundtrip() {
        let id = AgentId::new();
        let s = id.to_string();
        let parsed: AgentId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn agent_id_prefix() {
        let id = AgentId::new();
        assert!(id.to_string().starts_with("agt_"));
    }

    #[test]
    fn agent_id_rejects_wrong_prefix() {
        let task_id = TaskId::new();
        let result: Result<AgentId, _> = task_id.to_string().parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidPrefix { .. }
        ));
    }

    #[test]
    fn task_id_roundtrip() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn command_id_is_bare_uuid() {
        let id = CommandId::new();
        let s = id.to_string();
        assert!(!s.contains('_'));
        uuid::Uuid::parse_str(&s).expect("command id formats as a plain uuid");
    }

    #[test]
    fn command_id_uniqueness() {
        let a = CommandId::new();
        let b = CommandId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn command_id_json_roundtrip() {
        let id = CommandId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: CommandId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn command_id_rejects_empty() {
        let result: Result<CommandId, _> = "".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }
}
