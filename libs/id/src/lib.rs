//! # stfleet-id
//!
//! Stable ID types, parsing, and validation for the agent platform core.
//!
//! ## Design Principles
//!
//! - IDs are stable and system-generated; names are user-controlled labels.
//! - All IDs have a canonical string representation with strict parsing.
//! - IDs support roundtrip serialization (parse → format → parse).
//! - IDs are typed to prevent mixing different resource types.
//!
//! ## ID Format
//!
//! Internally generated resource ids use a prefixed format:
//! `{prefix}_{ulid}` (`agt_01HV4Z2WQXKJNM8GPQY6VBKC3D`,
//! `task_01HV4Z3MXNKPQR9HSTZ7WCLD4E`). `CommandId` is the one exception: it
//! is a bare UUID, matching the `CommandRequest`/`CommandResponse` wire
//! contract.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations.
pub use ulid::Ulid;
