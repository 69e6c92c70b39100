//! Error types for netstate
//!
//! Every failure a cycle can surface is a structured variant carrying the
//! offending entity and cause, so callers can branch on [`Error::kind`]
//! instead of matching message text.

use crate::engine::CycleStage;
use crate::traits::DaemonOp;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for netstate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for netstate
#[derive(Error, Debug)]
pub enum Error {
    /// The desired document was rejected before any mutation
    #[error("Invalid desired state for {entity}: {reason}")]
    InvalidDesiredState {
        /// Interface name or section the problem was found on
        entity: String,
        reason: InvalidReason,
    },

    /// A daemon operation failed during apply; the journal has been unwound
    #[error(transparent)]
    Apply(Box<ApplyError>),

    /// The host did not converge within the verification budget
    #[error("State did not converge after {attempts} verification attempts; divergent: {}", .divergent.join(", "))]
    Verification {
        divergent: Vec<String>,
        attempts: u32,
    },

    /// The daemon could not be queried or reached
    #[error("Daemon unavailable ({daemon}): {message}")]
    DaemonUnavailable { daemon: String, message: String },

    /// The cycle was cancelled before it reached the apply stage
    #[error("Cycle cancelled during {stage}")]
    Cancelled { stage: CycleStage },

    /// Another cycle of the same engine holds some of the requested entities
    #[error("Cycle overlaps a running cycle on: {}", .entities.join(", "))]
    CycleConflict { entities: Vec<String> },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidDesiredState,
    Apply,
    Verification,
    DaemonUnavailable,
    Cancelled,
    CycleConflict,
    Config,
    Io,
    Serialization,
    Other,
}

/// Why a desired document was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    #[error("interface name appears more than once")]
    DuplicateName,

    #[error("unsupported schema version {found:?}")]
    UnsupportedSchemaVersion { found: String },

    #[error("an absent interface cannot carry configuration")]
    AbsentWithConfiguration,

    #[error("subtree `{subtree}` does not belong to type {iface_type}")]
    SubtreeMismatch { subtree: String, iface_type: String },

    #[error("type is required to create a new interface")]
    MissingType,

    #[error("`{field}` is required")]
    MissingField { field: String },

    #[error("route needs a destination")]
    MissingDestination,

    #[error("next-hop interface {interface} is neither present nor being created")]
    UnknownNextHop { interface: String },

    #[error("dependency cycle between {}", .members.join(" -> "))]
    DependencyCycle { members: Vec<String> },
}

/// Cause of a failed daemon operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyCause {
    #[error("rejected by daemon: {reason}")]
    Rejected { reason: String },

    #[error("no completion within {after:?}")]
    Timeout { after: Duration },

    #[error("completion signal dropped")]
    Abandoned,

    #[error("daemon unavailable: {message}")]
    Unavailable { message: String },
}

/// A journal entry that could not be undone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackFailure {
    pub target: String,
    pub operation: DaemonOp,
    pub cause: ApplyCause,
}

/// Aggregated apply failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} on {interface} failed: {cause} (rolled back: {rolled_back})")]
pub struct ApplyError {
    /// Interface (or global section) whose operation failed
    pub interface: String,
    pub operation: DaemonOp,
    pub cause: ApplyCause,
    /// Whether every journaled mutation was undone
    pub rolled_back: bool,
    pub rollback_failures: Vec<RollbackFailure>,
}

impl Error {
    /// Create an invalid desired state error
    pub fn invalid(entity: impl Into<String>, reason: InvalidReason) -> Self {
        Self::InvalidDesiredState {
            entity: entity.into(),
            reason,
        }
    }

    /// Create a daemon unavailable error
    pub fn unavailable(daemon: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DaemonUnavailable {
            daemon: daemon.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidDesiredState { .. } => ErrorKind::InvalidDesiredState,
            Self::Apply(_) => ErrorKind::Apply,
            Self::Verification { .. } => ErrorKind::Verification,
            Self::DaemonUnavailable { .. } => ErrorKind::DaemonUnavailable,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::CycleConflict { .. } => ErrorKind::CycleConflict,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) | Self::Yaml(_) => ErrorKind::Serialization,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// The failed apply, if this is one
    pub fn as_apply(&self) -> Option<&ApplyError> {
        match self {
            Self::Apply(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ApplyError> for Error {
    fn from(err: ApplyError) -> Self {
        Self::Apply(Box::new(err))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_structured() {
        let err = Error::invalid(
            "eth1.101",
            InvalidReason::DependencyCycle {
                members: vec!["a".to_string(), "b".to_string()],
            },
        );
        assert_eq!(err.kind(), ErrorKind::InvalidDesiredState);
        assert_eq!(
            err.to_string(),
            "Invalid desired state for eth1.101: dependency cycle between a -> b"
        );

        let err = Error::Verification {
            divergent: vec!["eth1".to_string(), "routes".to_string()],
            attempts: 5,
        };
        assert!(err.to_string().ends_with("divergent: eth1, routes"));
    }

    #[test]
    fn apply_error_boxes() {
        let err: Error = ApplyError {
            interface: "bond0".to_string(),
            operation: DaemonOp::ActivateProfile,
            cause: ApplyCause::Timeout {
                after: Duration::from_secs(60),
            },
            rolled_back: true,
            rollback_failures: Vec::new(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Apply);
        assert_eq!(err.as_apply().unwrap().interface, "bond0");
    }
}
