// Structured error taxonomy for the coordinator and cyber runtime.
//
// Call sites propagate with `anyhow::Result` + `.context(...)` the way the
// rest of this crate does; these variants are what gets surfaced at the
// boundaries the spec calls out explicitly (stage outputs, action results,
// bridge responses, operator-visible failures).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubspaceError {
    #[error("config error: {0}")]
    ConfigError(String),

    #[error("spawn refused for cyber '{cyber}': {reason}")]
    SpawnRefused { cyber: String, reason: String },

    #[error("sandbox violation: cyber '{cyber}' attempted to access '{path}': {reason}")]
    SandboxViolation {
        cyber: String,
        path: PathBuf,
        reason: String,
    },

    #[error("brain unavailable: request {request_id} timed out after {timeout_ms}ms")]
    BrainUnavailable { request_id: String, timeout_ms: u64 },

    #[error("delivery failed: message from '{from}' to '{to}' could not be delivered: {reason}")]
    DeliveryFailed {
        from: String,
        to: String,
        reason: String,
    },

    #[error("action error: '{action}' failed: {reason}")]
    ActionError { action: String, reason: String },

    #[error("timeout exceeded: {context} after {elapsed_ms}ms")]
    TimeoutExceeded { context: String, elapsed_ms: u64 },

    #[error("shutdown requested")]
    ShutdownRequested,
}

impl SubspaceError {
    /// Error kind name as used in logs/metrics labels; stable across
    /// variants' payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            SubspaceError::ConfigError(_) => "ConfigError",
            SubspaceError::SpawnRefused { .. } => "SpawnRefused",
            SubspaceError::SandboxViolation { .. } => "SandboxViolation",
            SubspaceError::BrainUnavailable { .. } => "BrainUnavailable",
            SubspaceError::DeliveryFailed { .. } => "DeliveryFailed",
            SubspaceError::ActionError { .. } => "ActionError",
            SubspaceError::TimeoutExceeded { .. } => "TimeoutExceeded",
            SubspaceError::ShutdownRequested => "ShutdownRequested",
        }
    }

    /// Whether the Coordinator must surface this to the operator (spec §7
    /// propagation policy: crashes and quota exhaustion go to the operator,
    /// everything else stays inside the cyber).
    pub fn is_operator_visible(&self) -> bool {
        matches!(
            self,
            SubspaceError::SpawnRefused { .. } | SubspaceError::ConfigError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_across_payload() {
        let a = SubspaceError::ActionError {
            action: "a".into(),
            reason: "x".into(),
        };
        let b = SubspaceError::ActionError {
            action: "b".into(),
            reason: "y".into(),
        };
        assert_eq!(a.kind(), b.kind());
    }

    #[test]
    fn only_spawn_and_config_are_operator_visible() {
        assert!(SubspaceError::ConfigError("bad".into()).is_operator_visible());
        assert!(SubspaceError::SpawnRefused {
            cyber: "alice".into(),
            reason: "quota".into()
        }
        .is_operator_visible());
        assert!(!SubspaceError::ActionError {
            action: "x".into(),
            reason: "y".into()
        }
        .is_operator_visible());
        assert!(!SubspaceError::ShutdownRequested.is_operator_visible());
    }
}
