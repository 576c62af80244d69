//! Error types for the reconciler crate.

use thiserror::Error;

use crate::readiness::Requirement;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
///
/// Missing dependencies are not errors: they surface as unsatisfied
/// requirements in a [`crate::ReadinessReport`]. Only collaborator failures
/// and boundary operations produce these variants.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The service supervisor could not be reached or refused a call.
    #[error("supervisor error: {reason}")]
    Supervisor { reason: String },

    /// The supervisor rejected the generated plan.
    #[error("failed to apply service plan: {reason}")]
    ApplyFailed { reason: String },

    /// A boundary action ran but the workload command failed.
    #[error("action '{action}' failed: {reason}")]
    ActionFailed {
        action: String,
        reason: String,
        stdout: String,
        stderr: String,
    },

    /// An operation that needs a Ready engine was called while NotReady.
    #[error("not ready: waiting for {}", join_requirements(.unsatisfied))]
    NotReady { unsatisfied: Vec<Requirement> },

    /// The backend service is not running.
    #[error("backend service is not running")]
    BackendNotRunning,

    /// Writing to the secret store failed.
    #[error("secret store error: {reason}")]
    SecretStore { reason: String },

    /// Writing to the shared peer store failed.
    #[error("peer store error: {reason}")]
    PeerStore { reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Plan serialization failed.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// Loop was stopped.
    #[error("reconciliation loop stopped")]
    LoopStopped,
}

fn join_requirements(requirements: &[Requirement]) -> String {
    itertools::join(requirements.iter().copied().map(Requirement::as_str), ", ")
}

impl Error {
    /// Create a supervisor error.
    pub fn supervisor(reason: impl Into<String>) -> Self {
        Self::Supervisor {
            reason: reason.into(),
        }
    }

    /// Create an apply failed error.
    pub fn apply_failed(reason: impl Into<String>) -> Self {
        Self::ApplyFailed {
            reason: reason.into(),
        }
    }

    /// Create an action failed error with captured process output.
    pub fn action_failed(
        action: impl Into<String>,
        reason: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::ActionFailed {
            action: action.into(),
            reason: reason.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a not ready error.
    #[must_use]
    pub const fn not_ready(unsatisfied: Vec<Requirement>) -> Self {
        Self::NotReady { unsatisfied }
    }

    /// Create a secret store error.
    pub fn secret_store(reason: impl Into<String>) -> Self {
        Self::SecretStore {
            reason: reason.into(),
        }
    }

    /// Create a peer store error.
    pub fn peer_store(reason: impl Into<String>) -> Self {
        Self::PeerStore {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }
}
