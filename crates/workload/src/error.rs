//! Error types for the workload crate.

use std::time::Duration;

use thiserror::Error;

/// Result type for workload operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the workload.
#[derive(Error, Debug)]
pub enum Error {
    /// The supervisor CLI could not be started.
    #[error("failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },

    /// The supervisor CLI exited non-zero.
    #[error("'{command}' exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// A supervisor command did not finish in time.
    #[error("'{command}' timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    /// HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Layer serialization failed.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a spawn error.
    pub fn spawn(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Spawn {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Create a command failed error.
    pub fn command_failed(
        command: impl Into<String>,
        status: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            status: status.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }
}

impl From<Error> for penpot_reconciler::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Serialization { reason } => Self::serialization(reason),
            other => Self::supervisor(other.to_string()),
        }
    }
}
