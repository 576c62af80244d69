//! Collaborators the engine consumes.
//!
//! Fact, secret, peer and membership lookups are synchronous reads of data the
//! hosting platform has already fetched. Supervisor, probe and exec calls talk
//! to the workload and are async.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::election::ReplicaSet;
use crate::error::Result;
use crate::plan::ServicePlan;
use crate::types::{DependencyFact, EnvMap, Relation, SecretId};

/// Keyed lookup of the latest fact published by each dependency.
pub trait FactSource: Send + Sync {
    /// Current fact for a relation, or `None` if the dependency is absent.
    fn get(&self, relation: Relation) -> Option<DependencyFact>;
}

/// Secret store shared by every replica of the application.
pub trait SecretStore: Send + Sync {
    /// Read a secret's content. `None` when the id is stale or unknown.
    fn read(&self, id: &SecretId) -> Option<EnvMap>;

    /// Create a secret and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SecretStore`] if the store refuses the write.
    fn create(&self, content: EnvMap) -> Result<SecretId>;
}

/// Application-scoped key/value store visible to every replica.
pub trait PeerStore: Send + Sync {
    /// Read a key.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a key.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::PeerStore`] if the write is refused.
    fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// Replica membership and leadership, as seen by the local replica.
pub trait MembershipSource: Send + Sync {
    /// Replicas currently known to the local replica, itself included.
    fn replica_set(&self) -> ReplicaSet;

    /// Whether the platform currently designates the local replica as the
    /// writer of application-scoped data.
    fn holds_writer_role(&self) -> bool;
}

/// Process supervisor running the application's services.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Whether the supervisor is reachable.
    async fn can_connect(&self) -> bool;

    /// Merge the plan into the supervisor's configuration.
    ///
    /// Services in the plan are added or replaced; services not mentioned are
    /// left untouched.
    async fn apply_plan(&self, plan: &ServicePlan) -> Result<()>;

    /// Start a service. Starting a running service is a no-op.
    async fn start(&self, service: &str) -> Result<()>;

    /// Stop a service. Stopping a stopped service is a no-op.
    async fn stop(&self, service: &str) -> Result<()>;

    /// Names of the services currently running.
    async fn running(&self) -> Result<BTreeSet<String>>;
}

/// Liveness check against the backend.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// One probe attempt.
    async fn is_live(&self) -> bool;
}

/// A command to run inside the workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Program and arguments.
    pub command: Vec<String>,
    /// Working directory inside the workload.
    pub working_dir: String,
    /// Data written to the process's standard input.
    pub stdin: Option<String>,
}

impl ExecRequest {
    /// Build a request from a command line.
    pub fn new<S: Into<String>>(
        command: impl IntoIterator<Item = S>,
        working_dir: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            working_dir: working_dir.into(),
            stdin: None,
        }
    }

    /// Attach standard input.
    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// Captured result of a workload command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
    /// Exit code, `None` if killed by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the command exited zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Runs one-off commands inside the workload.
#[async_trait]
pub trait WorkloadExec: Send + Sync {
    /// Run a command to completion and capture its output.
    ///
    /// A non-zero exit is reported in [`ExecOutput`], not as an error.
    async fn exec(&self, request: &ExecRequest) -> Result<ExecOutput>;
}
