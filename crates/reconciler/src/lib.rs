//! Reconciliation engine converging Penpot's services onto their external
//! dependencies.
//!
//! Every pass is a pure function of what is currently visible:
//!
//! - **Collectors** project dependency facts into credential bundles
//! - **Readiness** decides from a rule table whether the application may run
//! - **Secret coordinator** reads, and on the writer replica creates, the
//!   shared secret key
//! - **Election** picks the replica with the lowest ordinal to run the exporter
//! - **Plan** renders the backend, frontend and exporter services
//! - **Reconciler** applies the plan, starts and stops services, and waits
//!   for liveness
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use penpot_reconciler::{
//!     LoopConfig, Reconciler, ReconciliationLoop, ReplicaSet, Trigger,
//!     memory::{InMemoryFacts, InMemoryPeerStore, InMemorySecretStore,
//!              RecordingSupervisor, ScriptedProbe, StaticMembership},
//! };
//!
//! #[tokio::main]
//! async fn main() -> penpot_reconciler::Result<()> {
//!     let reconciler = Arc::new(
//!         Reconciler::builder()
//!             .with_facts(Arc::new(InMemoryFacts::new()))
//!             .with_secrets(Arc::new(InMemorySecretStore::new()))
//!             .with_peers(Arc::new(InMemoryPeerStore::new()))
//!             .with_membership(Arc::new(StaticMembership::new(
//!                 ReplicaSet::new("penpot", 0),
//!                 true,
//!             )))
//!             .with_supervisor(Arc::new(RecordingSupervisor::new()))
//!             .with_probe(Arc::new(ScriptedProbe::always(true)))
//!             .build()?,
//!     );
//!
//!     let mut loop_runner = ReconciliationLoop::new(reconciler, LoopConfig::default());
//!     loop_runner.handle().send(Trigger::Startup)?;
//!     // loop_runner.run().await
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod actions;
pub mod collectors;
pub mod election;
pub mod error;
pub mod interfaces;
pub mod r#loop;
pub mod memory;
pub mod plan;
pub mod readiness;
pub mod reconciler;
pub mod secret;
pub mod trigger;
pub mod types;

// Re-export main types
pub use actions::AccountActions;
pub use collectors::{Bundles, CollectorSettings, CredentialBundle};
pub use election::{Election, ReplicaId, ReplicaSet, elect};
pub use error::{Error, Result};
pub use interfaces::{
    ExecOutput, ExecRequest, FactSource, LivenessProbe, MembershipSource, PeerStore, SecretStore,
    Supervisor, WorkloadExec,
};
pub use r#loop::{LoopConfig, LoopStopper, ReconciliationLoop, TriggerHandle};
pub use plan::{HealthCheck, Override, PlanSettings, Service, ServicePlan};
pub use readiness::{ReadinessInput, ReadinessReport, Requirement, RequirementStatus};
pub use reconciler::{Evaluation, PassOutcome, Reconciler, ReconcilerBuilder, ReconcilerConfig};
pub use secret::{SecretCoordinator, SharedSecret, WriterRole};
pub use trigger::{HookRegistry, Trigger};
pub use types::{DependencyFact, EnvMap, Relation, SecretId, UnitStatus};
