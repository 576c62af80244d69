//! Reconciler implementation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::collectors::{Bundles, CollectorSettings};
use crate::election::{Election, elect};
use crate::error::{Error, Result};
use crate::interfaces::{
    FactSource, LivenessProbe, MembershipSource, PeerStore, SecretStore, Supervisor,
};
use crate::plan::{BACKEND, EXPORTER, FRONTEND, PlanSettings, SERVICES, ServicePlan, generate};
use crate::readiness::{ReadinessInput, ReadinessReport, Requirement, evaluate};
use crate::secret::{SecretCoordinator, SharedSecret, WriterRole};
use crate::trigger::Trigger;
use crate::types::UnitStatus;

const CONVERGING_MESSAGE: &str = "waiting for penpot services";
const TIMEOUT_MESSAGE: &str = "services did not become ready in time";

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Settings consulted by collectors.
    pub collectors: CollectorSettings,
    /// Settings consulted by the plan generator.
    pub plan: PlanSettings,
    /// Pause between liveness probes.
    pub liveness_interval: Duration,
    /// Longest wait for liveness after applying a plan.
    pub liveness_deadline: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            collectors: CollectorSettings::default(),
            plan: PlanSettings::default(),
            liveness_interval: Duration::from_secs(5),
            liveness_deadline: Duration::from_secs(300),
        }
    }
}

/// Everything derived from the current facts in one pass.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Collector results.
    pub bundles: Bundles,
    /// Readiness over the bundles and runtime state.
    pub report: ReadinessReport,
    /// Shared secret, if published.
    pub secret: Option<SharedSecret>,
    /// Singleton election, if membership is known.
    pub election: Option<Election>,
}

impl Evaluation {
    /// Generate the plan for this evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] when the evaluation is not ready.
    pub fn plan(&self, settings: &PlanSettings) -> Result<ServicePlan> {
        generate(
            &self.report,
            &self.bundles,
            self.secret.as_ref(),
            self.election.as_ref(),
            settings,
        )
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Mandatory requirements are missing; services were stopped.
    NotReady {
        /// Unsatisfied requirements, sorted by name.
        unsatisfied: Vec<Requirement>,
    },
    /// The plan is applied and the backend answered its liveness probe.
    Ready {
        /// Whether the exporter runs on this replica.
        exporter_local: bool,
    },
    /// The plan is applied but the backend never became live.
    LivenessTimeout {
        /// How long the engine waited.
        waited: Duration,
    },
}

impl PassOutcome {
    /// Whether the pass ended Ready and live.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Converges the local replica's services onto the current dependency facts.
///
/// Holds no state between passes apart from the published status: every
/// pass re-reads facts, membership and the shared secret.
pub struct Reconciler {
    facts: Arc<dyn FactSource>,
    secrets: Arc<dyn SecretStore>,
    peers: Arc<dyn PeerStore>,
    membership: Arc<dyn MembershipSource>,
    supervisor: Arc<dyn Supervisor>,
    probe: Arc<dyn LivenessProbe>,
    config: ReconcilerConfig,
    status: watch::Sender<UnitStatus>,
}

impl Reconciler {
    /// Start building a reconciler.
    #[must_use]
    pub fn builder() -> ReconcilerBuilder {
        ReconcilerBuilder::new()
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Get the service supervisor.
    #[must_use]
    pub fn supervisor(&self) -> &Arc<dyn Supervisor> {
        &self.supervisor
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> UnitStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<UnitStatus> {
        self.status.subscribe()
    }

    /// Collect facts, ensure the shared secret and evaluate readiness.
    ///
    /// The writer replica creates the secret here if none is published.
    pub async fn evaluate(&self) -> Evaluation {
        let bundles = Bundles::collect(
            self.facts.as_ref(),
            self.secrets.as_ref(),
            &self.config.collectors,
        );
        let role = WriterRole::from_leadership(self.membership.holds_writer_role());
        let secret = SecretCoordinator::new(self.peers.as_ref(), self.secrets.as_ref()).ensure(role);
        let replicas = self.membership.replica_set();
        let election = elect(&replicas);
        let runtime_reachable = self.supervisor.can_connect().await;

        let input = ReadinessInput::new(
            &bundles,
            secret.is_some(),
            runtime_reachable,
            !replicas.is_empty(),
        );
        let report = evaluate(&input);
        debug!(
            ready = report.is_ready(),
            unsatisfied = ?report.unsatisfied(),
            runner = ?election.as_ref().map(|e| e.runner.to_string()),
            "Evaluated readiness"
        );

        Evaluation {
            bundles,
            report,
            secret,
            election,
        }
    }

    /// Run one full pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ApplyFailed`] if the supervisor rejects the plan and
    /// [`Error::Supervisor`] if starting or stopping a service fails. Missing
    /// dependencies and liveness timeouts are outcomes, not errors.
    pub async fn reconcile(&self, trigger: &Trigger) -> Result<PassOutcome> {
        info!(trigger = %trigger, "Starting reconciliation");

        let evaluation = self.evaluate().await;
        if !evaluation.report.is_ready() {
            return Ok(self.enter_not_ready(&evaluation.report).await);
        }

        let exporter_local = match self.converge(&evaluation).await {
            Ok(exporter_local) => exporter_local,
            Err(e) => {
                warn!(error = %e, "Failed to converge services");
                self.publish(UnitStatus::Blocked(e.to_string()));
                return Err(e);
            }
        };

        let started = Instant::now();
        if self.await_liveness().await {
            info!(exporter_local, "Services are live");
            self.publish(UnitStatus::Active);
            Ok(PassOutcome::Ready { exporter_local })
        } else {
            let waited = started.elapsed();
            warn!(waited_secs = waited.as_secs(), "Services did not become live");
            self.publish(UnitStatus::Blocked(TIMEOUT_MESSAGE.to_string()));
            Ok(PassOutcome::LivenessTimeout { waited })
        }
    }

    async fn enter_not_ready(&self, report: &ReadinessReport) -> PassOutcome {
        let unsatisfied = report.unsatisfied();
        info!(unsatisfied = ?unsatisfied, "Not ready");
        if report.status(Requirement::Runtime).is_some_and(|s| s.satisfied) {
            self.stop_all().await;
        }
        let message = report
            .waiting_message()
            .unwrap_or_else(|| "waiting".to_string());
        self.publish(UnitStatus::Waiting(message));
        PassOutcome::NotReady { unsatisfied }
    }

    /// Stop every managed service that is running. Failures are logged; the
    /// next pass retries.
    async fn stop_all(&self) {
        let running = match self.supervisor.running().await {
            Ok(running) => running,
            Err(e) => {
                warn!(error = %e, "Failed to list running services");
                return;
            }
        };
        for service in SERVICES.iter().filter(|s| running.contains(**s)) {
            match self.supervisor.stop(service).await {
                Ok(()) => info!(service, "Stopped service"),
                Err(e) => warn!(service, error = %e, "Failed to stop service"),
            }
        }
    }

    /// Apply the plan and start the services. Returns whether the exporter
    /// runs locally.
    async fn converge(&self, evaluation: &Evaluation) -> Result<bool> {
        let plan = evaluation.plan(&self.config.plan)?;
        let exporter_local = evaluation
            .election
            .as_ref()
            .is_some_and(|election| election.local_is_runner);

        self.publish(UnitStatus::Maintenance(CONVERGING_MESSAGE.to_string()));
        self.supervisor
            .apply_plan(&plan)
            .await
            .map_err(|e| match e {
                Error::ApplyFailed { .. } => e,
                other => Error::apply_failed(other.to_string()),
            })?;
        debug!(services = plan.services.len(), "Applied service plan");

        for service in [BACKEND, FRONTEND] {
            self.supervisor.start(service).await?;
        }
        if exporter_local {
            self.supervisor.start(EXPORTER).await?;
            debug!("Exporter runs on this replica");
        } else if self.supervisor.running().await?.contains(EXPORTER) {
            self.supervisor.stop(EXPORTER).await?;
            info!(
                runner = ?evaluation.election.as_ref().map(|e| e.runner.to_string()),
                "Stopped exporter, another replica is the runner"
            );
        }
        Ok(exporter_local)
    }

    /// Poll the probe until it answers live or the deadline passes.
    async fn await_liveness(&self) -> bool {
        let mut ticker = tokio::time::interval(self.config.liveness_interval);
        let poll = async {
            loop {
                ticker.tick().await;
                if self.probe.is_live().await {
                    break;
                }
                debug!("Backend not live yet");
            }
        };
        tokio::time::timeout(self.config.liveness_deadline, poll)
            .await
            .is_ok()
    }

    fn publish(&self, status: UnitStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                info!(from = %current, to = %status, "Status changed");
                *current = status;
                true
            }
        });
    }
}

/// Builder for Reconciler.
#[derive(Default)]
pub struct ReconcilerBuilder {
    facts: Option<Arc<dyn FactSource>>,
    secrets: Option<Arc<dyn SecretStore>>,
    peers: Option<Arc<dyn PeerStore>>,
    membership: Option<Arc<dyn MembershipSource>>,
    supervisor: Option<Arc<dyn Supervisor>>,
    probe: Option<Arc<dyn LivenessProbe>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dependency fact source.
    #[must_use]
    pub fn with_facts(mut self, facts: Arc<dyn FactSource>) -> Self {
        self.facts = Some(facts);
        self
    }

    /// Set the secret store.
    #[must_use]
    pub fn with_secrets(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Set the shared peer store.
    #[must_use]
    pub fn with_peers(mut self, peers: Arc<dyn PeerStore>) -> Self {
        self.peers = Some(peers);
        self
    }

    /// Set the membership source.
    #[must_use]
    pub fn with_membership(mut self, membership: Arc<dyn MembershipSource>) -> Self {
        self.membership = Some(membership);
        self
    }

    /// Set the service supervisor.
    #[must_use]
    pub fn with_supervisor(mut self, supervisor: Arc<dyn Supervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// Set the liveness probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the liveness polling interval and deadline.
    #[must_use]
    pub fn liveness(mut self, interval: Duration, deadline: Duration) -> Self {
        self.config.liveness_interval = interval;
        self.config.liveness_deadline = deadline;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a collaborator is missing or the
    /// liveness interval is zero.
    pub fn build(self) -> Result<Reconciler> {
        fn required<T>(value: Option<T>, name: &str) -> Result<T> {
            value.ok_or_else(|| Error::invalid_config(format!("{name} is required")))
        }

        if self.config.liveness_interval.is_zero() {
            return Err(Error::invalid_config("liveness interval must be positive"));
        }
        let (status, _) = watch::channel(UnitStatus::default());
        Ok(Reconciler {
            facts: required(self.facts, "fact source")?,
            secrets: required(self.secrets, "secret store")?,
            peers: required(self.peers, "peer store")?,
            membership: required(self.membership, "membership source")?,
            supervisor: required(self.supervisor, "supervisor")?,
            probe: required(self.probe, "liveness probe")?,
            config: self.config,
            status,
        })
    }
}
