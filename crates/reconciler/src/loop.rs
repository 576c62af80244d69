//! Continuous reconciliation loop.
//!
//! One consumer drains a trigger queue and runs one pass at a time. Triggers
//! that arrive while a pass runs are coalesced into a single follow-up pass.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::reconciler::{PassOutcome, Reconciler};
use crate::trigger::Trigger;

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Interval between periodic resync passes.
    pub resync_interval: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(60),
        }
    }
}

/// Handle for queueing triggers.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::UnboundedSender<Trigger>,
}

impl TriggerHandle {
    /// Wrap the sending half of a trigger queue.
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<Trigger>) -> Self {
        Self { tx }
    }

    /// Queue a trigger.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoopStopped`] once the loop has been dropped.
    pub fn send(&self, trigger: Trigger) -> Result<()> {
        self.tx.send(trigger).map_err(|_| Error::LoopStopped)
    }
}

/// Continuous reconciliation loop.
pub struct ReconciliationLoop {
    /// The reconciler.
    reconciler: Arc<Reconciler>,
    /// Loop configuration.
    config: LoopConfig,
    /// Trigger queue.
    trigger_tx: mpsc::UnboundedSender<Trigger>,
    trigger_rx: mpsc::UnboundedReceiver<Trigger>,
    /// Stop signal.
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    /// Number of completed passes.
    passes: watch::Sender<u64>,
}

impl ReconciliationLoop {
    /// Create a new reconciliation loop.
    #[must_use]
    pub fn new(reconciler: Arc<Reconciler>, config: LoopConfig) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (passes, _) = watch::channel(0);
        Self {
            reconciler,
            config,
            trigger_tx,
            trigger_rx,
            stop_tx,
            stop_rx,
            passes,
        }
    }

    /// Get a handle for queueing triggers.
    #[must_use]
    pub fn handle(&self) -> TriggerHandle {
        TriggerHandle {
            tx: self.trigger_tx.clone(),
        }
    }

    /// Get a stopper handle.
    #[must_use]
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }

    /// Watch the number of completed passes.
    #[must_use]
    pub fn subscribe_passes(&self) -> watch::Receiver<u64> {
        self.passes.subscribe()
    }

    /// Run until stopped.
    ///
    /// A failed pass is logged and does not end the loop.
    ///
    /// # Errors
    ///
    /// Currently never fails; the signature leaves room for fatal errors.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            resync_secs = self.config.resync_interval.as_secs(),
            "Starting reconciliation loop"
        );

        let period = self.config.resync_interval;
        let first = Instant::now()
            .checked_add(period)
            .unwrap_or_else(Instant::now);
        let mut resync = tokio::time::interval_at(first, period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let trigger = tokio::select! {
                biased;
                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        info!("Reconciliation loop stopped");
                        return Ok(());
                    }
                    continue;
                }
                Some(trigger) = self.trigger_rx.recv() => trigger,
                _ = resync.tick() => Trigger::Resync,
            };

            let coalesced = self.drain();
            if coalesced > 0 {
                debug!(coalesced, "Coalesced queued triggers into one pass");
            }
            self.run_pass(&trigger).await;
        }
    }

    /// Discard queued triggers; the next pass covers them all.
    fn drain(&mut self) -> usize {
        std::iter::from_fn(|| self.trigger_rx.try_recv().ok()).count()
    }

    async fn run_pass(&self, trigger: &Trigger) {
        match self.reconciler.reconcile(trigger).await {
            Ok(PassOutcome::Ready { exporter_local }) => {
                debug!(exporter_local, "Pass converged");
            }
            Ok(outcome) => {
                debug!(outcome = ?outcome, "Pass finished without converging");
            }
            Err(e) => {
                error!(error = %e, trigger = %trigger, "Reconciliation error");
            }
        }
        self.passes
            .send_modify(|count| *count = count.saturating_add(1));
    }

    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Handle to stop a reconciliation loop.
#[derive(Debug, Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::election::ReplicaSet;
    use crate::memory::{
        InMemoryFacts, InMemoryPeerStore, InMemorySecretStore, RecordingSupervisor,
        ScriptedProbe, StaticMembership, SupervisorCall,
    };
    use crate::types::{DependencyFact, Relation, UnitStatus};

    fn setup() -> (Arc<Reconciler>, Arc<RecordingSupervisor>) {
        setup_with(InMemoryFacts::new())
    }

    fn ready_facts() -> InMemoryFacts {
        let facts = InMemoryFacts::new();
        facts.publish(DependencyFact::from_pairs(
            Relation::Database,
            [
                ("endpoints", "db:5432"),
                ("database", "penpot"),
                ("username", "penpot"),
                ("password", "pw"),
            ],
        ));
        facts.publish(DependencyFact::from_pairs(
            Relation::Cache,
            [("hostname", "redis"), ("port", "6379")],
        ));
        facts.publish(DependencyFact::from_pairs(
            Relation::ObjectStorage,
            [
                ("access-key", "ak"),
                ("secret-key", "sk"),
                ("bucket", "penpot"),
                ("endpoint", "http://s3"),
            ],
        ));
        facts.publish(DependencyFact::from_pairs(
            Relation::Ingress,
            [("ingress", r#"{"url": "http://penpot.example/"}"#)],
        ));
        facts
    }

    fn setup_with(facts: InMemoryFacts) -> (Arc<Reconciler>, Arc<RecordingSupervisor>) {
        setup_with_liveness(facts, Arc::new(ScriptedProbe::always(true)))
    }

    fn setup_with_liveness(
        facts: InMemoryFacts,
        probe: Arc<ScriptedProbe>,
    ) -> (Arc<Reconciler>, Arc<RecordingSupervisor>) {
        let supervisor = Arc::new(RecordingSupervisor::new());
        let reconciler = Reconciler::builder()
            .with_facts(Arc::new(facts))
            .with_secrets(Arc::new(InMemorySecretStore::new()))
            .with_peers(Arc::new(InMemoryPeerStore::new()))
            .with_membership(Arc::new(StaticMembership::new(
                ReplicaSet::new("penpot", 0),
                true,
            )))
            .with_supervisor(supervisor.clone())
            .with_probe(probe)
            .build()
            .unwrap();
        (Arc::new(reconciler), supervisor)
    }

    fn slow_resync() -> LoopConfig {
        LoopConfig {
            resync_interval: Duration::from_secs(3600),
        }
    }

    /// Given five triggers queued before the loop starts
    /// When the loop runs
    /// Then they are handled by exactly one pass
    #[tokio::test]
    async fn queued_triggers_coalesce_into_one_pass() {
        let (reconciler, _) = setup();
        let mut loop_runner = ReconciliationLoop::new(reconciler, slow_resync());
        let handle = loop_runner.handle();
        let stopper = loop_runner.stopper();
        let mut passes = loop_runner.subscribe_passes();

        for _ in 0..5 {
            handle.send(Trigger::ConfigChanged).unwrap();
        }
        let task = tokio::spawn(async move { loop_runner.run().await });

        passes.changed().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*passes.borrow(), 1);

        stopper.stop();
        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok(), "Loop should stop within timeout");
    }

    /// Given a pass blocked waiting for the backend to become live
    /// When several triggers arrive during that pass
    /// Then exactly one follow-up pass runs
    #[tokio::test(start_paused = true)]
    async fn triggers_during_a_pass_cause_one_follow_up() {
        let probe = Arc::new(ScriptedProbe::script([false, false, false], true));
        let (reconciler, _) = setup_with_liveness(ready_facts(), probe.clone());
        let mut loop_runner = ReconciliationLoop::new(reconciler, slow_resync());
        let handle = loop_runner.handle();
        let stopper = loop_runner.stopper();
        let mut passes = loop_runner.subscribe_passes();
        let task = tokio::spawn(async move { loop_runner.run().await });

        handle.send(Trigger::Startup).unwrap();
        while probe.attempts() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(*passes.borrow(), 0);
        for _ in 0..3 {
            handle.send(Trigger::ConfigChanged).unwrap();
        }

        passes.wait_for(|count| *count >= 2).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(*passes.borrow(), 2);
        assert_eq!(probe.attempts(), 5);
        stopper.stop();
        assert!(task.await.is_ok());
    }

    /// Given a supervisor that rejects every plan
    /// When two passes fail
    /// Then the loop keeps running
    #[tokio::test]
    async fn failed_pass_does_not_end_loop() {
        let (reconciler, supervisor) = setup_with(ready_facts());
        supervisor.reject_plans("broken");
        let mut loop_runner = ReconciliationLoop::new(reconciler.clone(), slow_resync());
        let handle = loop_runner.handle();
        let stopper = loop_runner.stopper();
        let mut passes = loop_runner.subscribe_passes();
        let task = tokio::spawn(async move { loop_runner.run().await });

        handle.send(Trigger::Startup).unwrap();
        passes.wait_for(|count| *count >= 1).await.unwrap();
        handle.send(Trigger::Resync).unwrap();
        passes.wait_for(|count| *count >= 2).await.unwrap();

        assert!(!task.is_finished());
        assert!(!supervisor.calls().contains(&SupervisorCall::Apply));
        assert!(matches!(reconciler.status(), UnitStatus::Blocked(_)));
        stopper.stop();
        let joined = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(joined.is_ok_and(|r| r.is_ok_and(|inner| inner.is_ok())));
    }

    /// Given an idle loop
    /// When the resync interval elapses
    /// Then a pass runs without any trigger
    #[tokio::test(start_paused = true)]
    async fn resync_runs_periodically() {
        let (reconciler, _) = setup();
        let mut loop_runner = ReconciliationLoop::new(
            reconciler,
            LoopConfig {
                resync_interval: Duration::from_secs(60),
            },
        );
        let stopper = loop_runner.stopper();
        let mut passes = loop_runner.subscribe_passes();
        let task = tokio::spawn(async move { loop_runner.run().await });

        passes.wait_for(|count| *count >= 2).await.unwrap();

        stopper.stop();
        assert!(task.await.is_ok());
    }

    #[tokio::test]
    async fn send_after_drop_reports_stopped() {
        let (reconciler, _) = setup();
        let loop_runner = ReconciliationLoop::new(reconciler, slow_resync());
        let handle = loop_runner.handle();
        drop(loop_runner);
        assert!(matches!(
            handle.send(Trigger::Resync),
            Err(Error::LoopStopped)
        ));
    }
}
