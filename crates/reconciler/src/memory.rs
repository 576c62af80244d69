//! In-memory collaborators.
//!
//! Thread-safe implementations of every collaborator trait, for embedding the
//! engine in a process that already holds its facts and for driving it in
//! tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;

use crate::election::ReplicaSet;
use crate::error::{Error, Result};
use crate::interfaces::{
    ExecOutput, ExecRequest, FactSource, LivenessProbe, MembershipSource, PeerStore, SecretStore,
    Supervisor, WorkloadExec,
};
use crate::plan::ServicePlan;
use crate::types::{DependencyFact, EnvMap, Relation, SecretId};

/// Facts keyed by relation.
#[derive(Debug, Default)]
pub struct InMemoryFacts {
    facts: RwLock<BTreeMap<Relation, DependencyFact>>,
}

impl InMemoryFacts {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish or replace a fact.
    pub fn publish(&self, fact: DependencyFact) {
        self.facts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fact.relation(), fact);
    }

    /// Remove a dependency.
    pub fn remove(&self, relation: Relation) {
        self.facts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&relation);
    }
}

impl FactSource for InMemoryFacts {
    fn get(&self, relation: Relation) -> Option<DependencyFact> {
        self.facts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&relation)
            .cloned()
    }
}

/// Secrets keyed by generated id.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<BTreeMap<SecretId, EnvMap>>,
    next_id: AtomicUsize,
    created: AtomicUsize,
}

impl InMemorySecretStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store content published by another party and return its id.
    pub fn insert(&self, content: EnvMap) -> SecretId {
        let id = SecretId::new(format!(
            "secret:{}",
            self.next_id.fetch_add(1, Ordering::SeqCst)
        ));
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), content);
        id
    }

    /// Delete every secret, leaving references stale.
    pub fn clear(&self) {
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of secrets created through [`SecretStore::create`].
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl SecretStore for InMemorySecretStore {
    fn read(&self, id: &SecretId) -> Option<EnvMap> {
        self.secrets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn create(&self, content: EnvMap) -> Result<SecretId> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.insert(content))
    }
}

/// Application-scoped key/value store.
#[derive(Debug, Default)]
pub struct InMemoryPeerStore {
    data: RwLock<EnvMap>,
}

impl InMemoryPeerStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeerStore for InMemoryPeerStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Membership that changes only when told to.
#[derive(Debug)]
pub struct StaticMembership {
    replicas: RwLock<ReplicaSet>,
    leader: AtomicBool,
}

impl StaticMembership {
    /// Create membership for a replica set.
    #[must_use]
    pub const fn new(replicas: ReplicaSet, leader: bool) -> Self {
        Self {
            replicas: RwLock::new(replicas),
            leader: AtomicBool::new(leader),
        }
    }

    /// Replace the replica set.
    pub fn set_replicas(&self, replicas: ReplicaSet) {
        *self.replicas.write().unwrap_or_else(PoisonError::into_inner) = replicas;
    }

    /// Change the leadership flag.
    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }
}

impl MembershipSource for StaticMembership {
    fn replica_set(&self) -> ReplicaSet {
        self.replicas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn holds_writer_role(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}

/// Calls made against a [`RecordingSupervisor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorCall {
    /// `apply_plan`.
    Apply,
    /// `start(name)`.
    Start(String),
    /// `stop(name)`.
    Stop(String),
}

#[derive(Debug, Default)]
struct SupervisorState {
    plan: Option<ServicePlan>,
    running: BTreeSet<String>,
    calls: Vec<SupervisorCall>,
    reject_apply: Option<String>,
}

/// Supervisor that tracks a running set and records every mutating call.
#[derive(Debug)]
pub struct RecordingSupervisor {
    reachable: AtomicBool,
    state: Mutex<SupervisorState>,
}

impl Default for RecordingSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSupervisor {
    /// Create a reachable supervisor with nothing running.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            state: Mutex::new(SupervisorState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the supervisor reachable or not.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make the next `apply_plan` calls fail with `reason`.
    pub fn reject_plans(&self, reason: impl Into<String>) {
        self.state().reject_apply = Some(reason.into());
    }

    /// The merged plan.
    #[must_use]
    pub fn plan(&self) -> Option<ServicePlan> {
        self.state().plan.clone()
    }

    /// Services currently running.
    #[must_use]
    pub fn running_services(&self) -> BTreeSet<String> {
        self.state().running.clone()
    }

    /// Recorded calls, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<SupervisorCall> {
        self.state().calls.clone()
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::supervisor("cannot connect to supervisor"))
        }
    }
}

#[async_trait]
impl Supervisor for RecordingSupervisor {
    async fn can_connect(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    async fn apply_plan(&self, plan: &ServicePlan) -> Result<()> {
        self.ensure_reachable()?;
        let mut state = self.state();
        if let Some(reason) = state.reject_apply.clone() {
            return Err(Error::apply_failed(reason));
        }
        let merged = match state.plan.take() {
            Some(mut current) => {
                current.merge(plan.clone());
                current
            }
            None => plan.clone(),
        };
        state.plan = Some(merged);
        state.calls.push(SupervisorCall::Apply);
        Ok(())
    }

    async fn start(&self, service: &str) -> Result<()> {
        self.ensure_reachable()?;
        let mut state = self.state();
        let known = state
            .plan
            .as_ref()
            .is_some_and(|plan| plan.services.contains_key(service));
        if !known {
            return Err(Error::supervisor(format!("unknown service '{service}'")));
        }
        state.running.insert(service.to_string());
        state.calls.push(SupervisorCall::Start(service.to_string()));
        Ok(())
    }

    async fn stop(&self, service: &str) -> Result<()> {
        self.ensure_reachable()?;
        let mut state = self.state();
        state.running.remove(service);
        state.calls.push(SupervisorCall::Stop(service.to_string()));
        Ok(())
    }

    async fn running(&self) -> Result<BTreeSet<String>> {
        self.ensure_reachable()?;
        Ok(self.state().running.clone())
    }
}

/// Probe that replays a script of answers, then repeats the last one.
#[derive(Debug)]
pub struct ScriptedProbe {
    answers: Mutex<VecDeque<bool>>,
    fallback: AtomicBool,
    attempts: AtomicUsize,
}

impl ScriptedProbe {
    /// Probe that always answers `live`.
    #[must_use]
    pub fn always(live: bool) -> Self {
        Self::script([], live)
    }

    /// Probe answering `answers` in order, then `fallback` forever.
    #[must_use]
    pub fn script(answers: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            fallback: AtomicBool::new(fallback),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Change the answer given once the script is exhausted.
    pub fn set_live(&self, live: bool) {
        self.fallback.store(live, Ordering::SeqCst);
    }

    /// Number of probe attempts so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LivenessProbe for ScriptedProbe {
    async fn is_live(&self) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.load(Ordering::SeqCst))
    }
}

/// Answer produced by a [`ScriptedExec`] handler.
pub type ExecHandler = Box<dyn Fn(&ExecRequest) -> ExecOutput + Send + Sync>;

/// Workload exec that records requests and answers through a handler.
pub struct ScriptedExec {
    handler: ExecHandler,
    requests: Mutex<Vec<ExecRequest>>,
}

impl ScriptedExec {
    /// Answer every request with `handler`.
    pub fn new(handler: impl Fn(&ExecRequest) -> ExecOutput + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl WorkloadExec for ScriptedExec {
    async fn exec(&self, request: &ExecRequest) -> Result<ExecOutput> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        Ok((self.handler)(request))
    }
}
