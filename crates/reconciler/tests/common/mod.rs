// Common test infrastructure for reconciler tests
#![allow(dead_code, clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use penpot_reconciler::memory::{
    InMemoryFacts, InMemoryPeerStore, InMemorySecretStore, RecordingSupervisor, ScriptedProbe,
    StaticMembership,
};
use penpot_reconciler::{
    DependencyFact, PlanSettings, Reconciler, ReconcilerConfig, Relation, ReplicaSet,
};

/// Unwrap a Result or panic with context
pub fn unwrap_result<T, E: std::fmt::Display>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{context}: {e}"),
    }
}

/// Stores shared by every replica of the application.
#[derive(Clone, Default)]
pub struct Shared {
    pub facts: Arc<InMemoryFacts>,
    pub secrets: Arc<InMemorySecretStore>,
    pub peers: Arc<InMemoryPeerStore>,
}

/// One replica with its own supervisor and probe.
pub struct Replica {
    pub membership: Arc<StaticMembership>,
    pub supervisor: Arc<RecordingSupervisor>,
    pub probe: Arc<ScriptedProbe>,
    pub reconciler: Arc<Reconciler>,
}

pub fn replica(shared: &Shared, local: u32, peers: &[u32], leader: bool) -> Replica {
    let membership = Arc::new(StaticMembership::new(
        ReplicaSet::new("penpot", local).with_peers(peers.iter().copied()),
        leader,
    ));
    let supervisor = Arc::new(RecordingSupervisor::new());
    let probe = Arc::new(ScriptedProbe::always(true));
    let config = ReconcilerConfig {
        plan: PlanSettings {
            model_name: "test".to_string(),
            internal_resolver: "10.0.0.10".to_string(),
        },
        liveness_interval: Duration::from_millis(10),
        liveness_deadline: Duration::from_secs(2),
        ..ReconcilerConfig::default()
    };
    let reconciler = unwrap_result(
        Reconciler::builder()
            .with_facts(shared.facts.clone())
            .with_secrets(shared.secrets.clone())
            .with_peers(shared.peers.clone())
            .with_membership(membership.clone())
            .with_supervisor(supervisor.clone())
            .with_probe(probe.clone())
            .with_config(config)
            .build(),
        "reconciler should build",
    );
    Replica {
        membership,
        supervisor,
        probe,
        reconciler: Arc::new(reconciler),
    }
}

pub fn database() -> DependencyFact {
    DependencyFact::from_pairs(
        Relation::Database,
        [
            ("endpoints", "postgresql-endpoint:5432"),
            ("database", "penpot"),
            ("username", "postgresql-username"),
            ("password", "postgresql-password"),
        ],
    )
}

pub fn cache() -> DependencyFact {
    DependencyFact::from_pairs(
        Relation::Cache,
        [("hostname", "redis-hostname"), ("port", "6379")],
    )
}

pub fn object_storage() -> DependencyFact {
    DependencyFact::from_pairs(
        Relation::ObjectStorage,
        [
            ("access-key", "s3-access-key"),
            ("secret-key", "s3-secret-key"),
            ("bucket", "penpot"),
            ("endpoint", "s3-endpoint"),
        ],
    )
}

pub fn mail_relay() -> DependencyFact {
    DependencyFact::from_pairs(
        Relation::MailRelay,
        [
            ("host", "smtp-host"),
            ("port", "1025"),
            ("domain", "example.com"),
            ("transport_security", "none"),
        ],
    )
}

pub fn ingress() -> DependencyFact {
    DependencyFact::from_pairs(
        Relation::Ingress,
        [("ingress", r#"{"url": "https://penpot.local/"}"#)],
    )
}

pub fn identity_provider() -> DependencyFact {
    DependencyFact::from_pairs(
        Relation::IdentityProvider,
        [
            ("client_id", "penpot"),
            ("client_secret", "oidc-secret"),
            ("issuer_url", "https://idp.local"),
            ("authorization_endpoint", "https://idp.local/auth"),
            ("token_endpoint", "https://idp.local/token"),
            ("userinfo_endpoint", "https://idp.local/userinfo"),
            ("jwks_endpoint", "https://idp.local/jwks"),
        ],
    )
}

/// Publish every always-mandatory dependency.
pub fn publish_mandatory(facts: &InMemoryFacts) {
    for fact in [database(), cache(), object_storage(), ingress()] {
        facts.publish(fact);
    }
}
