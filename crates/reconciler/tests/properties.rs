//! Property tests for readiness, plan determinism and secret creation.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use std::sync::Arc;

use common::{cache, database, ingress, mail_relay, object_storage, unwrap_result};
use itertools::Itertools;
use penpot_reconciler::memory::{InMemoryFacts, InMemoryPeerStore, InMemorySecretStore};
use penpot_reconciler::readiness::evaluate;
use penpot_reconciler::secret::SECRET_REF_KEY;
use penpot_reconciler::{
    Bundles, CollectorSettings, DependencyFact, PeerStore, PlanSettings, ReadinessInput,
    Relation, ReplicaSet, Requirement, SecretCoordinator, SharedSecret, WriterRole, elect,
    plan::generate,
};
use proptest::prelude::*;

const OPTIONAL_SET: [Relation; 5] = [
    Relation::Database,
    Relation::Cache,
    Relation::ObjectStorage,
    Relation::MailRelay,
    Relation::Ingress,
];

fn fact_for(relation: Relation) -> DependencyFact {
    match relation {
        Relation::Database => database(),
        Relation::Cache => cache(),
        Relation::ObjectStorage => object_storage(),
        Relation::MailRelay => mail_relay(),
        _ => ingress(),
    }
}

fn requirement_for(relation: Relation) -> Requirement {
    match relation {
        Relation::Database => Requirement::Database,
        Relation::Cache => Requirement::Cache,
        Relation::ObjectStorage => Requirement::ObjectStorage,
        Relation::MailRelay => Requirement::MailRelay,
        _ => Requirement::Ingress,
    }
}

fn bundles_for(subset: &[Relation]) -> Bundles {
    let facts = InMemoryFacts::new();
    for relation in subset {
        facts.publish(fact_for(*relation));
    }
    Bundles::collect(
        &facts,
        &InMemorySecretStore::new(),
        &CollectorSettings::default(),
    )
}

proptest! {
    #[test]
    fn readiness_reports_mandatory_set_minus_present(mask in 0u8..32) {
        let subset = OPTIONAL_SET
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, relation)| *relation)
            .collect_vec();

        let report = evaluate(&ReadinessInput::new(&bundles_for(&subset), true, true, true));

        let expected = [
            Requirement::Cache,
            Requirement::Database,
            Requirement::Ingress,
            Requirement::ObjectStorage,
        ]
        .into_iter()
        .filter(|r| !subset.iter().any(|rel| requirement_for(*rel) == *r))
        .collect_vec();

        prop_assert_eq!(report.is_ready(), expected.is_empty());
        prop_assert_eq!(report.unsatisfied(), expected);
    }

    #[test]
    fn plan_is_byte_identical_for_identical_inputs(
        host in "[a-z]{1,12}",
        port in 1u16..,
        resolver in "10\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}",
        ordinal in 0u32..100,
        peers in proptest::collection::btree_set(0u32..100, 0..5),
    ) {
        let facts = InMemoryFacts::new();
        for fact in [database(), object_storage(), ingress(), mail_relay()] {
            facts.publish(fact);
        }
        let port = port.to_string();
        facts.publish(DependencyFact::from_pairs(
            Relation::Cache,
            [("hostname", host.as_str()), ("port", port.as_str())],
        ));
        let settings = PlanSettings {
            model_name: "prop".to_string(),
            internal_resolver: resolver,
        };
        let render = || {
            let bundles = Bundles::collect(
                &facts,
                &InMemorySecretStore::new(),
                &CollectorSettings::default(),
            );
            let report = evaluate(&ReadinessInput::new(&bundles, true, true, true));
            let election = elect(&ReplicaSet::new("penpot", ordinal).with_peers(peers.clone()));
            generate(
                &report,
                &bundles,
                Some(&SharedSecret::new("fixed")),
                election.as_ref(),
                &settings,
            )
            .and_then(|plan| plan.to_yaml())
        };

        let first = unwrap_result(render(), "first render");
        let second = unwrap_result(render(), "second render");
        prop_assert_eq!(first, second);
    }
}

#[test]
fn concurrent_replicas_create_exactly_one_secret() {
    // GIVEN: eight replicas sharing one peer store and one secret store,
    // exactly one of which holds the writer role
    let peers = Arc::new(InMemoryPeerStore::new());
    let secrets = Arc::new(InMemorySecretStore::new());

    // WHEN: every replica races to ensure the secret until it sees one
    let observed = std::thread::scope(|scope| {
        let handles = (0..8)
            .map(|replica| {
                let peers = peers.clone();
                let secrets = secrets.clone();
                scope.spawn(move || {
                    let coordinator = SecretCoordinator::new(&*peers, &*secrets);
                    let role = WriterRole::from_leadership(replica == 0);
                    loop {
                        if let Some(secret) = coordinator.ensure(role) {
                            return secret;
                        }
                        std::thread::yield_now();
                    }
                })
            })
            .collect_vec();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect_vec()
    });

    // THEN: one secret exists and every replica reads the same value
    assert_eq!(secrets.created_count(), 1);
    assert!(observed.iter().all_equal());
    assert!(peers.get(SECRET_REF_KEY).is_some());
}

#[test]
fn without_a_writer_no_secret_is_created() {
    // GIVEN: replicas that all read
    let peers = InMemoryPeerStore::new();
    let secrets = InMemorySecretStore::new();
    let coordinator = SecretCoordinator::new(&peers, &secrets);

    // WHEN: each tries repeatedly
    let results = (0..16)
        .map(|_| coordinator.ensure(WriterRole::Reader))
        .collect_vec();

    // THEN: nothing is created and the requirement stays unsatisfied
    assert!(results.iter().all(Option::is_none));
    assert_eq!(secrets.created_count(), 0);
}
