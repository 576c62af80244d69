//! End-to-end reconciliation scenarios.
//!
//! Each scenario drives one or more replicas through in-memory collaborators
//! and checks readiness, the applied plan and the running service set.

#![allow(clippy::unwrap_used, clippy::panic, clippy::indexing_slicing)]

mod common;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use common::{
    Shared, identity_provider, mail_relay, publish_mandatory, replica, unwrap_result,
};
use penpot_reconciler::memory::ScriptedExec;
use penpot_reconciler::plan::{BACKEND, EXPORTER, FRONTEND};
use penpot_reconciler::{
    AccountActions, Error, ExecOutput, ExecRequest, PassOutcome, Relation, Requirement, Trigger,
    UnitStatus,
};

fn flags(plan: &penpot_reconciler::ServicePlan, service: &str) -> Vec<String> {
    plan.service(service)
        .and_then(|s| s.environment.get("PENPOT_FLAGS"))
        .map(|f| f.split(' ').map(str::to_string).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn given_no_integrations_when_reconciled_then_waiting_for_mandatory_set() {
    // GIVEN: a single non-writer replica with nothing related
    let shared = Shared::default();
    let unit = replica(&shared, 0, &[], false);

    // WHEN: a pass runs
    let outcome = unwrap_result(
        unit.reconciler.reconcile(&Trigger::Startup).await,
        "pass should not fail",
    );

    // THEN: the mandatory set is reported, sorted, without mail-relay
    assert_eq!(
        outcome,
        PassOutcome::NotReady {
            unsatisfied: vec![
                Requirement::Cache,
                Requirement::Database,
                Requirement::Ingress,
                Requirement::ObjectStorage,
                Requirement::Secret,
            ]
        }
    );
    assert_eq!(
        unit.reconciler.status(),
        UnitStatus::Waiting(
            "waiting for cache, database, ingress, object-storage, secret".to_string()
        )
    );
    assert!(unit.supervisor.plan().is_none());
}

#[tokio::test]
async fn given_mandatory_integrations_when_reconciled_then_password_login_and_single_exporter() {
    // GIVEN: two replicas, ordinal 0 holds the writer role
    let shared = Shared::default();
    publish_mandatory(&shared.facts);
    let first = replica(&shared, 0, &[1], true);
    let second = replica(&shared, 1, &[0], false);

    // WHEN: both reconcile, writer first
    let first_outcome = unwrap_result(
        first.reconciler.reconcile(&Trigger::Startup).await,
        "writer pass",
    );
    let second_outcome = unwrap_result(
        second.reconciler.reconcile(&Trigger::Startup).await,
        "reader pass",
    );

    // THEN: both are ready and only the lowest ordinal runs the exporter
    assert_eq!(first_outcome, PassOutcome::Ready { exporter_local: true });
    assert_eq!(second_outcome, PassOutcome::Ready { exporter_local: false });
    assert!(first.supervisor.running_services().contains(EXPORTER));
    assert!(!second.supervisor.running_services().contains(EXPORTER));
    for unit in [&first, &second] {
        let running = unit.supervisor.running_services();
        assert!(running.contains(BACKEND) && running.contains(FRONTEND));
    }

    // AND: login flags select password login with registration disabled
    let plan = first.supervisor.plan().unwrap();
    for service in [BACKEND, FRONTEND] {
        let flags = flags(&plan, service);
        assert!(flags.contains(&"enable-login-with-password".to_string()));
        assert!(flags.contains(&"disable-registration".to_string()));
    }
    assert!(flags(&plan, BACKEND).contains(&"disable-smtp".to_string()));

    // AND: both replicas share one secret and point at the same exporter
    assert_eq!(shared.secrets.created_count(), 1);
    let second_plan = second.supervisor.plan().unwrap();
    assert_eq!(
        plan.service(BACKEND).unwrap().environment["PENPOT_SECRET_KEY"],
        second_plan.service(BACKEND).unwrap().environment["PENPOT_SECRET_KEY"]
    );
    assert_eq!(
        second_plan.service(FRONTEND).unwrap().environment["PENPOT_EXPORTER_URI"],
        "http://penpot-0.penpot-endpoints.test.svc.cluster.local:6061"
    );
}

#[tokio::test]
async fn given_ready_when_identity_provider_added_without_mail_relay_then_services_stop() {
    // GIVEN: a ready replica
    let shared = Shared::default();
    publish_mandatory(&shared.facts);
    let unit = replica(&shared, 0, &[], true);
    let outcome = unwrap_result(
        unit.reconciler.reconcile(&Trigger::Startup).await,
        "initial pass",
    );
    assert!(outcome.is_ready());

    // WHEN: an identity provider appears
    shared.facts.publish(identity_provider());
    let outcome = unwrap_result(
        unit.reconciler
            .reconcile(&Trigger::RelationChanged(Relation::IdentityProvider))
            .await,
        "identity provider pass",
    );

    // THEN: mail relay becomes mandatory and everything is stopped
    assert_eq!(
        outcome,
        PassOutcome::NotReady {
            unsatisfied: vec![Requirement::MailRelay]
        }
    );
    assert!(unit.supervisor.running_services().is_empty());

    // WHEN: the mail relay arrives
    shared.facts.publish(mail_relay());
    let outcome = unwrap_result(
        unit.reconciler
            .reconcile(&Trigger::RelationChanged(Relation::MailRelay))
            .await,
        "mail relay pass",
    );

    // THEN: ready again with OIDC login and SMTP enabled
    assert!(outcome.is_ready());
    let plan = unit.supervisor.plan().unwrap();
    let backend = flags(&plan, BACKEND);
    assert!(backend.contains(&"enable-login-with-oidc".to_string()));
    assert!(backend.contains(&"disable-login-with-password".to_string()));
    assert!(backend.contains(&"enable-smtp".to_string()));
    assert!(!backend.contains(&"disable-registration".to_string()));
    assert_eq!(
        plan.service(BACKEND).unwrap().environment["PENPOT_OIDC_CLIENT_ID"],
        "penpot"
    );
}

#[tokio::test]
async fn given_runner_leaves_when_membership_changes_then_exporter_migrates() {
    // GIVEN: replicas {0, 2, 5}, local ordinal 2
    let shared = Shared::default();
    publish_mandatory(&shared.facts);
    let unit = replica(&shared, 2, &[0, 5], true);
    let outcome = unwrap_result(
        unit.reconciler.reconcile(&Trigger::Startup).await,
        "initial pass",
    );
    assert_eq!(outcome, PassOutcome::Ready { exporter_local: false });

    // WHEN: ordinal 0 leaves
    unit.membership.set_replicas(
        penpot_reconciler::ReplicaSet::new("penpot", 2).with_peers([5]),
    );
    let outcome = unwrap_result(
        unit.reconciler.reconcile(&Trigger::MembershipChanged).await,
        "membership pass",
    );

    // THEN: ordinal 2 runs the exporter and frontends point at it
    assert_eq!(outcome, PassOutcome::Ready { exporter_local: true });
    assert!(unit.supervisor.running_services().contains(EXPORTER));
    let plan = unit.supervisor.plan().unwrap();
    assert_eq!(
        plan.service(FRONTEND).unwrap().environment["PENPOT_EXPORTER_URI"],
        "http://penpot-2.penpot-endpoints.test.svc.cluster.local:6061"
    );
}

#[tokio::test]
async fn given_repeated_triggers_when_inputs_unchanged_then_plan_is_stable() {
    // GIVEN: a ready replica
    let shared = Shared::default();
    publish_mandatory(&shared.facts);
    let unit = replica(&shared, 0, &[], true);
    unwrap_result(unit.reconciler.reconcile(&Trigger::Startup).await, "first");
    let first = unit.supervisor.plan().unwrap().to_yaml().unwrap();

    // WHEN: unrelated and out-of-order triggers arrive
    for trigger in [
        Trigger::Resync,
        Trigger::RelationBroken(Relation::MailRelay),
        Trigger::ConfigChanged,
    ] {
        unwrap_result(unit.reconciler.reconcile(&trigger).await, "repeat");
    }

    // THEN: the rendered plan is byte-identical
    assert_eq!(unit.supervisor.plan().unwrap().to_yaml().unwrap(), first);
    assert_eq!(shared.secrets.created_count(), 1);
}

/// Fake backend tracking profiles created through the management command.
#[derive(Clone, Default)]
struct FakeBackend {
    profiles: Arc<Mutex<BTreeMap<String, String>>>,
}

impl FakeBackend {
    fn handle(&self, request: &ExecRequest) -> ExecOutput {
        let mut profiles = self.profiles.lock().unwrap_or_else(PoisonError::into_inner);
        let args: Vec<&str> = request.command.iter().map(String::as_str).collect();
        let ok = match args.as_slice() {
            ["python3", "manage.py", "create-profile", "--email", email, "--fullname", _] => {
                profiles.insert((*email).to_string(), request.stdin.clone().unwrap_or_default());
                true
            }
            ["python3", "manage.py", "delete-profile", "--email", email] => {
                profiles.remove(*email).is_some()
            }
            _ => false,
        };
        ExecOutput {
            exit_code: Some(if ok { 0 } else { 1 }),
            stdout: String::new(),
            stderr: if ok { String::new() } else { "no such profile".to_string() },
        }
    }

    fn login(&self, email: &str, password: &str) -> bool {
        self.profiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(email)
            .is_some_and(|stored| stored == password)
    }
}

#[tokio::test]
async fn given_ready_when_account_created_then_deleted_then_login_fails() {
    // GIVEN: a ready replica with a running backend
    let shared = Shared::default();
    publish_mandatory(&shared.facts);
    let unit = replica(&shared, 0, &[], true);
    unwrap_result(unit.reconciler.reconcile(&Trigger::Startup).await, "pass");
    let backend = FakeBackend::default();
    let handler = backend.clone();
    let actions = AccountActions::new(
        unit.reconciler.clone(),
        Arc::new(ScriptedExec::new(move |request| handler.handle(request))),
    );

    // WHEN: an account is created
    let password = unwrap_result(
        actions.create_account("user@example.com", "Test User").await,
        "create should succeed",
    );

    // THEN: the password logs in
    assert!(backend.login("user@example.com", &password));

    // WHEN: it is deleted
    unwrap_result(
        actions.delete_account("user@example.com").await,
        "delete should succeed",
    );

    // THEN: the old password no longer logs in
    assert!(!backend.login("user@example.com", &password));

    // AND: deleting again surfaces the command's output
    let err = actions.delete_account("user@example.com").await.unwrap_err();
    assert!(matches!(
        err,
        Error::ActionFailed { ref stderr, .. } if stderr == "no such profile"
    ));
}

#[tokio::test]
async fn given_slow_backend_when_deadline_passes_then_timeout_without_rollback() {
    // GIVEN: a replica whose backend never answers
    let shared = Shared::default();
    publish_mandatory(&shared.facts);
    let unit = replica(&shared, 0, &[], true);
    unit.probe.set_live(false);

    // WHEN: a pass runs
    let outcome = unwrap_result(
        unit.reconciler.reconcile(&Trigger::Startup).await,
        "pass should not fail",
    );

    // THEN: the timeout is reported and the plan stays applied
    assert!(matches!(outcome, PassOutcome::LivenessTimeout { .. }));
    assert_eq!(
        unit.reconciler.status(),
        UnitStatus::Blocked("services did not become ready in time".to_string())
    );
    assert!(unit.supervisor.running_services().contains(BACKEND));

    // WHEN: the backend comes up and another trigger arrives
    unit.probe.set_live(true);
    let outcome = unwrap_result(
        unit.reconciler.reconcile(&Trigger::Resync).await,
        "retry pass",
    );

    // THEN: the replica is active
    assert!(outcome.is_ready());
    assert_eq!(unit.reconciler.status(), UnitStatus::Active);
}
