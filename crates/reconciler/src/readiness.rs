//! Readiness evaluation.
//!
//! Requirements are declared in a rule table pairing each requirement with the
//! predicate that makes it mandatory. The evaluator is total: every
//! requirement is reported, mandatory or not, and overall readiness is the
//! conjunction of the mandatory ones.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::collectors::Bundles;

/// Something the application needs before it may run.
///
/// Variants are declared alphabetically so the derived ordering matches the
/// order of their names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Requirement {
    /// Redis credentials.
    Cache,
    /// PostgreSQL credentials.
    Database,
    /// OIDC client settings.
    IdentityProvider,
    /// Public address.
    Ingress,
    /// SMTP relay settings.
    MailRelay,
    /// S3 credentials.
    ObjectStorage,
    /// Replica membership is known.
    Peers,
    /// Service supervisor is reachable.
    Runtime,
    /// Shared secret key exists.
    Secret,
}

impl Requirement {
    /// Every requirement.
    pub const ALL: [Self; 9] = [
        Self::Cache,
        Self::Database,
        Self::IdentityProvider,
        Self::Ingress,
        Self::MailRelay,
        Self::ObjectStorage,
        Self::Peers,
        Self::Runtime,
        Self::Secret,
    ];

    /// Operator-facing name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Database => "database",
            Self::IdentityProvider => "identity-provider",
            Self::Ingress => "ingress",
            Self::MailRelay => "mail-relay",
            Self::ObjectStorage => "object-storage",
            Self::Peers => "peers",
            Self::Runtime => "runtime",
            Self::Secret => "secret",
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which requirements are satisfied this pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessInput {
    satisfied: BTreeMap<Requirement, bool>,
}

impl ReadinessInput {
    /// Build the input from collector results and the two runtime booleans.
    #[must_use]
    pub fn new(
        bundles: &Bundles,
        secret_present: bool,
        runtime_reachable: bool,
        replicas_present: bool,
    ) -> Self {
        Self {
            satisfied: BTreeMap::from([
                (Requirement::Cache, bundles.cache.is_some()),
                (Requirement::Database, bundles.database.is_some()),
                (
                    Requirement::IdentityProvider,
                    bundles.identity_provider.is_some(),
                ),
                (Requirement::Ingress, bundles.ingress.is_some()),
                (Requirement::MailRelay, bundles.mail_relay.is_some()),
                (Requirement::ObjectStorage, bundles.object_storage.is_some()),
                (Requirement::Peers, replicas_present),
                (Requirement::Runtime, runtime_reachable),
                (Requirement::Secret, secret_present),
            ]),
        }
    }

    /// Override one requirement.
    #[must_use]
    pub fn with(mut self, requirement: Requirement, satisfied: bool) -> Self {
        self.satisfied.insert(requirement, satisfied);
        self
    }

    /// Whether a requirement is satisfied. Unknown requirements are not.
    #[must_use]
    pub fn is_satisfied(&self, requirement: Requirement) -> bool {
        self.satisfied.get(&requirement).copied().unwrap_or(false)
    }
}

/// When a requirement is mandatory.
#[derive(Debug, Clone, Copy)]
enum Activation {
    Always,
    WhenPresent(Requirement),
    Never,
}

impl Activation {
    fn is_active(self, input: &ReadinessInput) -> bool {
        match self {
            Self::Always => true,
            Self::WhenPresent(other) => input.is_satisfied(other),
            Self::Never => false,
        }
    }
}

const RULES: [(Requirement, Activation); 9] = [
    (Requirement::Cache, Activation::Always),
    (Requirement::Database, Activation::Always),
    (Requirement::IdentityProvider, Activation::Never),
    (Requirement::Ingress, Activation::Always),
    (
        Requirement::MailRelay,
        Activation::WhenPresent(Requirement::IdentityProvider),
    ),
    (Requirement::ObjectStorage, Activation::Always),
    (Requirement::Peers, Activation::Always),
    (Requirement::Runtime, Activation::Always),
    (Requirement::Secret, Activation::Always),
];

/// State of one requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementStatus {
    /// Whether readiness depends on it this pass.
    pub mandatory: bool,
    /// Whether it is satisfied.
    pub satisfied: bool,
}

/// Satisfaction of every requirement plus the derived overall readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessReport {
    requirements: BTreeMap<Requirement, RequirementStatus>,
}

impl ReadinessReport {
    /// Whether every mandatory requirement is satisfied.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.requirements
            .values()
            .all(|status| !status.mandatory || status.satisfied)
    }

    /// Mandatory requirements that are not satisfied, sorted by name.
    #[must_use]
    pub fn unsatisfied(&self) -> Vec<Requirement> {
        self.requirements
            .iter()
            .filter(|(_, status)| status.mandatory && !status.satisfied)
            .map(|(requirement, _)| *requirement)
            .sorted_by_key(|requirement| requirement.as_str())
            .collect_vec()
    }

    /// Status of one requirement.
    #[must_use]
    pub fn status(&self, requirement: Requirement) -> Option<RequirementStatus> {
        self.requirements.get(&requirement).copied()
    }

    /// Whether a requirement is mandatory this pass.
    #[must_use]
    pub fn is_mandatory(&self, requirement: Requirement) -> bool {
        self.status(requirement).is_some_and(|s| s.mandatory)
    }

    /// `waiting for cache, database`, or `None` when ready.
    #[must_use]
    pub fn waiting_message(&self) -> Option<String> {
        let unsatisfied = self.unsatisfied();
        if unsatisfied.is_empty() {
            None
        } else {
            Some(format!(
                "waiting for {}",
                unsatisfied.iter().map(|r| r.as_str()).join(", ")
            ))
        }
    }
}

/// Evaluate every rule against the input.
#[must_use]
pub fn evaluate(input: &ReadinessInput) -> ReadinessReport {
    ReadinessReport {
        requirements: RULES
            .iter()
            .map(|(requirement, activation)| {
                (
                    *requirement,
                    RequirementStatus {
                        mandatory: activation.is_active(input),
                        satisfied: input.is_satisfied(*requirement),
                    },
                )
            })
            .collect(),
    }
}
