//! Core types for the reconciler.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Ordered string map used for facts, secret contents and environments.
///
/// Ordered so that anything rendered from it is byte-identical across passes.
pub type EnvMap = BTreeMap<String, String>;

/// Logical name of an external dependency relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Relation {
    /// PostgreSQL.
    Database,
    /// Redis.
    Cache,
    /// S3-compatible storage.
    ObjectStorage,
    /// SMTP relay.
    MailRelay,
    /// Reverse-proxy ingress.
    Ingress,
    /// OAuth / OpenID Connect provider.
    IdentityProvider,
    /// Shared store visible to every replica of the application.
    Peer,
}

impl Relation {
    /// Every relation, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Database,
        Self::Cache,
        Self::ObjectStorage,
        Self::MailRelay,
        Self::Ingress,
        Self::IdentityProvider,
        Self::Peer,
    ];

    /// Relation name as published by the orchestration platform.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Cache => "cache",
            Self::ObjectStorage => "object-storage",
            Self::MailRelay => "mail-relay",
            Self::Ingress => "ingress",
            Self::IdentityProvider => "identity-provider",
            Self::Peer => "peer",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|relation| relation.as_str() == s)
            .ok_or_else(|| Error::invalid_config(format!("unknown relation '{s}'")))
    }
}

/// Identifier of a secret held by the secret store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretId(String);

impl SecretId {
    /// Wrap a raw secret identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw key/value bundle published by one external dependency.
///
/// Values may be indirect: a key such as `secret-user` holds a [`SecretId`]
/// that collectors dereference through the secret store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyFact {
    relation: Relation,
    data: EnvMap,
}

impl DependencyFact {
    /// Create a fact for a relation.
    #[must_use]
    pub const fn new(relation: Relation, data: EnvMap) -> Self {
        Self { relation, data }
    }

    /// Build a fact from key/value pairs.
    pub fn from_pairs<K, V>(relation: Relation, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            relation,
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// The relation that published this fact.
    #[must_use]
    pub const fn relation(&self) -> Relation {
        self.relation
    }

    /// Look up a non-empty value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Look up a value that refers to a secret.
    #[must_use]
    pub fn secret_ref(&self, key: &str) -> Option<SecretId> {
        self.get(key).map(SecretId::new)
    }

    /// Raw data.
    #[must_use]
    pub const fn data(&self) -> &EnvMap {
        &self.data
    }
}

/// Operator-facing status published after every pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum UnitStatus {
    /// Services are running and live.
    Active,
    /// Waiting on external dependencies.
    Waiting(String),
    /// Needs operator attention.
    Blocked(String),
    /// Converging.
    Maintenance(String),
}

impl UnitStatus {
    /// Status name without the message.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Waiting(_) => "waiting",
            Self::Blocked(_) => "blocked",
            Self::Maintenance(_) => "maintenance",
        }
    }

    /// Status message, empty for `Active`.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Active => "",
            Self::Waiting(msg) | Self::Blocked(msg) | Self::Maintenance(msg) => msg,
        }
    }
}

impl Default for UnitStatus {
    fn default() -> Self {
        Self::Maintenance("starting".to_string())
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            other => write!(f, "{}: {}", other.name(), other.message()),
        }
    }
}
