//! Singleton election over replica membership.
//!
//! The replica with the lowest ordinal runs the exporter. Every replica that
//! sees the same membership computes the same runner, so no messages are
//! exchanged. Two replicas that briefly disagree on membership may both
//! believe they are the runner until the next pass; the exporter must
//! tolerate a short double run.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Replica name of the form `<app>/<ordinal>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId {
    /// Application name.
    pub app: String,
    /// Ordinal allocated by the platform. Unique and never reused.
    pub ordinal: u32,
}

impl ReplicaId {
    /// Create a replica id.
    pub fn new(app: impl Into<String>, ordinal: u32) -> Self {
        Self {
            app: app.into(),
            ordinal,
        }
    }

    /// Address of this replica inside the cluster.
    ///
    /// `<app>-<ordinal>.<app>-endpoints.<model>.svc.cluster.local`
    #[must_use]
    pub fn cluster_hostname(&self, model: &str) -> String {
        format!(
            "{app}-{ordinal}.{app}-endpoints.{model}.svc.cluster.local",
            app = self.app,
            ordinal = self.ordinal,
        )
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app, self.ordinal)
    }
}

impl FromStr for ReplicaId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (app, ordinal) = s
            .rsplit_once('/')
            .ok_or_else(|| Error::invalid_config(format!("invalid replica name '{s}'")))?;
        let ordinal = ordinal
            .parse()
            .map_err(|e| Error::invalid_config(format!("invalid replica ordinal in '{s}': {e}")))?;
        if app.is_empty() {
            return Err(Error::invalid_config(format!("invalid replica name '{s}'")));
        }
        Ok(Self::new(app, ordinal))
    }
}

/// Replicas of one application known to the local replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSet {
    app: String,
    local: u32,
    ordinals: BTreeSet<u32>,
}

impl ReplicaSet {
    /// Create a set holding only the local replica.
    pub fn new(app: impl Into<String>, local: u32) -> Self {
        Self {
            app: app.into(),
            local,
            ordinals: BTreeSet::from([local]),
        }
    }

    /// Add peers. The local replica is always kept.
    #[must_use]
    pub fn with_peers(mut self, peers: impl IntoIterator<Item = u32>) -> Self {
        self.ordinals.extend(peers);
        self
    }

    /// Remove a departed peer. The local replica cannot be removed.
    pub fn remove(&mut self, ordinal: u32) {
        if ordinal != self.local {
            self.ordinals.remove(&ordinal);
        }
    }

    /// Application name.
    #[must_use]
    pub fn app(&self) -> &str {
        &self.app
    }

    /// The local replica.
    #[must_use]
    pub fn local(&self) -> ReplicaId {
        ReplicaId::new(self.app.clone(), self.local)
    }

    /// Ordinals of every known replica, ascending.
    pub fn ordinals(&self) -> impl Iterator<Item = u32> + '_ {
        self.ordinals.iter().copied()
    }

    /// Number of known replicas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ordinals.len()
    }

    /// Whether the set is empty. Never true for a set built by [`Self::new`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordinals.is_empty()
    }
}

/// Outcome of one election.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Election {
    /// Replica designated to run the singleton worker.
    pub runner: ReplicaId,
    /// Whether that replica is the local one.
    pub local_is_runner: bool,
}

/// Elect the singleton runner: the replica with the minimum ordinal.
#[must_use]
pub fn elect(replicas: &ReplicaSet) -> Option<Election> {
    replicas.ordinals().min().map(|ordinal| Election {
        runner: ReplicaId::new(replicas.app(), ordinal),
        local_is_runner: ordinal == replicas.local,
    })
}
