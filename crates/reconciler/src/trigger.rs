//! Reconcile triggers and the event-name registry.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::types::Relation;

/// Why a reconciliation pass runs. Every trigger leads to the same full pass;
/// the variant is only recorded for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Trigger {
    /// A dependency published new data.
    RelationChanged(Relation),
    /// A dependency went away.
    RelationBroken(Relation),
    /// A replica joined or left.
    MembershipChanged,
    /// The local replica gained the writer role.
    LeaderElected,
    /// Local configuration changed.
    ConfigChanged,
    /// Periodic nudge.
    Resync,
    /// Process start.
    Startup,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RelationChanged(relation) => write!(f, "{relation}-relation-changed"),
            Self::RelationBroken(relation) => write!(f, "{relation}-relation-broken"),
            Self::MembershipChanged => f.write_str("membership-changed"),
            Self::LeaderElected => f.write_str("leader-elected"),
            Self::ConfigChanged => f.write_str("config-changed"),
            Self::Resync => f.write_str("resync"),
            Self::Startup => f.write_str("startup"),
        }
    }
}

/// Explicit mapping from platform event names to triggers.
///
/// Built once at process start; lookups of unregistered names fail.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    hooks: BTreeMap<String, Trigger>,
}

impl HookRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every event the engine reacts to.
    ///
    /// Dependency relations map `<relation>-relation-{joined,changed}` to
    /// [`Trigger::RelationChanged`] and `<relation>-relation-{departed,broken}`
    /// to [`Trigger::RelationBroken`]. Peer relation events map to
    /// [`Trigger::MembershipChanged`].
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for relation in Relation::ALL {
            if relation == Relation::Peer {
                for suffix in ["joined", "changed", "departed", "broken"] {
                    registry.register(
                        format!("{relation}-relation-{suffix}"),
                        Trigger::MembershipChanged,
                    );
                }
                continue;
            }
            for suffix in ["joined", "changed"] {
                registry.register(
                    format!("{relation}-relation-{suffix}"),
                    Trigger::RelationChanged(relation),
                );
            }
            for suffix in ["departed", "broken"] {
                registry.register(
                    format!("{relation}-relation-{suffix}"),
                    Trigger::RelationBroken(relation),
                );
            }
        }
        registry
            .register("secret-changed", Trigger::RelationChanged(Relation::Peer))
            .register("leader-elected", Trigger::LeaderElected)
            .register("config-changed", Trigger::ConfigChanged)
            .register("upgrade-charm", Trigger::Startup)
            .register("start", Trigger::Startup)
            .register("penpot-pebble-ready", Trigger::Startup)
            .register("update-status", Trigger::Resync);
        registry
    }

    /// Register an event name. A later registration replaces an earlier one.
    pub fn register(&mut self, event: impl Into<String>, trigger: Trigger) -> &mut Self {
        self.hooks.insert(event.into(), trigger);
        self
    }

    /// Resolve an event name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an unregistered name.
    pub fn resolve(&self, event: &str) -> Result<Trigger> {
        self.hooks
            .get(event)
            .copied()
            .ok_or_else(|| Error::invalid_config(format!("unknown event '{event}'")))
    }

    /// Registered event names, sorted.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }
}
