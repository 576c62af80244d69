//! JSON state file standing in for the orchestration platform.
//!
//! The document carries dependency facts, secrets, the peer store and
//! replica membership:
//!
//! ```json
//! {
//!   "relations": { "cache": { "hostname": "redis", "port": "6379" } },
//!   "secrets": { "secret:0": { "password": "..." } },
//!   "peer": { "secret-id": "secret:0" },
//!   "replicas": [0, 1],
//!   "leader": true
//! }
//! ```
//!
//! Writes from the engine (secret creation, peer keys) are persisted back
//! with a write-then-rename so a concurrent reader never sees a torn file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use penpot_reconciler::{
    DependencyFact, EnvMap, FactSource, MembershipSource, PeerStore, Relation, ReplicaSet,
    SecretId, SecretStore, Trigger,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// State file errors.
#[derive(Error, Debug)]
pub enum StateError {
    /// The file could not be read or written.
    #[error("state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid.
    #[error("state file {path} is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// On-disk document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default)]
    pub relations: BTreeMap<Relation, EnvMap>,
    #[serde(default)]
    pub secrets: BTreeMap<SecretId, EnvMap>,
    #[serde(default)]
    pub peer: EnvMap,
    #[serde(default)]
    pub replicas: BTreeSet<u32>,
    #[serde(default)]
    pub leader: bool,
}

impl StateDocument {
    /// Triggers explaining the difference from `previous` to `self`.
    #[must_use]
    pub fn changes_since(&self, previous: &Self) -> Vec<Trigger> {
        let relations = Relation::ALL.into_iter().filter_map(|relation| {
            match (previous.relations.get(&relation), self.relations.get(&relation)) {
                (Some(_), None) => Some(Trigger::RelationBroken(relation)),
                (old, Some(new)) if old != Some(new) => Some(Trigger::RelationChanged(relation)),
                _ => None,
            }
        });
        let peer = (previous.peer != self.peer).then_some(Trigger::RelationChanged(Relation::Peer));
        let membership = (previous.replicas != self.replicas).then_some(Trigger::MembershipChanged);
        let leader = (self.leader && !previous.leader).then_some(Trigger::LeaderElected);
        let secrets = (previous.secrets != self.secrets).then_some(Trigger::ConfigChanged);

        relations
            .chain(peer)
            .chain(membership)
            .chain(leader)
            .chain(secrets)
            .collect()
    }
}

/// Fact source, secret store, peer store and membership backed by one file.
#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
    app: String,
    local: u32,
    document: RwLock<StateDocument>,
}

impl StateFile {
    /// Open a state file. A missing file is treated as an empty document.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the file exists but cannot be read or parsed.
    pub fn open(
        path: impl Into<PathBuf>,
        app: impl Into<String>,
        local: u32,
    ) -> Result<Self, StateError> {
        let path = path.into();
        let document = read_document(&path)?;
        Ok(Self {
            path,
            app: app.into(),
            local,
            document: RwLock::new(document),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current document.
    #[must_use]
    pub fn document(&self) -> StateDocument {
        self.document
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-read the file and return triggers for whatever changed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the file cannot be read or parsed. The
    /// previous document is kept in that case.
    pub fn reload(&self) -> Result<Vec<Trigger>, StateError> {
        let fresh = read_document(&self.path)?;
        let mut document = self.document.write().unwrap_or_else(PoisonError::into_inner);
        let triggers = fresh.changes_since(&document);
        if !triggers.is_empty() {
            debug!(path = %self.path.display(), triggers = ?triggers, "State file changed");
        }
        *document = fresh;
        Ok(triggers)
    }

    /// Apply `change` to the file as it is on disk now, so edits the watcher
    /// has not reloaded yet survive the write.
    ///
    /// Only the written entries reach the cached document. Everything else
    /// stays as last reloaded, so the next reload still reports the
    /// external edits.
    fn update<T>(
        &self,
        change: impl FnOnce(&mut StateDocument) -> T,
    ) -> Result<T, StateError> {
        let mut document = self.document.write().unwrap_or_else(PoisonError::into_inner);
        let before = read_document(&self.path)?;
        let mut after = before.clone();
        let value = change(&mut after);
        write_document(&self.path, &after)?;
        carry_writes(&mut document, &before, &after);
        Ok(value)
    }
}

fn carry_writes(cache: &mut StateDocument, before: &StateDocument, after: &StateDocument) {
    for (id, content) in &after.secrets {
        if before.secrets.get(id) != Some(content) {
            cache.secrets.insert(id.clone(), content.clone());
        }
    }
    for (key, value) in &after.peer {
        if before.peer.get(key) != Some(value) {
            cache.peer.insert(key.clone(), value.clone());
        }
    }
}

fn read_document(path: &Path) -> Result<StateDocument, StateError> {
    match std::fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(StateDocument::default()),
        Ok(content) => serde_json::from_str(&content).map_err(|e| StateError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateDocument::default()),
        Err(source) => Err(StateError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_document(path: &Path, document: &StateDocument) -> Result<(), StateError> {
    let io_error = |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    };
    let content = serde_json::to_string_pretty(document).map_err(|e| StateError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, content).map_err(io_error)?;
    std::fs::rename(&staging, path).map_err(io_error)
}

impl FactSource for StateFile {
    fn get(&self, relation: Relation) -> Option<DependencyFact> {
        self.document
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .relations
            .get(&relation)
            .map(|data| DependencyFact::new(relation, data.clone()))
    }
}

impl SecretStore for StateFile {
    fn read(&self, id: &SecretId) -> Option<EnvMap> {
        self.document
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .secrets
            .get(id)
            .cloned()
    }

    fn create(&self, content: EnvMap) -> penpot_reconciler::Result<SecretId> {
        let id = self
            .update(|document| {
                let id = (document.secrets.len()..)
                    .map(|n| SecretId::new(format!("secret:{n}")))
                    .find(|id| !document.secrets.contains_key(id))
                    .unwrap_or_else(|| SecretId::new("secret"));
                document.secrets.insert(id.clone(), content);
                id
            })
            .map_err(|e| penpot_reconciler::Error::secret_store(e.to_string()))?;
        info!(secret = %id, "Created secret");
        Ok(id)
    }
}

impl PeerStore for StateFile {
    fn get(&self, key: &str) -> Option<String> {
        self.document
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .peer
            .get(key)
            .cloned()
    }

    fn put(&self, key: &str, value: &str) -> penpot_reconciler::Result<()> {
        self.update(|document| {
            document.peer.insert(key.to_string(), value.to_string());
        })
        .map_err(|e| penpot_reconciler::Error::peer_store(e.to_string()))
    }
}

impl MembershipSource for StateFile {
    fn replica_set(&self) -> ReplicaSet {
        let peers = self
            .document
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .replicas
            .clone();
        ReplicaSet::new(self.app.clone(), self.local).with_peers(peers)
    }

    fn holds_writer_role(&self) -> bool {
        self.document
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .leader
    }
}
