//! Write-once shared secret.
//!
//! The secret reference lives in the peer store under [`SECRET_REF_KEY`].
//! Any replica may read it; only the replica holding the writer role may
//! create it, and only while no reference exists. There is no rotation.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use tracing::{debug, info, warn};

use crate::interfaces::{PeerStore, SecretStore};
use crate::types::{EnvMap, SecretId};

/// Peer store key holding the secret reference.
pub const SECRET_REF_KEY: &str = "secret-id";

/// Secret content key holding the value.
pub const SECRET_CONTENT_KEY: &str = "secret-key";

/// Bytes of entropy in a generated secret.
pub const SECRET_ENTROPY_BYTES: usize = 64;

/// Whether the local replica may write application-scoped data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterRole {
    /// Designated writer.
    Writer,
    /// Everyone else.
    Reader,
}

impl WriterRole {
    /// Role from the platform's leadership flag.
    #[must_use]
    pub const fn from_leadership(is_leader: bool) -> Self {
        if is_leader { Self::Writer } else { Self::Reader }
    }
}

/// The application's shared secret key. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(String);

impl SharedSecret {
    /// Wrap a value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The secret value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

/// `len` random bytes from the OS, base64 URL-safe without padding.
#[must_use]
pub fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Reads, and on the writer replica creates, the shared secret.
pub struct SecretCoordinator<'a> {
    peers: &'a dyn PeerStore,
    secrets: &'a dyn SecretStore,
}

impl<'a> SecretCoordinator<'a> {
    /// Create a coordinator over the shared stores.
    #[must_use]
    pub const fn new(peers: &'a dyn PeerStore, secrets: &'a dyn SecretStore) -> Self {
        Self { peers, secrets }
    }

    /// Read the published secret. A stale reference reads as absent.
    #[must_use]
    pub fn read(&self) -> Option<SharedSecret> {
        let id = SecretId::new(self.peers.get(SECRET_REF_KEY)?);
        let content = self.secrets.read(&id);
        if content.is_none() {
            debug!(secret = %id, "Published secret reference is stale");
        }
        content?
            .get(SECRET_CONTENT_KEY)
            .filter(|value| !value.is_empty())
            .map(SharedSecret::new)
    }

    /// Return the secret, creating it first when the local replica is the
    /// writer and no reference has been published.
    ///
    /// Readers never create. A failed write is logged and reported as absent;
    /// the next pass retries.
    #[must_use]
    pub fn ensure(&self, role: WriterRole) -> Option<SharedSecret> {
        if let Some(secret) = self.read() {
            return Some(secret);
        }
        match role {
            WriterRole::Reader => {
                debug!("Shared secret not yet created, waiting for writer");
                None
            }
            WriterRole::Writer => self.create(),
        }
    }

    fn create(&self) -> Option<SharedSecret> {
        if self.peers.get(SECRET_REF_KEY).is_some() {
            // Published references are immutable, even when stale.
            warn!("Refusing to replace a published secret reference");
            return None;
        }
        let value = random_token(SECRET_ENTROPY_BYTES);
        let content = EnvMap::from([(SECRET_CONTENT_KEY.to_string(), value.clone())]);
        let id = match self.secrets.create(content) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Failed to create shared secret");
                return None;
            }
        };
        if let Err(e) = self.peers.put(SECRET_REF_KEY, id.as_str()) {
            warn!(error = %e, secret = %id, "Failed to publish shared secret reference");
            return None;
        }
        info!(secret = %id, "Created shared secret");
        Some(SharedSecret::new(value))
    }
}
