//! Credential collectors.
//!
//! One pure function per dependency kind projects a [`DependencyFact`] into the
//! exact environment variables Penpot needs. A bundle is either complete or
//! absent: any missing field, or a secret reference that no longer resolves,
//! yields `None`.

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::interfaces::{FactSource, SecretStore};
use crate::types::{DependencyFact, EnvMap, Relation};

const DEFAULT_S3_REGION: &str = "us-east-1";
const DEFAULT_OIDC_SCOPES: &str = "openid profile email";
const NO_REPLY_USER: &str = "no-reply";

/// A validated projection of one dependency fact into environment variables.
pub trait CredentialBundle {
    /// Environment variables contributed by this bundle.
    fn env(&self) -> EnvMap;
}

/// Local settings consulted by collectors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorSettings {
    /// Overrides the derived send-from address of the mail relay.
    pub email_address: Option<String>,
}

/// Read `inline_key` directly, or dereference `ref_key` and read `content_key`
/// from the secret it points at. A reference wins over an inline value.
fn resolve_secret(
    fact: &DependencyFact,
    inline_key: &str,
    ref_key: &str,
    content_key: &str,
    secrets: &dyn SecretStore,
) -> Option<String> {
    match fact.secret_ref(ref_key) {
        Some(id) => {
            let content = secrets.read(&id);
            if content.is_none() {
                debug!(relation = %fact.relation(), secret = %id, "Secret reference is stale");
            }
            content?
                .get(content_key)
                .filter(|value| !value.is_empty())
                .cloned()
        }
        None => fact.get(inline_key).map(str::to_string),
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseCredentials {
    /// `postgresql://host:port/database`.
    pub uri: String,
    /// Database user.
    pub username: String,
    /// Database password.
    pub password: String,
}

impl DatabaseCredentials {
    /// Collect from a `database` fact.
    #[must_use]
    pub fn collect(fact: &DependencyFact, secrets: &dyn SecretStore) -> Option<Self> {
        let endpoint = fact
            .get("endpoints")?
            .split(',')
            .map(str::trim)
            .find(|endpoint| !endpoint.is_empty())?;
        let database = fact.get("database")?;
        let username = resolve_secret(fact, "username", "secret-user", "username", secrets)?;
        let password = resolve_secret(fact, "password", "secret-user", "password", secrets)?;
        Some(Self {
            uri: format!("postgresql://{endpoint}/{database}"),
            username,
            password,
        })
    }
}

impl CredentialBundle for DatabaseCredentials {
    fn env(&self) -> EnvMap {
        EnvMap::from([
            ("PENPOT_DATABASE_URI".to_string(), self.uri.clone()),
            ("PENPOT_DATABASE_USERNAME".to_string(), self.username.clone()),
            ("PENPOT_DATABASE_PASSWORD".to_string(), self.password.clone()),
        ])
    }
}

/// Redis connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheCredentials {
    /// `redis://host:port`.
    pub uri: String,
}

impl CacheCredentials {
    /// Collect from a `cache` fact.
    #[must_use]
    pub fn collect(fact: &DependencyFact) -> Option<Self> {
        let hostname = fact.get("hostname")?;
        let port = fact.get("port")?;
        Some(Self {
            uri: format!("redis://{hostname}:{port}"),
        })
    }
}

impl CredentialBundle for CacheCredentials {
    fn env(&self) -> EnvMap {
        EnvMap::from([("PENPOT_REDIS_URI".to_string(), self.uri.clone())])
    }
}

/// S3 asset storage settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStorageCredentials {
    /// Access key id.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: String,
    /// Bucket name.
    pub bucket: String,
    /// Endpoint URL.
    pub endpoint: String,
    /// Region, `us-east-1` when not published.
    pub region: String,
}

impl ObjectStorageCredentials {
    /// Collect from an `object-storage` fact.
    #[must_use]
    pub fn collect(fact: &DependencyFact) -> Option<Self> {
        Some(Self {
            access_key: fact.get("access-key")?.to_string(),
            secret_key: fact.get("secret-key")?.to_string(),
            bucket: fact.get("bucket")?.to_string(),
            endpoint: fact.get("endpoint")?.to_string(),
            region: fact.get("region").unwrap_or(DEFAULT_S3_REGION).to_string(),
        })
    }
}

impl CredentialBundle for ObjectStorageCredentials {
    fn env(&self) -> EnvMap {
        EnvMap::from([
            ("AWS_ACCESS_KEY_ID".to_string(), self.access_key.clone()),
            ("AWS_SECRET_ACCESS_KEY".to_string(), self.secret_key.clone()),
            (
                "PENPOT_ASSETS_STORAGE_BACKEND".to_string(),
                "assets-s3".to_string(),
            ),
            (
                "PENPOT_STORAGE_ASSETS_S3_BUCKET".to_string(),
                self.bucket.clone(),
            ),
            (
                "PENPOT_STORAGE_ASSETS_S3_ENDPOINT".to_string(),
                self.endpoint.clone(),
            ),
            (
                "PENPOT_STORAGE_ASSETS_S3_REGION".to_string(),
                self.region.clone(),
            ),
        ])
    }
}

/// Transport security of the SMTP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportSecurity {
    /// Plain text.
    #[default]
    None,
    /// Implicit TLS.
    Tls,
    /// STARTTLS upgrade.
    StartTls,
}

impl TransportSecurity {
    fn parse(value: Option<&str>) -> Option<Self> {
        match value.map(str::to_ascii_lowercase).as_deref() {
            None | Some("none") => Some(Self::None),
            Some("tls") => Some(Self::Tls),
            Some("starttls") => Some(Self::StartTls),
            Some(_) => None,
        }
    }
}

/// SMTP login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpLogin {
    /// SMTP user.
    pub user: String,
    /// SMTP password.
    pub password: String,
}

/// SMTP relay settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailRelayCredentials {
    /// Relay host.
    pub host: String,
    /// Relay port.
    pub port: String,
    /// Connection security.
    pub security: TransportSecurity,
    /// Login, when the relay publishes a user.
    pub login: Option<SmtpLogin>,
    /// From and Reply-To address.
    pub from_address: String,
}

impl MailRelayCredentials {
    /// Collect from a `mail-relay` fact.
    ///
    /// The from address is `settings.email_address` when configured, otherwise
    /// `<user>@<domain>`, falling back to `no-reply@<domain>`.
    #[must_use]
    pub fn collect(
        fact: &DependencyFact,
        secrets: &dyn SecretStore,
        settings: &CollectorSettings,
    ) -> Option<Self> {
        let host = fact.get("host")?.to_string();
        let port = fact.get("port")?.to_string();
        let domain = fact.get("domain")?;
        let security = TransportSecurity::parse(fact.get("transport_security"))?;
        let login = match fact.get("user") {
            Some(user) => {
                let password = if fact.secret_ref("password_id").is_some() {
                    resolve_secret(fact, "password", "password_id", "password", secrets)?
                } else {
                    fact.get("password").unwrap_or_default().to_string()
                };
                Some(SmtpLogin {
                    user: user.to_string(),
                    password,
                })
            }
            None => None,
        };
        let from_address = settings
            .email_address
            .as_deref()
            .filter(|address| !address.is_empty())
            .map_or_else(
                || {
                    let user = fact.get("user").unwrap_or(NO_REPLY_USER);
                    format!("{user}@{domain}")
                },
                str::to_string,
            );
        Some(Self {
            host,
            port,
            security,
            login,
            from_address,
        })
    }
}

impl CredentialBundle for MailRelayCredentials {
    fn env(&self) -> EnvMap {
        let mut env = EnvMap::from([
            (
                "PENPOT_SMTP_DEFAULT_FROM".to_string(),
                self.from_address.clone(),
            ),
            (
                "PENPOT_SMTP_DEFAULT_REPLY_TO".to_string(),
                self.from_address.clone(),
            ),
            ("PENPOT_SMTP_HOST".to_string(), self.host.clone()),
            ("PENPOT_SMTP_PORT".to_string(), self.port.clone()),
            (
                "PENPOT_SMTP_SSL".to_string(),
                (self.security == TransportSecurity::Tls).to_string(),
            ),
            (
                "PENPOT_SMTP_TLS".to_string(),
                (self.security == TransportSecurity::StartTls).to_string(),
            ),
        ]);
        if let Some(login) = &self.login {
            env.insert("PENPOT_SMTP_USERNAME".to_string(), login.user.clone());
            env.insert("PENPOT_SMTP_PASSWORD".to_string(), login.password.clone());
        }
        env
    }
}

#[derive(Deserialize)]
struct IngressDocument {
    url: String,
}

/// Public address assigned by the ingress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressConfig {
    /// Public base URI. TLS terminates at the ingress, so the scheme is `http`.
    pub public_uri: String,
}

impl IngressConfig {
    /// Collect from an `ingress` fact.
    #[must_use]
    pub fn collect(fact: &DependencyFact) -> Option<Self> {
        let document: IngressDocument = serde_json::from_str(fact.get("ingress")?).ok()?;
        let mut url = Url::parse(&document.url).ok()?;
        url.set_scheme("http").ok()?;
        Some(Self {
            public_uri: url.to_string(),
        })
    }
}

impl CredentialBundle for IngressConfig {
    fn env(&self) -> EnvMap {
        EnvMap::from([("PENPOT_PUBLIC_URI".to_string(), self.public_uri.clone())])
    }
}

/// OpenID Connect client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProviderCredentials {
    /// Client id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
    /// Issuer URL.
    pub issuer_url: String,
    /// Authorization endpoint.
    pub authorization_endpoint: String,
    /// Token endpoint.
    pub token_endpoint: String,
    /// Userinfo endpoint.
    pub userinfo_endpoint: String,
    /// JWKS endpoint.
    pub jwks_endpoint: String,
    /// Requested scopes.
    pub scopes: String,
}

impl IdentityProviderCredentials {
    /// Collect from an `identity-provider` fact.
    #[must_use]
    pub fn collect(fact: &DependencyFact, secrets: &dyn SecretStore) -> Option<Self> {
        Some(Self {
            client_id: fact.get("client_id")?.to_string(),
            client_secret: resolve_secret(
                fact,
                "client_secret",
                "client_secret_id",
                "secret",
                secrets,
            )?,
            issuer_url: fact.get("issuer_url")?.to_string(),
            authorization_endpoint: fact.get("authorization_endpoint")?.to_string(),
            token_endpoint: fact.get("token_endpoint")?.to_string(),
            userinfo_endpoint: fact.get("userinfo_endpoint")?.to_string(),
            jwks_endpoint: fact.get("jwks_endpoint")?.to_string(),
            scopes: fact.get("scope").unwrap_or(DEFAULT_OIDC_SCOPES).to_string(),
        })
    }
}

impl CredentialBundle for IdentityProviderCredentials {
    fn env(&self) -> EnvMap {
        EnvMap::from([
            ("PENPOT_OIDC_CLIENT_ID".to_string(), self.client_id.clone()),
            (
                "PENPOT_OIDC_CLIENT_SECRET".to_string(),
                self.client_secret.clone(),
            ),
            ("PENPOT_OIDC_BASE_URI".to_string(), self.issuer_url.clone()),
            (
                "PENPOT_OIDC_AUTH_URI".to_string(),
                self.authorization_endpoint.clone(),
            ),
            (
                "PENPOT_OIDC_TOKEN_URI".to_string(),
                self.token_endpoint.clone(),
            ),
            (
                "PENPOT_OIDC_USER_URI".to_string(),
                self.userinfo_endpoint.clone(),
            ),
            ("PENPOT_OIDC_JWKS_URI".to_string(), self.jwks_endpoint.clone()),
            ("PENPOT_OIDC_SCOPES".to_string(), self.scopes.clone()),
        ])
    }
}

/// Every collector's result for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundles {
    /// PostgreSQL.
    pub database: Option<DatabaseCredentials>,
    /// Redis.
    pub cache: Option<CacheCredentials>,
    /// S3.
    pub object_storage: Option<ObjectStorageCredentials>,
    /// SMTP.
    pub mail_relay: Option<MailRelayCredentials>,
    /// Ingress.
    pub ingress: Option<IngressConfig>,
    /// OIDC.
    pub identity_provider: Option<IdentityProviderCredentials>,
}

impl Bundles {
    /// Run every collector against the current facts.
    #[must_use]
    pub fn collect(
        facts: &dyn FactSource,
        secrets: &dyn SecretStore,
        settings: &CollectorSettings,
    ) -> Self {
        let fact = |relation| facts.get(relation);
        Self {
            database: fact(Relation::Database)
                .and_then(|f| DatabaseCredentials::collect(&f, secrets)),
            cache: fact(Relation::Cache).and_then(|f| CacheCredentials::collect(&f)),
            object_storage: fact(Relation::ObjectStorage)
                .and_then(|f| ObjectStorageCredentials::collect(&f)),
            mail_relay: fact(Relation::MailRelay)
                .and_then(|f| MailRelayCredentials::collect(&f, secrets, settings)),
            ingress: fact(Relation::Ingress).and_then(|f| IngressConfig::collect(&f)),
            identity_provider: fact(Relation::IdentityProvider)
                .and_then(|f| IdentityProviderCredentials::collect(&f, secrets)),
        }
    }
}
