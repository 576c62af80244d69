//! Service plan generation.
//!
//! [`generate`] is a pure function of the readiness report, the collected
//! bundles, the shared secret and the election. Every map in the plan is
//! ordered and every flag list is sorted, so identical inputs always render
//! to identical bytes and re-applying an unchanged plan is a no-op.

use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::collectors::{Bundles, CredentialBundle};
use crate::election::Election;
use crate::error::{Error, Result};
use crate::readiness::{ReadinessReport, Requirement};
use crate::secret::SharedSecret;
use crate::types::EnvMap;

/// Penpot API backend.
pub const BACKEND: &str = "backend";
/// Nginx serving the web client.
pub const FRONTEND: &str = "frontend";
/// Headless-browser render worker. Runs on one replica only.
pub const EXPORTER: &str = "exporter";
/// Every managed service.
pub const SERVICES: [&str; 3] = [BACKEND, FRONTEND, EXPORTER];

const PLAN_SUMMARY: &str = "penpot services";
const BACKEND_ADDRESS: &str = "http://127.0.0.1:6060";
const EXPORTER_PORT: u16 = 6061;
const EXPORTER_PUBLIC_URI: &str = "http://127.0.0.1:8080";
const JAVA_HOME: &str = "/usr/lib/jvm/java-21-openjdk-amd64";

const BACKEND_BASE_FLAGS: [&str; 5] = [
    "disable-log-emails",
    "disable-onboarding-questions",
    "disable-secure-session-cookies",
    "disable-telemetry",
    "enable-prepl-server",
];
const FRONTEND_BASE_FLAGS: [&str; 1] = ["disable-onboarding-questions"];
const PASSWORD_LOGIN_FLAGS: [&str; 2] = ["disable-registration", "enable-login-with-password"];
const OIDC_LOGIN_FLAGS: [&str; 2] = ["enable-login-with-oidc", "disable-login-with-password"];

/// How a service definition combines with an existing one of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Override {
    /// Replace the existing definition.
    #[default]
    Replace,
    /// Merge field by field.
    Merge,
}

/// HTTP health check for a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Check name.
    pub name: String,
    /// URL that must answer 2xx.
    pub url: String,
    /// Seconds between checks.
    pub period: u64,
    /// Consecutive failures before the check is down.
    pub threshold: u32,
}

/// One supervised service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Service {
    /// Combine policy.
    #[serde(rename = "override")]
    pub override_policy: Override,
    /// Short description.
    pub summary: String,
    /// Start command.
    pub command: String,
    /// Working directory.
    pub working_dir: String,
    /// Services that must be started first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<String>,
    /// Environment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: EnvMap,
    /// Optional health check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
}

/// Declarative description of every managed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePlan {
    /// Short description.
    pub summary: String,
    /// Long description.
    pub description: String,
    /// Services by name.
    pub services: BTreeMap<String, Service>,
}

impl ServicePlan {
    /// Look up a service.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    /// Merge `other` into this plan: its services are added or replace
    /// existing ones; services it does not mention are kept.
    pub fn merge(&mut self, other: Self) {
        self.summary = other.summary;
        self.description = other.description;
        self.services.extend(other.services);
    }

    /// Render as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if rendering fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::serialization(e.to_string()))
    }
}

/// Local settings the plan depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSettings {
    /// Orchestration model (namespace) used in cluster hostnames.
    pub model_name: String,
    /// Name server the frontend's nginx resolves through.
    pub internal_resolver: String,
}

impl Default for PlanSettings {
    fn default() -> Self {
        Self {
            model_name: "default".to_string(),
            internal_resolver: "127.0.0.53".to_string(),
        }
    }
}

fn login_flags(bundles: &Bundles) -> [&'static str; 2] {
    if bundles.identity_provider.is_some() {
        OIDC_LOGIN_FLAGS
    } else {
        PASSWORD_LOGIN_FLAGS
    }
}

fn smtp_flag(bundles: &Bundles) -> &'static str {
    if bundles.mail_relay.is_some() {
        "enable-smtp"
    } else {
        "disable-smtp"
    }
}

/// Backend feature flags, sorted.
#[must_use]
pub fn backend_flags(bundles: &Bundles) -> Vec<&'static str> {
    BACKEND_BASE_FLAGS
        .into_iter()
        .chain(login_flags(bundles))
        .chain([smtp_flag(bundles)])
        .sorted_unstable()
        .dedup()
        .collect_vec()
}

/// Frontend feature flags, sorted.
#[must_use]
pub fn frontend_flags(bundles: &Bundles) -> Vec<&'static str> {
    FRONTEND_BASE_FLAGS
        .into_iter()
        .chain(login_flags(bundles))
        .sorted_unstable()
        .dedup()
        .collect_vec()
}

fn env<const N: usize>(pairs: [(&str, String); N]) -> EnvMap {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Build the full plan.
///
/// # Errors
///
/// Returns [`Error::NotReady`] when the report is not ready or an input the
/// report vouched for is missing.
pub fn generate(
    report: &ReadinessReport,
    bundles: &Bundles,
    secret: Option<&SharedSecret>,
    election: Option<&Election>,
    settings: &PlanSettings,
) -> Result<ServicePlan> {
    if !report.is_ready() {
        return Err(Error::not_ready(report.unsatisfied()));
    }
    let missing = |requirement: Requirement| Error::not_ready(vec![requirement]);
    let database = bundles
        .database
        .as_ref()
        .ok_or_else(|| missing(Requirement::Database))?;
    let cache = bundles
        .cache
        .as_ref()
        .ok_or_else(|| missing(Requirement::Cache))?;
    let object_storage = bundles
        .object_storage
        .as_ref()
        .ok_or_else(|| missing(Requirement::ObjectStorage))?;
    let ingress = bundles
        .ingress
        .as_ref()
        .ok_or_else(|| missing(Requirement::Ingress))?;
    let secret = secret.ok_or_else(|| missing(Requirement::Secret))?;
    let election = election.ok_or_else(|| missing(Requirement::Peers))?;

    let mut backend_env = EnvMap::new();
    backend_env.extend(database.env());
    backend_env.extend(cache.env());
    backend_env.extend(object_storage.env());
    backend_env.extend(ingress.env());
    if let Some(mail_relay) = &bundles.mail_relay {
        backend_env.extend(mail_relay.env());
    }
    if let Some(identity_provider) = &bundles.identity_provider {
        backend_env.extend(identity_provider.env());
    }
    backend_env.extend(env([
        ("JAVA_HOME", JAVA_HOME.to_string()),
        ("PENPOT_FLAGS", backend_flags(bundles).join(" ")),
        ("PENPOT_SECRET_KEY", secret.expose().to_string()),
        ("PENPOT_TELEMETRY_ENABLED", "false".to_string()),
    ]));

    let exporter_uri = format!(
        "http://{}:{EXPORTER_PORT}",
        election.runner.cluster_hostname(&settings.model_name)
    );
    let frontend_env = env([
        ("PENPOT_BACKEND_URI", BACKEND_ADDRESS.to_string()),
        ("PENPOT_EXPORTER_URI", exporter_uri),
        ("PENPOT_FLAGS", frontend_flags(bundles).join(" ")),
        (
            "PENPOT_INTERNAL_RESOLVER",
            settings.internal_resolver.clone(),
        ),
    ]);

    let mut exporter_env = cache.env();
    exporter_env.extend(env([
        ("PENPOT_PUBLIC_URI", EXPORTER_PUBLIC_URI.to_string()),
        (
            "PLAYWRIGHT_BROWSERS_PATH",
            "/opt/penpot/exporter/browsers".to_string(),
        ),
    ]));

    let services = BTreeMap::from([
        (
            BACKEND.to_string(),
            Service {
                override_policy: Override::Replace,
                summary: "penpot backend".to_string(),
                command: "/opt/penpot/backend/run.sh".to_string(),
                working_dir: "/opt/penpot/backend/".to_string(),
                after: Vec::new(),
                environment: backend_env,
                health_check: Some(HealthCheck {
                    name: format!("{BACKEND}-ready"),
                    url: format!("{BACKEND_ADDRESS}/readyz"),
                    period: 10,
                    threshold: 3,
                }),
            },
        ),
        (
            FRONTEND.to_string(),
            Service {
                override_policy: Override::Replace,
                summary: "penpot frontend".to_string(),
                command: r#"./nginx-entrypoint.sh nginx -g "daemon off;""#.to_string(),
                working_dir: "/opt/penpot/frontend/".to_string(),
                after: vec![BACKEND.to_string()],
                environment: frontend_env,
                health_check: None,
            },
        ),
        (
            EXPORTER.to_string(),
            Service {
                override_policy: Override::Replace,
                summary: "penpot exporter".to_string(),
                command: "node app.js".to_string(),
                working_dir: "/opt/penpot/exporter/".to_string(),
                after: vec![BACKEND.to_string(), FRONTEND.to_string()],
                environment: exporter_env,
                health_check: None,
            },
        ),
    ]);

    Ok(ServicePlan {
        summary: PLAN_SUMMARY.to_string(),
        description: PLAN_SUMMARY.to_string(),
        services,
    })
}
