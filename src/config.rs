//! Operator configuration.
//!
//! Loaded from a TOML or JSON file (chosen by extension) and then overridden
//! from `PENPOT_OPERATOR_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use penpot_reconciler::{CollectorSettings, LoopConfig, PlanSettings, ReconcilerConfig};
use penpot_workload::{DEFAULT_LIVENESS_URL, PebbleConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "PENPOT_OPERATOR_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
/// Level names accepted for compatibility, with the level they select.
const LOG_LEVEL_ALIASES: [(&str, &str); 2] = [("warning", "warn"), ("critical", "error")];
const RESOLV_CONF: &str = "/etc/resolv.conf";
const FALLBACK_RESOLVER: &str = "127.0.0.53";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file could not be parsed.
    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// A value is out of range.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Liveness polling after a plan is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessSettings {
    #[serde(default = "default_liveness_url")]
    pub url: String,
    #[serde(with = "duration_secs", default = "default_liveness_interval")]
    pub interval: Duration,
    #[serde(with = "duration_secs", default = "default_liveness_deadline")]
    pub deadline: Duration,
    #[serde(with = "duration_secs", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            url: default_liveness_url(),
            interval: default_liveness_interval(),
            deadline: default_liveness_deadline(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Trigger loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSettings {
    #[serde(with = "duration_secs", default = "default_resync_interval")]
    pub resync_interval: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            resync_interval: default_resync_interval(),
        }
    }
}

/// Service supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorSettings {
    #[serde(default = "default_pebble_bin")]
    pub pebble_bin: PathBuf,
    #[serde(default = "default_layer_label")]
    pub layer_label: String,
    #[serde(default)]
    pub pebble_dir: Option<PathBuf>,
    #[serde(with = "duration_secs", default = "default_command_timeout")]
    pub command_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            pebble_bin: default_pebble_bin(),
            layer_label: default_layer_label(),
            pebble_dir: None,
            command_timeout: default_command_timeout(),
        }
    }
}

/// Top-level operator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Application name, used in replica ids and cluster hostnames.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Namespace the application runs in.
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Ordinal of the local replica.
    #[serde(default)]
    pub unit_ordinal: u32,

    /// Overrides the mail relay's default From address.
    #[serde(default)]
    pub email_address: Option<String>,

    /// DNS resolver for the frontend's proxy. Read from resolv.conf if unset.
    #[serde(default)]
    pub internal_resolver: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub liveness: LivenessSettings,

    #[serde(rename = "loop", default)]
    pub trigger_loop: LoopSettings,

    #[serde(default)]
    pub supervisor: SupervisorSettings,

    /// Fact, secret and membership document.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            model_name: default_model_name(),
            unit_ordinal: 0,
            email_address: None,
            internal_resolver: None,
            log_level: default_log_level(),
            liveness: LivenessSettings::default(),
            trigger_loop: LoopSettings::default(),
            supervisor: SupervisorSettings::default(),
            state_file: None,
        }
    }
}

impl OperatorConfig {
    /// Load from an optional file, apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or a
    /// value is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration file. `.json` is read as JSON, anything else as
    /// TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |reason: String| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        };
        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))
        } else {
            toml::from_str(&content).map_err(|e| parse_error(e.to_string()))
        }
    }

    /// Apply `PENPOT_OPERATOR_*` overrides from a variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a numeric override does not parse.
    pub fn with_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(value) = var("APP_NAME") {
            self.app_name = value;
        }
        if let Some(value) = var("MODEL_NAME") {
            self.model_name = value;
        }
        if let Some(value) = var("UNIT_ORDINAL") {
            self.unit_ordinal = value
                .parse()
                .map_err(|e| ConfigError::invalid("unit_ordinal", format!("{value}: {e}")))?;
        }
        if let Some(value) = var("EMAIL_ADDRESS") {
            self.email_address = Some(value);
        }
        if let Some(value) = var("INTERNAL_RESOLVER") {
            self.internal_resolver = Some(value);
        }
        if let Some(value) = var("LOG_LEVEL") {
            self.log_level = value;
        }
        if let Some(value) = var("LIVENESS_URL") {
            self.liveness.url = value;
        }
        if let Some(value) = var("PEBBLE_BIN") {
            self.supervisor.pebble_bin = PathBuf::from(value);
        }
        if let Some(value) = var("STATE_FILE") {
            self.state_file = Some(PathBuf::from(value));
        }
        Ok(self)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tracing_level().is_none() {
            return Err(ConfigError::invalid(
                "log_level",
                format!(
                    "'{}' is not one of {}, warning, critical",
                    self.log_level,
                    LOG_LEVELS.join(", ")
                ),
            ));
        }
        if self.app_name.is_empty() {
            return Err(ConfigError::invalid("app_name", "must not be empty"));
        }
        if self.liveness.interval.is_zero() {
            return Err(ConfigError::invalid("liveness.interval", "must be positive"));
        }
        if self.trigger_loop.resync_interval.is_zero() {
            return Err(ConfigError::invalid("loop.resync_interval", "must be positive"));
        }
        self.liveness_url()?;
        Ok(())
    }

    /// Tracing level selected by `log_level`, with `warning` and `critical`
    /// mapped onto `warn` and `error`.
    #[must_use]
    pub fn tracing_level(&self) -> Option<&'static str> {
        let level = self.log_level.to_lowercase();
        LOG_LEVELS
            .into_iter()
            .find(|known| *known == level)
            .or_else(|| {
                LOG_LEVEL_ALIASES
                    .into_iter()
                    .find(|(alias, _)| *alias == level)
                    .map(|(_, known)| known)
            })
    }

    /// Parsed liveness URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the URL does not parse.
    pub fn liveness_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.liveness.url)
            .map_err(|e| ConfigError::invalid("liveness.url", format!("{}: {e}", self.liveness.url)))
    }

    /// Configured resolver, else the first nameserver in resolv.conf.
    #[must_use]
    pub fn resolver(&self) -> String {
        self.internal_resolver.clone().unwrap_or_else(|| {
            std::fs::read_to_string(RESOLV_CONF)
                .ok()
                .and_then(|content| first_nameserver(&content))
                .unwrap_or_else(|| FALLBACK_RESOLVER.to_string())
        })
    }

    /// Engine configuration derived from this one.
    #[must_use]
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            collectors: CollectorSettings {
                email_address: self.email_address.clone(),
            },
            plan: PlanSettings {
                model_name: self.model_name.clone(),
                internal_resolver: self.resolver(),
            },
            liveness_interval: self.liveness.interval,
            liveness_deadline: self.liveness.deadline,
        }
    }

    /// Trigger loop configuration.
    #[must_use]
    pub const fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            resync_interval: self.trigger_loop.resync_interval,
        }
    }

    /// Pebble CLI configuration.
    #[must_use]
    pub fn pebble_config(&self) -> PebbleConfig {
        let config = PebbleConfig::default()
            .with_bin(self.supervisor.pebble_bin.clone())
            .with_layer_label(self.supervisor.layer_label.clone())
            .with_command_timeout(self.supervisor.command_timeout);
        match &self.supervisor.pebble_dir {
            Some(dir) => config.with_pebble_dir(dir.clone()),
            None => config,
        }
    }
}

/// First `nameserver` entry of a resolv.conf document.
fn first_nameserver(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let mut fields = line.split_whitespace();
            (fields.next() == Some("nameserver"))
                .then(|| fields.next().map(str::to_string))
                .flatten()
        })
}

fn default_app_name() -> String {
    "penpot".to_string()
}

fn default_model_name() -> String {
    "default".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_liveness_url() -> String {
    DEFAULT_LIVENESS_URL.to_string()
}

const fn default_liveness_interval() -> Duration {
    Duration::from_secs(5)
}

const fn default_liveness_deadline() -> Duration {
    Duration::from_secs(300)
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_resync_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_pebble_bin() -> PathBuf {
    PathBuf::from("pebble")
}

fn default_layer_label() -> String {
    "penpot".to_string()
}

const fn default_command_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
