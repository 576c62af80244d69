//! Pebble layer rendering.
//!
//! Pebble keeps health checks beside services rather than inside them, so a
//! [`ServicePlan`] is split into a `services` map and a `checks` map.

use std::collections::BTreeMap;

use penpot_reconciler::plan::Override;
use penpot_reconciler::{EnvMap, ServicePlan};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One service entry of a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LayerService {
    #[serde(rename = "override")]
    pub override_policy: Override,
    pub summary: String,
    pub command: String,
    pub working_dir: String,
    /// Services are started explicitly by the reconciler, never on replan.
    pub startup: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: EnvMap,
}

/// HTTP probe of a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProbe {
    pub url: String,
}

/// One check entry of a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerCheck {
    #[serde(rename = "override")]
    pub override_policy: Override,
    pub level: String,
    pub period: String,
    pub threshold: u32,
    pub http: HttpProbe,
}

/// A Pebble configuration layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub summary: String,
    pub description: String,
    pub services: BTreeMap<String, LayerService>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, LayerCheck>,
}

impl Layer {
    /// Render as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if rendering fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::serialization(e.to_string()))
    }
}

impl From<&ServicePlan> for Layer {
    fn from(plan: &ServicePlan) -> Self {
        let services = plan
            .services
            .iter()
            .map(|(name, service)| {
                (
                    name.clone(),
                    LayerService {
                        override_policy: service.override_policy,
                        summary: service.summary.clone(),
                        command: service.command.clone(),
                        working_dir: service.working_dir.clone(),
                        startup: "disabled".to_string(),
                        after: service.after.clone(),
                        environment: service.environment.clone(),
                    },
                )
            })
            .collect();
        let checks = plan
            .services
            .values()
            .filter_map(|service| service.health_check.as_ref())
            .map(|check| {
                (
                    check.name.clone(),
                    LayerCheck {
                        override_policy: Override::Replace,
                        level: "ready".to_string(),
                        period: format!("{}s", check.period),
                        threshold: check.threshold,
                        http: HttpProbe {
                            url: check.url.clone(),
                        },
                    },
                )
            })
            .collect();
        Self {
            summary: plan.summary.clone(),
            description: plan.description.clone(),
            services,
            checks,
        }
    }
}
