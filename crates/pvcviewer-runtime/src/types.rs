use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A relation as seen from the local unit during a hook
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Relation {
    /// Relation id, e.g. "gateway-metadata:7"
    pub id: String,
    /// Endpoint name, e.g. "gateway-metadata"
    pub name: String,
    /// Remote application, once known
    pub remote_app: Option<String>,
    /// Remote application databag
    pub remote_app_data: BTreeMap<String, String>,
}

impl Relation {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_remote_app(mut self, app: impl Into<String>) -> Self {
        self.remote_app = Some(app.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.remote_app_data.insert(key.into(), value.into());
        self
    }
}

/// Pebble service startup policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Startup {
    Enabled,
    Disabled,
}

impl fmt::Display for Startup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Startup::Enabled => write!(f, "enabled"),
            Startup::Disabled => write!(f, "disabled"),
        }
    }
}

/// A service entry of a Pebble layer
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceSpec {
    #[serde(rename = "override", default, skip_serializing_if = "Option::is_none")]
    pub override_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup: Option<Startup>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

impl ServiceSpec {
    /// Whether the running definition already matches this one.
    ///
    /// Only the fields that change the process are compared; `override`
    /// and `summary` are layer bookkeeping.
    pub fn matches(&self, other: &ServiceSpec) -> bool {
        self.command == other.command
            && self.startup == other.startup
            && self.environment == other.environment
    }
}

/// A Pebble configuration layer (also the shape of the combined plan)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Layer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,
}

impl Layer {
    /// Combine `other` on top of this layer the way Pebble does for
    /// `override: replace` services.
    pub fn combine(&mut self, other: &Layer) {
        if other.summary.is_some() {
            self.summary = other.summary.clone();
        }
        if other.description.is_some() {
            self.description = other.description.clone();
        }
        for (name, service) in &other.services {
            self.services.insert(name.clone(), service.clone());
        }
    }
}

/// Current state of a Pebble service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Active,
    Inactive,
    Backoff,
    Error,
    #[serde(other)]
    Unknown,
}

/// Service status as reported by Pebble
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default)]
    pub startup: String,
    pub current: ServiceState,
}

impl ServiceInfo {
    pub fn is_running(&self) -> bool {
        self.current == ServiceState::Active
    }
}
