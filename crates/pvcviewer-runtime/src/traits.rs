use crate::error::Result;
use crate::types::{Layer, Relation, ServiceInfo};
use async_trait::async_trait;
use pvcviewer_core::{ResourceKey, ResourceType, Status};
use serde_json::Value;
use std::collections::BTreeMap;

/// Trait for Kubernetes API access
///
/// Objects travel as untyped JSON because they come out of rendered
/// templates. `ApiClient` talks to a real API server; `MockCluster` keeps
/// objects in memory and counts mutations for tests.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch an object, `None` if it does not exist
    async fn get(&self, key: &ResourceKey) -> Result<Option<Value>>;

    /// Server-side apply (create or update) owned by `field_manager`
    async fn apply(&self, object: &Value, field_manager: &str) -> Result<Value>;

    /// List objects of a type across all namespaces matching every label
    async fn list(
        &self,
        resource_type: &ResourceType,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>>;

    /// Delete an object; deleting a missing object is not an error
    async fn delete(&self, key: &ResourceKey) -> Result<()>;
}

/// Trait for the workload container's process supervisor (Pebble)
#[async_trait]
pub trait WorkloadContainer: Send + Sync {
    /// Container name as declared in metadata.yaml
    fn name(&self) -> &str;

    /// Whether the supervisor answers
    async fn can_connect(&self) -> bool;

    /// Read a file, `None` if it does not exist
    async fn pull(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Write a file, creating parent directories
    async fn push(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Current combined plan
    async fn plan(&self) -> Result<Layer>;

    /// Add (combine) a layer under `label`
    async fn add_layer(&self, label: &str, layer: &Layer) -> Result<()>;

    /// Start/restart services so they match the plan
    async fn replan(&self) -> Result<()>;

    /// Status of the named services
    async fn services(&self, names: &[&str]) -> Result<Vec<ServiceInfo>>;
}

/// Trait for the Juju unit context available during a hook
#[async_trait]
pub trait UnitContext: Send + Sync {
    /// Whether this unit is the application leader
    async fn is_leader(&self) -> Result<bool>;

    /// The first relation on `endpoint`, if any
    async fn relation(&self, endpoint: &str) -> Result<Option<Relation>>;

    /// Write the local application databag of `relation` (leader only)
    async fn set_app_data(
        &self,
        relation: &Relation,
        data: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Publish the unit workload status
    async fn set_status(&self, status: &Status) -> Result<()>;
}
