use crate::error::{ReconcileError, Result};
use pvcviewer_core::{GroupVersionKind, ResourceKey, ResourceType};
use pvcviewer_runtime::ClusterClient;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

pub const CREATED_BY_LABEL: &str = "app.juju.is/created-by";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const SCOPE_LABEL: &str = "kubernetes-resource-handler-scope";

/// Labels stamped on every object a handler owns
pub fn ownership_labels(app_name: &str, model_name: &str, scope: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(CREATED_BY_LABEL.to_string(), app_name.to_string());
    labels.insert(
        INSTANCE_LABEL.to_string(),
        format!("{}-{}", app_name, model_name),
    );
    labels.insert(SCOPE_LABEL.to_string(), scope.to_string());
    labels
}

/// Whether `live` contains every field of `desired`.
///
/// Objects may carry extra keys (server defaults, status, other managers).
/// Every desired array element must be contained by some live element; live
/// arrays may hold extra entries owned by another field manager, such as the
/// placeholder port Juju puts on the application Service. An empty desired
/// array only matches an empty live one.
pub fn contains_subset(live: &Value, desired: &Value) -> bool {
    match (live, desired) {
        (Value::Object(live), Value::Object(desired)) => desired.iter().all(|(key, value)| {
            live.get(key)
                .is_some_and(|live_value| contains_subset(live_value, value))
        }),
        (Value::Array(live), Value::Array(desired)) if desired.is_empty() => live.is_empty(),
        (Value::Array(live), Value::Array(desired)) => desired
            .iter()
            .all(|d| live.iter().any(|l| contains_subset(l, d))),
        (Value::Number(live), Value::Number(desired)) => live.as_f64() == desired.as_f64(),
        _ => live == desired,
    }
}

/// A desired object together with its key
#[derive(Debug, Clone)]
pub struct DesiredObject {
    pub key: ResourceKey,
    pub object: Value,
}

/// Counts of the mutating calls made by `ResourceHandler::apply`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub applied: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

/// Applies a set of objects under a label-scoped ownership and prunes what
/// it owns but no longer wants.
pub struct ResourceHandler {
    owner: String,
    cluster: Arc<dyn ClusterClient>,
    labels: BTreeMap<String, String>,
    field_manager: String,
    namespace: String,
    resource_types: Vec<ResourceType>,
}

impl ResourceHandler {
    pub fn new(
        owner: impl Into<String>,
        cluster: Arc<dyn ClusterClient>,
        labels: BTreeMap<String, String>,
        field_manager: impl Into<String>,
        namespace: impl Into<String>,
        resource_types: Vec<ResourceType>,
    ) -> Self {
        Self {
            owner: owner.into(),
            cluster,
            labels,
            field_manager: field_manager.into(),
            namespace: namespace.into(),
            resource_types,
        }
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    fn resource_type(&self, gvk: &GroupVersionKind) -> Option<&ResourceType> {
        self.resource_types.iter().find(|t| &t.gvk == gvk)
    }

    /// Check documents against the allow-list, stamp ownership labels and
    /// default the namespace of namespaced objects.
    pub fn prepare(&self, documents: Vec<Value>) -> Result<Vec<DesiredObject>> {
        let mut desired = Vec::with_capacity(documents.len());

        for mut object in documents {
            let key = ResourceKey::from_object(&object)?;
            let namespaced = match self.resource_type(&key.gvk) {
                Some(t) => t.namespaced,
                None => {
                    return Err(ReconcileError::disallowed_resource(
                        &self.owner,
                        key.gvk.to_string(),
                        &key.name,
                    ))
                }
            };

            let metadata = object
                .as_object_mut()
                .and_then(|o| o.get_mut("metadata"))
                .and_then(Value::as_object_mut)
                .ok_or_else(|| {
                    pvcviewer_core::PvcViewerError::invalid_resource(
                        format!("{} has no metadata", key),
                        "Every manifest needs a metadata mapping",
                    )
                })?;

            if namespaced {
                if !metadata.contains_key("namespace") {
                    metadata.insert(
                        "namespace".to_string(),
                        Value::String(self.namespace.clone()),
                    );
                }
            } else {
                metadata.remove("namespace");
            }

            let labels = metadata
                .entry("labels")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(labels) = labels.as_object_mut() {
                for (k, v) in &self.labels {
                    labels.insert(k.clone(), Value::String(v.clone()));
                }
            }

            let key = ResourceKey::from_object(&object)?;
            desired.push(DesiredObject { key, object });
        }

        Ok(desired)
    }

    /// Objects that are missing from the cluster or differ from `desired`
    pub async fn drift(&self, desired: &[DesiredObject]) -> Result<Vec<ResourceKey>> {
        let mut drifted = Vec::new();
        for item in desired {
            let up_to_date = match self.cluster.get(&item.key).await? {
                Some(live) => contains_subset(&live, &item.object),
                None => false,
            };
            if !up_to_date {
                drifted.push(item.key.clone());
            }
        }
        Ok(drifted)
    }

    /// Apply every object that is missing or differs, then delete owned
    /// objects that are not in `desired`.
    pub async fn apply(&self, desired: &[DesiredObject]) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();

        for item in desired {
            let live = self.cluster.get(&item.key).await?;
            if live.is_some_and(|live| contains_subset(&live, &item.object)) {
                debug!("{} is up to date", item.key);
                outcome.unchanged += 1;
                continue;
            }

            self.cluster.apply(&item.object, &self.field_manager).await?;
            info!("Applied {}", item.key);
            outcome.applied += 1;
        }

        let wanted: BTreeSet<&ResourceKey> = desired.iter().map(|d| &d.key).collect();
        outcome.deleted = self.prune(|key| !wanted.contains(key)).await?;

        Ok(outcome)
    }

    /// Delete every object carrying the ownership labels
    pub async fn delete_all(&self) -> Result<usize> {
        self.prune(|_| true).await
    }

    async fn prune(&self, mut should_delete: impl FnMut(&ResourceKey) -> bool) -> Result<usize> {
        let mut deleted = 0;

        for resource_type in &self.resource_types {
            for object in self.cluster.list(resource_type, &self.labels).await? {
                let key = ResourceKey::from_object(&object)?;
                if should_delete(&key) {
                    self.cluster.delete(&key).await?;
                    info!("Deleted {}", key);
                    deleted += 1;
                }
            }
        }

        Ok(deleted)
    }
}
