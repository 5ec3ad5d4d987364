use crate::component::Component;
use crate::error::{ReconcileError, Result};
use crate::metrics::METRICS_ENDPOINT_RELATION;
use crate::resources::{ownership_labels, DesiredObject, ResourceHandler};
use async_trait::async_trait;
use pvcviewer_core::{ResourceType, Status};
use pvcviewer_runtime::{ClusterClient, Relation, UnitContext};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SERVICE_MESH_RELATION: &str = "service-mesh";
pub const GATEWAY_METADATA_RELATION: &str = "gateway-metadata";
pub const DEFAULT_GATEWAY_NAMESPACE: &str = "kubeflow";
pub const DEFAULT_GATEWAY_NAME: &str = "kubeflow-gateway";

/// Gateway the workload routes through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayMetadata {
    pub namespace: String,
    pub gateway_name: String,
}

impl Default for GatewayMetadata {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_GATEWAY_NAMESPACE.to_string(),
            gateway_name: DEFAULT_GATEWAY_NAME.to_string(),
        }
    }
}

impl GatewayMetadata {
    /// Read the remote application data; `None` until both fields are set.
    ///
    /// Values may be plain or JSON-encoded strings.
    pub fn from_relation(relation: &Relation) -> Option<Self> {
        let field = |key: &str| {
            let raw = relation.remote_app_data.get(key)?;
            let value = match serde_json::from_str::<Value>(raw) {
                Ok(Value::String(s)) => s,
                _ => raw.clone(),
            };
            Some(value).filter(|v| !v.trim().is_empty())
        };

        Some(Self {
            namespace: field("namespace")?,
            gateway_name: field("gateway_name")?,
        })
    }
}

/// The Istio policy letting anything reach the workload, so the API server
/// can call the webhook whatever the mesh enforces.
pub fn allow_all_policy(app_name: &str, namespace: &str) -> Value {
    json!({
        "apiVersion": "security.istio.io/v1",
        "kind": "AuthorizationPolicy",
        "metadata": {
            "name": format!("{}-allow-all", app_name),
            "namespace": namespace,
        },
        "spec": {
            "selector": {
                "matchLabels": {"app.kubernetes.io/name": app_name},
            },
            "rules": [{}],
        },
    })
}

/// Mesh access requests this charm needs, in the `service-mesh` databag
/// format.
fn unit_policy_request() -> BTreeMap<String, String> {
    let policies = json!([{"relation": METRICS_ENDPOINT_RELATION, "endpoints": []}]);
    let mut data = BTreeMap::new();
    data.insert("policies".to_string(), policies.to_string());
    data
}

#[derive(Debug, Clone)]
pub struct ServiceMeshConfig {
    pub name: String,
    pub app_name: String,
    pub model_name: String,
    pub service_mesh_relation: String,
    pub gateway_metadata_relation: String,
}

impl ServiceMeshConfig {
    pub fn new(app_name: &str, model_name: &str) -> Self {
        Self {
            name: "service-mesh".to_string(),
            app_name: app_name.to_string(),
            model_name: model_name.to_string(),
            service_mesh_relation: SERVICE_MESH_RELATION.to_string(),
            gateway_metadata_relation: GATEWAY_METADATA_RELATION.to_string(),
        }
    }
}

/// Mesh integration: routing mode, gateway, and the allow-all policy
pub struct ServiceMesh {
    config: ServiceMeshConfig,
    unit: Arc<dyn UnitContext>,
    policies: ResourceHandler,
}

impl ServiceMesh {
    pub fn new(
        config: ServiceMeshConfig,
        unit: Arc<dyn UnitContext>,
        cluster: Arc<dyn ClusterClient>,
    ) -> Self {
        let scope = format!("{}-allow-all", config.app_name);
        let policies = ResourceHandler::new(
            &config.name,
            cluster,
            ownership_labels(&config.app_name, &config.model_name, &scope),
            format!("{}-{}", config.app_name, config.model_name),
            &config.model_name,
            vec![ResourceType::namespaced(
                "security.istio.io",
                "v1",
                "AuthorizationPolicy",
            )],
        );

        Self {
            config,
            unit,
            policies,
        }
    }

    /// Ambient mode is selected by relating to a gateway-metadata provider
    pub async fn is_ambient_mesh_enabled(&self) -> Result<bool> {
        Ok(self
            .unit
            .relation(&self.config.gateway_metadata_relation)
            .await?
            .is_some())
    }

    /// Gateway from the relation, or the sidecar defaults
    pub async fn gateway_metadata(&self) -> Result<GatewayMetadata> {
        let relation = self
            .unit
            .relation(&self.config.gateway_metadata_relation)
            .await?;

        match relation.as_ref().and_then(GatewayMetadata::from_relation) {
            Some(metadata) => {
                debug!(
                    "Gateway from relation: {}/{}",
                    metadata.namespace, metadata.gateway_name
                );
                Ok(metadata)
            }
            None => {
                debug!(
                    "No {} data, using default gateway",
                    self.config.gateway_metadata_relation
                );
                Ok(GatewayMetadata::default())
            }
        }
    }

    pub async fn gateway_name(&self) -> Result<String> {
        Ok(self.gateway_metadata().await?.gateway_name)
    }

    pub async fn gateway_namespace(&self) -> Result<String> {
        Ok(self.gateway_metadata().await?.namespace)
    }

    fn desired_policies(&self) -> Result<Vec<DesiredObject>> {
        self.policies.prepare(vec![allow_all_policy(
            &self.config.app_name,
            &self.config.model_name,
        )])
    }
}

#[async_trait]
impl Component for ServiceMesh {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn reconcile(&self) -> Result<()> {
        let desired = self.desired_policies()?;
        let outcome = self.policies.apply(&desired).await?;
        debug!(
            "Allow-all policy: {} applied, {} deleted",
            outcome.applied, outcome.deleted
        );

        if let Some(relation) = self
            .unit
            .relation(&self.config.service_mesh_relation)
            .await?
        {
            self.unit
                .set_app_data(&relation, &unit_policy_request())
                .await?;
            info!("Requested mesh access for {}", METRICS_ENDPOINT_RELATION);
        }

        Ok(())
    }

    async fn status(&self) -> Status {
        let relations = async {
            let mesh = self
                .unit
                .relation(&self.config.service_mesh_relation)
                .await?;
            let gateway = self
                .unit
                .relation(&self.config.gateway_metadata_relation)
                .await?;
            Ok::<_, pvcviewer_runtime::RuntimeError>((mesh, gateway))
        };

        match relations.await {
            Ok((Some(_), None)) => {
                Status::blocked("Service mesh relation present without gateway metadata relation")
            }
            Ok((_, Some(gateway))) if GatewayMetadata::from_relation(&gateway).is_none() => {
                Status::waiting("Waiting for gateway metadata relation data")
            }
            Ok(_) => Status::Active,
            Err(e) => {
                warn!("Failed to read mesh relations: {}", e);
                ReconcileError::from(e).status()
            }
        }
    }

    async fn remove(&self) -> Result<()> {
        let outcome = self.policies.apply(&[]).await?;
        info!("Removed {} mesh policies", outcome.deleted);
        Ok(())
    }
}
