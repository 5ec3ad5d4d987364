use crate::certs::CertificateBundle;
use crate::component::Component;
use crate::error::{ReconcileError, Result};
use crate::mesh::ServiceMesh;
use async_trait::async_trait;
use pvcviewer_core::Status;
use pvcviewer_runtime::{Layer, ServiceSpec, Startup, WorkloadContainer};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration for the workload service component
#[derive(Debug, Clone)]
pub struct WorkloadServiceConfig {
    pub name: String,
    pub service_name: String,
    pub command: String,
    /// Directory the manager reads its webhook serving certificates from
    pub certs_dir: String,
}

impl Default for WorkloadServiceConfig {
    fn default() -> Self {
        Self {
            name: "pvc-viewer-pebble-service".to_string(),
            service_name: "pvcviewer-operator".to_string(),
            command: "/manager --leader-elect".to_string(),
            certs_dir: "/tmp/k8s-webhook-server/serving-certs".to_string(),
        }
    }
}

/// Desired process definition of the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadPlan {
    pub command: String,
    pub environment: BTreeMap<String, String>,
    pub startup: Startup,
}

impl WorkloadPlan {
    pub fn new(command: &str, ambient: bool, gateway_name: &str, gateway_namespace: &str) -> Self {
        let mut environment = BTreeMap::new();
        environment.insert("USE_ISTIO".to_string(), (!ambient).to_string());
        environment.insert("USE_GATEWAY_API".to_string(), ambient.to_string());
        environment.insert("GATEWAY_NAME".to_string(), gateway_name.to_string());
        environment.insert(
            "GATEWAY_NAMESPACE".to_string(),
            gateway_namespace.to_string(),
        );

        Self {
            command: command.to_string(),
            environment,
            startup: Startup::Enabled,
        }
    }

    pub fn service_spec(&self) -> ServiceSpec {
        ServiceSpec {
            override_: Some("replace".to_string()),
            summary: Some("Entry point for pvcviewer image".to_string()),
            command: Some(self.command.clone()),
            startup: Some(self.startup),
            environment: self.environment.clone(),
        }
    }

    pub fn layer(&self, service_name: &str) -> Layer {
        let mut services = BTreeMap::new();
        services.insert(service_name.to_string(), self.service_spec());
        Layer {
            summary: Some("pvcviewer layer".to_string()),
            description: Some("Pebble config layer for pvcviewer".to_string()),
            services,
        }
    }
}

/// Runs the manager in the workload container with the current mesh settings
pub struct WorkloadService {
    config: WorkloadServiceConfig,
    container: Arc<dyn WorkloadContainer>,
    mesh: Arc<ServiceMesh>,
    certs: CertificateBundle,
}

impl WorkloadService {
    pub fn new(
        config: WorkloadServiceConfig,
        container: Arc<dyn WorkloadContainer>,
        mesh: Arc<ServiceMesh>,
        certs: CertificateBundle,
    ) -> Self {
        Self {
            config,
            container,
            mesh,
            certs,
        }
    }

    /// Compute the plan from the current relation state
    pub async fn plan(&self) -> Result<WorkloadPlan> {
        let ambient = self.mesh.is_ambient_mesh_enabled().await?;
        let gateway = self.mesh.gateway_metadata().await?;
        Ok(WorkloadPlan::new(
            &self.config.command,
            ambient,
            &gateway.gateway_name,
            &gateway.namespace,
        ))
    }

    fn cert_files(&self) -> [(String, &str); 3] {
        let dir = self.config.certs_dir.trim_end_matches('/');
        [
            (format!("{}/tls.key", dir), self.certs.key.as_str()),
            (format!("{}/tls.crt", dir), self.certs.cert.as_str()),
            (format!("{}/tls.ca", dir), self.certs.ca.as_str()),
        ]
    }

    async fn push_certificates(&self) -> Result<()> {
        for (path, content) in self.cert_files() {
            let current = self.container.pull(&path).await?;
            if current.as_deref() == Some(content.as_bytes()) {
                continue;
            }
            self.container.push(&path, content.as_bytes()).await?;
            info!("Wrote {} to {}", path, self.container.name());
        }
        Ok(())
    }

    async fn is_running(&self) -> Result<bool> {
        let services = self
            .container
            .services(&[self.config.service_name.as_str()])
            .await?;
        Ok(services.iter().any(|s| s.is_running()))
    }
}

#[async_trait]
impl Component for WorkloadService {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn reconcile(&self) -> Result<()> {
        if !self.container.can_connect().await {
            info!(
                "Container {} is not ready, deferring",
                self.container.name()
            );
            return Ok(());
        }

        self.push_certificates().await?;

        let plan = self.plan().await?;
        let desired = plan.service_spec();
        let current = self.container.plan().await?;
        let layer_changed = current
            .services
            .get(&self.config.service_name)
            .map_or(true, |service| !service.matches(&desired));

        if layer_changed {
            self.container
                .add_layer(&self.config.service_name, &plan.layer(&self.config.service_name))
                .await?;
            info!(
                "Updated layer {} (USE_ISTIO={}, GATEWAY={}/{})",
                self.config.service_name,
                plan.environment["USE_ISTIO"],
                plan.environment["GATEWAY_NAMESPACE"],
                plan.environment["GATEWAY_NAME"]
            );
        }

        if layer_changed || !self.is_running().await? {
            self.container.replan().await?;
            info!("Replanned {}", self.container.name());
        } else {
            debug!("{} already running with the current plan", self.config.service_name);
        }

        Ok(())
    }

    async fn status(&self) -> Status {
        if !self.container.can_connect().await {
            return Status::waiting(format!(
                "Waiting for Pebble to be ready in {}",
                self.container.name()
            ));
        }

        match self.is_running().await {
            Ok(true) => Status::Active,
            Ok(false) => Status::waiting(format!(
                "Service {} is not running",
                self.config.service_name
            )),
            Err(e) => ReconcileError::from(e).status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{ServiceMeshConfig, GATEWAY_METADATA_RELATION};
    use pvcviewer_runtime::{MockCluster, MockContainer, MockUnit, Relation, ServiceState};

    fn bundle() -> CertificateBundle {
        CertificateBundle {
            cert: "server-cert".to_string(),
            key: "server-key".to_string(),
            ca: "ca-cert".to_string(),
        }
    }

    fn workload(unit: Arc<MockUnit>, container: Arc<MockContainer>) -> WorkloadService {
        let mesh = Arc::new(ServiceMesh::new(
            ServiceMeshConfig::new("pvcviewer-operator", "kubeflow"),
            unit,
            Arc::new(MockCluster::new()),
        ));
        WorkloadService::new(WorkloadServiceConfig::default(), container, mesh, bundle())
    }

    #[test]
    fn test_environment_flags_are_negations() {
        for ambient in [true, false] {
            let plan = WorkloadPlan::new("/manager", ambient, "gw", "ns");
            assert_ne!(plan.environment["USE_ISTIO"], plan.environment["USE_GATEWAY_API"]);
            assert_eq!(plan.environment["USE_GATEWAY_API"], ambient.to_string());
        }
    }

    #[test]
    fn test_layer_shape() {
        let layer = WorkloadPlan::new("/manager --leader-elect", false, "gw", "ns")
            .layer("pvcviewer-operator");
        assert_eq!(layer.summary.as_deref(), Some("pvcviewer layer"));
        let service = &layer.services["pvcviewer-operator"];
        assert_eq!(service.override_.as_deref(), Some("replace"));
        assert_eq!(service.startup, Some(Startup::Enabled));
    }

    #[tokio::test]
    async fn test_reconcile_writes_certs_and_starts_service() {
        let container = Arc::new(MockContainer::new("pvcviewer-operator"));
        let w = workload(Arc::new(MockUnit::new(true)), container.clone());

        w.reconcile().await.unwrap();
        assert_eq!(
            container.file("/tmp/k8s-webhook-server/serving-certs/tls.key").unwrap(),
            b"server-key"
        );
        assert_eq!(
            container.file("/tmp/k8s-webhook-server/serving-certs/tls.ca").unwrap(),
            b"ca-cert"
        );

        let plan = container.current_plan();
        let env = &plan.services["pvcviewer-operator"].environment;
        assert_eq!(env["USE_ISTIO"], "true");
        assert_eq!(env["USE_GATEWAY_API"], "false");
        assert_eq!(env["GATEWAY_NAME"], "kubeflow-gateway");
        assert_eq!(env["GATEWAY_NAMESPACE"], "kubeflow");
        assert_eq!(w.status().await, Status::Active);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let container = Arc::new(MockContainer::new("pvcviewer-operator"));
        let w = workload(Arc::new(MockUnit::new(true)), container.clone());

        w.reconcile().await.unwrap();
        let counts = (container.push_count(), container.layer_count(), container.replan_count());
        w.reconcile().await.unwrap();
        assert_eq!(
            (container.push_count(), container.layer_count(), container.replan_count()),
            counts
        );
        assert_eq!(counts, (3, 1, 1));
    }

    #[tokio::test]
    async fn test_relation_change_updates_layer() {
        let unit = Arc::new(MockUnit::new(true));
        let container = Arc::new(MockContainer::new("pvcviewer-operator"));
        let w = workload(unit.clone(), container.clone());
        w.reconcile().await.unwrap();

        unit.add_relation(
            Relation::new("gateway-metadata:3", GATEWAY_METADATA_RELATION)
                .with_remote_app("istio-ingress-k8s")
                .with_data("namespace", "istio-system")
                .with_data("gateway_name", "istio-ingress"),
        );
        w.reconcile().await.unwrap();

        let plan = container.current_plan();
        let env = &plan.services["pvcviewer-operator"].environment;
        assert_eq!(env["USE_ISTIO"], "false");
        assert_eq!(env["USE_GATEWAY_API"], "true");
        assert_eq!(env["GATEWAY_NAME"], "istio-ingress");
        assert_eq!(container.layer_count(), 2);
        assert_eq!(container.replan_count(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_container_waits() {
        let container = Arc::new(MockContainer::new("pvcviewer-operator"));
        container.set_can_connect(false);
        let w = workload(Arc::new(MockUnit::new(true)), container.clone());

        w.reconcile().await.unwrap();
        assert_eq!(container.push_count(), 0);
        assert!(matches!(w.status().await, Status::Waiting(_)));
    }

    #[tokio::test]
    async fn test_stopped_service_is_replanned() {
        let container = Arc::new(MockContainer::new("pvcviewer-operator"));
        let w = workload(Arc::new(MockUnit::new(true)), container.clone());
        container.set_service_state("pvcviewer-operator", ServiceState::Backoff);

        w.reconcile().await.unwrap();
        assert!(matches!(w.status().await, Status::Waiting(_)));

        w.reconcile().await.unwrap();
        assert_eq!(container.layer_count(), 1);
        assert_eq!(container.replan_count(), 2);
    }
}
