use crate::certs::CertificateBundle;
use crate::chain::{ChainReport, ReconcilerChain};
use crate::component::Component;
use crate::error::Result;
use crate::kubernetes::{KubernetesResources, KubernetesResourcesConfig};
use crate::leadership::{LeadershipGate, LEADERSHIP_GATE};
use crate::mesh::{ServiceMesh, ServiceMeshConfig};
use crate::metrics::MetricsEndpointProvider;
use crate::templates::{pvcviewer_templates, ManifestContext};
use crate::workload::{WorkloadService, WorkloadServiceConfig};
use pvcviewer_core::{EventKind, Status};
use pvcviewer_runtime::{ClusterClient, UnitContext, WorkloadContainer};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identity of the deployed application
#[derive(Debug, Clone)]
pub struct CharmConfig {
    pub app_name: String,
    /// Juju model name, also the Kubernetes namespace
    pub model_name: String,
    pub model_uuid: Option<String>,
}

/// Collaborators the charm drives
pub struct Collaborators {
    pub cluster: Arc<dyn ClusterClient>,
    pub container: Arc<dyn WorkloadContainer>,
    pub unit: Arc<dyn UnitContext>,
}

/// The pvcviewer charm: one reconciler chain plus the metrics endpoint
pub struct Charm {
    chain: ReconcilerChain,
    unit: Arc<dyn UnitContext>,
    metrics: MetricsEndpointProvider,
}

impl Charm {
    pub fn new(
        chain: ReconcilerChain,
        unit: Arc<dyn UnitContext>,
        metrics: MetricsEndpointProvider,
    ) -> Self {
        Self {
            chain,
            unit,
            metrics,
        }
    }

    /// Assemble the chain: leadership-gate, kubernetes:auth-and-crds,
    /// service-mesh, pvc-viewer-pebble-service
    pub fn build(
        config: &CharmConfig,
        certs: CertificateBundle,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let Collaborators {
            cluster,
            container,
            unit,
        } = collaborators;

        let mut chain = ReconcilerChain::new();

        chain.register(Arc::new(LeadershipGate::new(unit.clone())), &[])?;

        let k8s_config =
            KubernetesResourcesConfig::new(&config.app_name, &config.model_name, "auth-and-crds");
        let k8s_name = k8s_config.name.clone();
        let context = {
            let app_name = config.app_name.clone();
            let namespace = config.model_name.clone();
            let certs = certs.clone();
            Box::new(move || ManifestContext::new(&app_name, &namespace, &certs))
        };
        let k8s = KubernetesResources::new(
            k8s_config,
            &pvcviewer_templates(),
            context,
            cluster.clone(),
        )?;
        chain.register(Arc::new(k8s), &[LEADERSHIP_GATE])?;

        let mesh = Arc::new(ServiceMesh::new(
            ServiceMeshConfig::new(&config.app_name, &config.model_name),
            unit.clone(),
            cluster,
        ));
        chain.register(mesh.clone(), &[k8s_name.as_str()])?;
        let mesh_name = mesh.name().to_string();

        let workload = WorkloadService::new(
            WorkloadServiceConfig::default(),
            container,
            mesh,
            certs,
        );
        chain.register(Arc::new(workload), &[mesh_name.as_str()])?;

        let metrics = MetricsEndpointProvider::new(
            unit.clone(),
            &config.app_name,
            &config.model_name,
            config.model_uuid.clone(),
        );

        Ok(Self::new(chain, unit, metrics))
    }

    pub fn chain(&self) -> &ReconcilerChain {
        &self.chain
    }

    /// Handle one Juju event.
    ///
    /// Returns the published unit status, or `None` for events that do not
    /// reconcile (`remove`, `stop`). Only the leader removes cluster
    /// resources; other units leave when scaled down while the leader keeps
    /// serving them.
    pub async fn dispatch(&self, event: &EventKind) -> Result<Option<Status>> {
        info!("Handling {}", event);

        if *event == EventKind::Remove {
            match self.unit.is_leader().await {
                Ok(true) => {}
                Ok(false) => {
                    info!("Not leader, leaving cluster resources in place");
                    return Ok(None);
                }
                Err(e) => {
                    warn!("Cannot determine leadership, skipping cleanup: {}", e);
                    return Ok(None);
                }
            }
            let failures = self.chain.remove().await;
            if !failures.is_empty() {
                warn!("{} components failed to clean up", failures.len());
            }
            return Ok(None);
        }
        if !event.triggers_reconcile() {
            debug!("Nothing to do for {}", event);
            return Ok(None);
        }

        let report: ChainReport = self.chain.run().await;
        let status = report.overall();

        if let Err(e) = self.metrics.publish().await {
            warn!("Failed to publish scrape job: {}", e);
        }

        self.unit.set_status(&status).await?;
        info!("Unit status: {}", status);
        Ok(Some(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{GATEWAY_METADATA_RELATION, SERVICE_MESH_RELATION};
    use crate::metrics::METRICS_ENDPOINT_RELATION;
    use pvcviewer_core::RelationChange;
    use pvcviewer_runtime::{MockCluster, MockContainer, MockUnit, Relation};

    struct Harness {
        cluster: Arc<MockCluster>,
        container: Arc<MockContainer>,
        unit: Arc<MockUnit>,
        charm: Charm,
    }

    fn harness(leader: bool) -> Harness {
        let cluster = Arc::new(MockCluster::new());
        let container = Arc::new(MockContainer::new("pvcviewer-operator"));
        let unit = Arc::new(MockUnit::new(leader));
        let certs = CertificateBundle {
            cert: "cert".to_string(),
            key: "key".to_string(),
            ca: "ca".to_string(),
        };
        let config = CharmConfig {
            app_name: "pvcviewer-operator".to_string(),
            model_name: "kubeflow".to_string(),
            model_uuid: None,
        };
        let charm = Charm::build(
            &config,
            certs,
            Collaborators {
                cluster: cluster.clone(),
                container: container.clone(),
                unit: unit.clone(),
            },
        )
        .unwrap();

        Harness {
            cluster,
            container,
            unit,
            charm,
        }
    }

    fn relation_changed(relation: &str) -> EventKind {
        EventKind::Relation {
            relation: relation.to_string(),
            change: RelationChange::Changed,
        }
    }

    #[test]
    fn test_chain_order() {
        let h = harness(true);
        assert_eq!(
            h.charm.chain().names(),
            vec![
                "leadership-gate",
                "kubernetes:auth-and-crds",
                "service-mesh",
                "pvc-viewer-pebble-service"
            ]
        );
    }

    #[tokio::test]
    async fn test_non_leader_makes_no_changes() {
        let h = harness(false);
        let status = h.charm.dispatch(&EventKind::Install).await.unwrap().unwrap();

        assert_eq!(
            status,
            Status::blocked("[leadership-gate] Waiting for leadership")
        );
        assert_eq!(h.cluster.apply_count(), 0);
        assert_eq!(h.cluster.delete_count(), 0);
        assert_eq!(h.container.push_count(), 0);
        assert_eq!(h.container.layer_count(), 0);
        assert_eq!(h.unit.last_status(), Some(status));
    }

    #[tokio::test]
    async fn test_leader_converges_to_active() {
        let h = harness(true);
        let status = h.charm.dispatch(&EventKind::Install).await.unwrap().unwrap();
        assert_eq!(status, Status::Active);

        let plan = h.container.current_plan();
        let env = &plan.services["pvcviewer-operator"].environment;
        assert_eq!(env["USE_ISTIO"], "true");
        assert_eq!(env["USE_GATEWAY_API"], "false");
        assert_eq!(env["GATEWAY_NAME"], "kubeflow-gateway");
        assert_eq!(env["GATEWAY_NAMESPACE"], "kubeflow");
    }

    #[tokio::test]
    async fn test_second_event_is_side_effect_free() {
        let h = harness(true);
        h.charm.dispatch(&EventKind::Install).await.unwrap();
        let before = (
            h.cluster.apply_count(),
            h.cluster.delete_count(),
            h.container.push_count(),
            h.container.layer_count(),
            h.container.replan_count(),
        );

        h.charm.dispatch(&EventKind::UpdateStatus).await.unwrap();
        let after = (
            h.cluster.apply_count(),
            h.cluster.delete_count(),
            h.container.push_count(),
            h.container.layer_count(),
            h.container.replan_count(),
        );
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_mesh_without_gateway_blocks() {
        let h = harness(true);
        h.unit
            .add_relation(Relation::new("service-mesh:1", SERVICE_MESH_RELATION));

        let status = h
            .charm
            .dispatch(&relation_changed(SERVICE_MESH_RELATION))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(status, Status::Blocked(_)));
        assert!(status.message().contains("gateway metadata"));
        assert!(status.message().starts_with("[service-mesh]"));
        assert_eq!(h.container.layer_count(), 0);
    }

    #[tokio::test]
    async fn test_gateway_metadata_waits_then_activates() {
        let h = harness(true);
        h.unit.add_relation(Relation::new("gateway-metadata:2", GATEWAY_METADATA_RELATION));

        let status = h
            .charm
            .dispatch(&relation_changed(GATEWAY_METADATA_RELATION))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            status,
            Status::waiting("[service-mesh] Waiting for gateway metadata relation data")
        );

        h.unit.add_relation(
            Relation::new("gateway-metadata:2", GATEWAY_METADATA_RELATION)
                .with_remote_app("istio-ingress-k8s")
                .with_data("namespace", "istio-system")
                .with_data("gateway_name", "istio-ingress"),
        );
        let status = h
            .charm
            .dispatch(&relation_changed(GATEWAY_METADATA_RELATION))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, Status::Active);

        let plan = h.container.current_plan();
        let env = &plan.services["pvcviewer-operator"].environment;
        assert_eq!(env["USE_ISTIO"], "false");
        assert_eq!(env["USE_GATEWAY_API"], "true");
        assert_eq!(env["GATEWAY_NAME"], "istio-ingress");
        assert_eq!(env["GATEWAY_NAMESPACE"], "istio-system");
    }

    #[tokio::test]
    async fn test_cluster_outage_waits() {
        let h = harness(true);
        h.cluster.set_unavailable(true);

        let status = h.charm.dispatch(&EventKind::ConfigChanged).await.unwrap().unwrap();
        assert!(matches!(status, Status::Waiting(_)));
        assert!(status.message().starts_with("[kubernetes:auth-and-crds]"));
        assert_eq!(h.container.push_count(), 0);
    }

    #[tokio::test]
    async fn test_pebble_not_ready_waits() {
        let h = harness(true);
        h.container.set_can_connect(false);

        let status = h
            .charm
            .dispatch(&EventKind::PebbleReady {
                container: "pvcviewer-operator".to_string(),
            })
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(status, Status::Waiting(_)));
        assert!(status.message().starts_with("[pvc-viewer-pebble-service]"));
    }

    #[tokio::test]
    async fn test_publishes_scrape_job() {
        let h = harness(true);
        h.unit
            .add_relation(Relation::new("metrics-endpoint:5", METRICS_ENDPOINT_RELATION));

        h.charm.dispatch(&EventKind::LeaderElected).await.unwrap();
        assert!(h
            .unit
            .app_data(METRICS_ENDPOINT_RELATION)
            .contains_key("scrape_jobs"));
    }

    #[tokio::test]
    async fn test_remove_cleans_up() {
        let h = harness(true);
        h.charm.dispatch(&EventKind::Install).await.unwrap();
        assert!(!h.cluster.is_empty());

        assert_eq!(h.charm.dispatch(&EventKind::Remove).await.unwrap(), None);
        assert!(h.cluster.is_empty());
    }

    #[tokio::test]
    async fn test_non_leader_remove_keeps_cluster_resources() {
        let leader = harness(true);
        leader.charm.dispatch(&EventKind::Install).await.unwrap();
        let objects = leader.cluster.len();
        assert!(objects > 0);

        let unit = Arc::new(MockUnit::new(false));
        let follower = Charm::build(
            &CharmConfig {
                app_name: "pvcviewer-operator".to_string(),
                model_name: "kubeflow".to_string(),
                model_uuid: None,
            },
            CertificateBundle {
                cert: "cert".to_string(),
                key: "key".to_string(),
                ca: "ca".to_string(),
            },
            Collaborators {
                cluster: leader.cluster.clone(),
                container: Arc::new(MockContainer::new("pvcviewer-operator")),
                unit,
            },
        )
        .unwrap();

        assert_eq!(follower.dispatch(&EventKind::Remove).await.unwrap(), None);
        assert_eq!(leader.cluster.len(), objects);
        assert_eq!(leader.cluster.delete_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_without_leadership_answer_keeps_resources() {
        let h = harness(true);
        h.charm.dispatch(&EventKind::Install).await.unwrap();
        h.unit.fail_leader_query(true);

        assert_eq!(h.charm.dispatch(&EventKind::Remove).await.unwrap(), None);
        assert!(!h.cluster.is_empty());
        assert_eq!(h.cluster.delete_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_does_nothing() {
        let h = harness(true);
        assert_eq!(h.charm.dispatch(&EventKind::Stop).await.unwrap(), None);
        assert!(h.unit.statuses().is_empty());
        assert_eq!(h.cluster.apply_count(), 0);
    }
}
