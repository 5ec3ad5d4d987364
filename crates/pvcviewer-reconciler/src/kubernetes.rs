use crate::component::Component;
use crate::error::Result;
use crate::resources::{ownership_labels, DesiredObject, ResourceHandler};
use crate::templates::{ManifestContext, ManifestTemplate, TemplateRenderer};
use async_trait::async_trait;
use pvcviewer_core::{ResourceType, Status};
use pvcviewer_runtime::ClusterClient;
use std::sync::Arc;
use tracing::info;

/// Configuration for a `KubernetesResources` component
#[derive(Debug, Clone)]
pub struct KubernetesResourcesConfig {
    /// Component name, e.g. "kubernetes:auth-and-crds"
    pub name: String,
    pub app_name: String,
    /// Juju model name, also the namespace of namespaced objects
    pub model_name: String,
    /// Value of the `kubernetes-resource-handler-scope` label
    pub scope: String,
    /// Objects of any other type in the rendered output are rejected
    pub resource_types: Vec<ResourceType>,
}

impl KubernetesResourcesConfig {
    pub fn new(app_name: &str, model_name: &str, scope: &str) -> Self {
        Self {
            name: format!("kubernetes:{}", scope),
            app_name: app_name.to_string(),
            model_name: model_name.to_string(),
            scope: scope.to_string(),
            resource_types: pvcviewer_resource_types(),
        }
    }

    pub fn field_manager(&self) -> String {
        format!("{}-{}", self.app_name, self.model_name)
    }
}

/// Types the pvcviewer manifests are made of
pub fn pvcviewer_resource_types() -> Vec<ResourceType> {
    vec![
        ResourceType::cluster_scoped("apiextensions.k8s.io", "v1", "CustomResourceDefinition"),
        ResourceType::namespaced("rbac.authorization.k8s.io", "v1", "Role"),
        ResourceType::namespaced("rbac.authorization.k8s.io", "v1", "RoleBinding"),
        ResourceType::namespaced("", "v1", "ServiceAccount"),
        ResourceType::cluster_scoped("rbac.authorization.k8s.io", "v1", "ClusterRole"),
        ResourceType::cluster_scoped("rbac.authorization.k8s.io", "v1", "ClusterRoleBinding"),
        ResourceType::namespaced("", "v1", "Service"),
        ResourceType::cluster_scoped(
            "admissionregistration.k8s.io",
            "v1",
            "MutatingWebhookConfiguration",
        ),
        ResourceType::cluster_scoped(
            "admissionregistration.k8s.io",
            "v1",
            "ValidatingWebhookConfiguration",
        ),
    ]
}

/// Supplies the template context at render time
pub type ContextProvider = Box<dyn Fn() -> ManifestContext + Send + Sync>;

/// Renders manifest templates and keeps the cluster in line with them
pub struct KubernetesResources {
    name: String,
    renderer: TemplateRenderer,
    context: ContextProvider,
    handler: ResourceHandler,
}

impl KubernetesResources {
    pub fn new(
        config: KubernetesResourcesConfig,
        templates: &[ManifestTemplate],
        context: ContextProvider,
        cluster: Arc<dyn ClusterClient>,
    ) -> Result<Self> {
        let handler = ResourceHandler::new(
            &config.name,
            cluster,
            ownership_labels(&config.app_name, &config.model_name, &config.scope),
            config.field_manager(),
            &config.model_name,
            config.resource_types.clone(),
        );

        Ok(Self {
            name: config.name,
            renderer: TemplateRenderer::new(templates)?,
            context,
            handler,
        })
    }

    /// Render the templates into labelled, allow-listed objects
    pub fn desired(&self) -> Result<Vec<DesiredObject>> {
        let documents = self.renderer.render(&(self.context)())?;
        self.handler.prepare(documents)
    }
}

#[async_trait]
impl Component for KubernetesResources {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reconcile(&self) -> Result<()> {
        let desired = self.desired()?;
        let outcome = self.handler.apply(&desired).await?;
        info!(
            "{}: {} applied, {} unchanged, {} deleted",
            self.name, outcome.applied, outcome.unchanged, outcome.deleted
        );
        Ok(())
    }

    async fn status(&self) -> Status {
        let desired = match self.desired() {
            Ok(desired) => desired,
            Err(e) => return e.status(),
        };

        match self.handler.drift(&desired).await {
            Ok(drifted) if drifted.is_empty() => Status::Active,
            Ok(drifted) => {
                let names: Vec<String> = drifted.iter().map(|k| k.to_string()).collect();
                Status::waiting(format!(
                    "Waiting for resources to be applied: {}",
                    names.join(", ")
                ))
            }
            Err(e) => e.status(),
        }
    }

    async fn remove(&self) -> Result<()> {
        let deleted = self.handler.delete_all().await?;
        info!("{}: deleted {} resources", self.name, deleted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::CertificateBundle;
    use crate::error::ReconcileError;
    use crate::resources::SCOPE_LABEL;
    use crate::templates::{pvcviewer_templates, ManifestTemplate};
    use pvcviewer_runtime::MockCluster;
    use serde_json::json;

    fn bundle() -> CertificateBundle {
        CertificateBundle {
            cert: "cert".to_string(),
            key: "key".to_string(),
            ca: "ca".to_string(),
        }
    }

    fn component(cluster: Arc<MockCluster>, templates: &[ManifestTemplate]) -> KubernetesResources {
        let certs = bundle();
        KubernetesResources::new(
            KubernetesResourcesConfig::new("pvcviewer-operator", "kubeflow", "auth-and-crds"),
            templates,
            Box::new(move || ManifestContext::new("pvcviewer-operator", "kubeflow", &certs)),
            cluster,
        )
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = KubernetesResourcesConfig::new("pvcviewer-operator", "kubeflow", "auth-and-crds");
        assert_eq!(config.name, "kubernetes:auth-and-crds");
        assert_eq!(config.field_manager(), "pvcviewer-operator-kubeflow");
        assert_eq!(config.resource_types.len(), 9);
    }

    #[tokio::test]
    async fn test_reconcile_applies_everything_once() {
        let cluster = Arc::new(MockCluster::new());
        let k8s = component(cluster.clone(), &pvcviewer_templates());

        assert!(matches!(k8s.status().await, Status::Waiting(_)));

        k8s.reconcile().await.unwrap();
        let applied = cluster.apply_count();
        assert_eq!(applied, k8s.desired().unwrap().len());
        assert_eq!(k8s.status().await, Status::Active);

        k8s.reconcile().await.unwrap();
        assert_eq!(cluster.apply_count(), applied);
        assert_eq!(cluster.delete_count(), 0);
    }

    #[tokio::test]
    async fn test_converges_over_juju_service() {
        let cluster = Arc::new(MockCluster::new());
        cluster
            .insert(json!({"apiVersion": "v1", "kind": "Service",
                           "metadata": {"name": "pvcviewer-operator", "namespace": "kubeflow",
                                        "labels": {"app.kubernetes.io/name": "pvcviewer-operator"}},
                           "spec": {"ports": [{"name": "placeholder", "port": 65535}]}}))
            .unwrap();
        let k8s = component(cluster.clone(), &pvcviewer_templates());

        k8s.reconcile().await.unwrap();
        let applied = cluster.apply_count();
        assert_eq!(k8s.status().await, Status::Active);

        k8s.reconcile().await.unwrap();
        assert_eq!(cluster.apply_count(), applied);
        assert_eq!(k8s.status().await, Status::Active);
    }

    #[tokio::test]
    async fn test_objects_are_labelled() {
        let cluster = Arc::new(MockCluster::new());
        let k8s = component(cluster.clone(), &pvcviewer_templates());
        k8s.reconcile().await.unwrap();

        for key in cluster.keys() {
            let object = cluster.object(&key).unwrap();
            assert_eq!(
                object["metadata"]["labels"][SCOPE_LABEL], "auth-and-crds",
                "{} is unlabelled",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_disallowed_type_is_error() {
        const DEPLOYMENT: ManifestTemplate = ManifestTemplate {
            name: "deployment.yaml.j2",
            source: "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {{ app_name }}\n",
        };
        let cluster = Arc::new(MockCluster::new());
        let k8s = component(cluster.clone(), &[DEPLOYMENT]);

        assert!(matches!(
            k8s.reconcile().await,
            Err(ReconcileError::DisallowedResource { .. })
        ));
        assert!(matches!(k8s.status().await, Status::Error(_)));
        assert_eq!(cluster.apply_count(), 0);
    }

    #[tokio::test]
    async fn test_forbidden_is_blocked() {
        let cluster = Arc::new(MockCluster::new());
        let k8s = component(cluster.clone(), &pvcviewer_templates());
        cluster.fail_with(403, "Forbidden");

        let err = k8s.reconcile().await.unwrap_err();
        assert!(matches!(err.status(), Status::Blocked(_)));
        assert!(matches!(k8s.status().await, Status::Blocked(_)));
    }

    #[tokio::test]
    async fn test_remove_deletes_owned_objects_only() {
        let cluster = Arc::new(MockCluster::new());
        let k8s = component(cluster.clone(), &pvcviewer_templates());
        k8s.reconcile().await.unwrap();
        cluster
            .insert(json!({"apiVersion": "v1", "kind": "Service",
                           "metadata": {"name": "pvcviewer-operator-endpoints", "namespace": "kubeflow"}}))
            .unwrap();

        k8s.remove().await.unwrap();
        let remaining: Vec<String> = cluster.keys().into_iter().map(|k| k.name).collect();
        assert_eq!(remaining, vec!["pvcviewer-operator-endpoints"]);
    }
}
