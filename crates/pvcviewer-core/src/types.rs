use crate::{PvcViewerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// GroupVersionKind uniquely identifies a Kubernetes resource type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group (e.g., "", "rbac.authorization.k8s.io")
    pub group: String,
    /// API version (e.g., "v1", "v1beta1")
    pub version: String,
    /// Resource kind (e.g., "Service", "ClusterRole")
    pub kind: String,
}

impl GroupVersionKind {
    /// Create a new GVK
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Create a GVK from apiVersion and kind
    /// apiVersion format: "v1" or "group/version"
    pub fn from_api_version_kind(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };

        Self {
            group,
            version,
            kind: kind.to_string(),
        }
    }

    /// Get the apiVersion string (group/version or just version)
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Get the full API path segment
    pub fn api_path(&self) -> String {
        if self.group.is_empty() {
            format!("api/{}", self.version)
        } else {
            format!("apis/{}/{}", self.group, self.version)
        }
    }

    /// Get the resource name (lowercase, plural)
    pub fn resource_name(&self) -> String {
        let lower = self.kind.to_lowercase();
        if lower.ends_with('s') {
            format!("{}es", lower)
        } else if lower.ends_with('y') {
            format!("{}ies", &lower[..lower.len() - 1])
        } else {
            format!("{}s", lower)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// An entry of a reconciler's allow-list: a resource type and its scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceType {
    pub gvk: GroupVersionKind,
    pub namespaced: bool,
}

impl ResourceType {
    pub fn namespaced(group: &str, version: &str, kind: &str) -> Self {
        Self {
            gvk: GroupVersionKind::new(group, version, kind),
            namespaced: true,
        }
    }

    pub fn cluster_scoped(group: &str, version: &str, kind: &str) -> Self {
        Self {
            gvk: GroupVersionKind::new(group, version, kind),
            namespaced: false,
        }
    }

    /// API path of the collection across all namespaces
    pub fn list_path(&self) -> String {
        format!("/{}/{}", self.gvk.api_path(), self.gvk.resource_name())
    }
}

/// ResourceKey uniquely identifies a specific resource instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    /// GroupVersionKind of the resource
    pub gvk: GroupVersionKind,
    /// Namespace (empty for cluster-scoped resources)
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl ResourceKey {
    /// Create a new ResourceKey
    pub fn new(gvk: GroupVersionKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            gvk,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a cluster-scoped ResourceKey
    pub fn cluster_scoped(gvk: GroupVersionKind, name: impl Into<String>) -> Self {
        Self {
            gvk,
            namespace: String::new(),
            name: name.into(),
        }
    }

    /// Build the key of a JSON object from its apiVersion, kind and metadata
    pub fn from_object(object: &serde_json::Value) -> Result<Self> {
        let api_version = object["apiVersion"].as_str().ok_or_else(|| {
            PvcViewerError::invalid_resource("object has no apiVersion", "Set apiVersion on every manifest")
        })?;
        let kind = object["kind"].as_str().ok_or_else(|| {
            PvcViewerError::invalid_resource("object has no kind", "Set kind on every manifest")
        })?;
        let name = object["metadata"]["name"].as_str().ok_or_else(|| {
            PvcViewerError::invalid_resource(
                format!("{} has no metadata.name", kind),
                "Set metadata.name on every manifest",
            )
        })?;
        let namespace = object["metadata"]["namespace"].as_str().unwrap_or_default();

        Ok(Self::new(
            GroupVersionKind::from_api_version_kind(api_version, kind),
            namespace,
            name,
        ))
    }

    /// Check if this is a namespaced resource
    pub fn is_namespaced(&self) -> bool {
        !self.namespace.is_empty()
    }

    /// Get the API path for this resource
    pub fn api_path(&self) -> String {
        format!("{}/{}", self.collection_path(), self.name)
    }

    /// Get the API path for the collection (without name)
    pub fn collection_path(&self) -> String {
        let base = self.gvk.api_path();
        let resource = self.gvk.resource_name();

        if self.is_namespaced() {
            format!("/{}/namespaces/{}/{}", base, self.namespace, resource)
        } else {
            format!("/{}/{}", base, resource)
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_namespaced() {
            write!(f, "{}/{}/{}", self.gvk, self.namespace, self.name)
        } else {
            write!(f, "{}/{}", self.gvk, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gvk_from_api_version() {
        let gvk = GroupVersionKind::from_api_version_kind("v1", "Service");
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.api_version(), "v1");

        let gvk = GroupVersionKind::from_api_version_kind("rbac.authorization.k8s.io/v1", "Role");
        assert_eq!(gvk.group, "rbac.authorization.k8s.io");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.api_version(), "rbac.authorization.k8s.io/v1");
    }

    #[test]
    fn test_gvk_resource_name() {
        let cases = [
            ("CustomResourceDefinition", "customresourcedefinitions"),
            ("ClusterRoleBinding", "clusterrolebindings"),
            ("AuthorizationPolicy", "authorizationpolicies"),
            ("ServiceAccount", "serviceaccounts"),
        ];
        for (kind, plural) in cases {
            assert_eq!(GroupVersionKind::new("g", "v1", kind).resource_name(), plural);
        }
    }

    #[test]
    fn test_resource_key_api_path() {
        let gvk = GroupVersionKind::from_api_version_kind("v1", "Service");
        let key = ResourceKey::new(gvk, "kubeflow", "pvcviewer-operator");
        assert_eq!(
            key.api_path(),
            "/api/v1/namespaces/kubeflow/services/pvcviewer-operator"
        );

        let gvk =
            GroupVersionKind::from_api_version_kind("apiextensions.k8s.io/v1", "CustomResourceDefinition");
        let key = ResourceKey::cluster_scoped(gvk, "pvcviewers.kubeflow.org");
        assert_eq!(
            key.api_path(),
            "/apis/apiextensions.k8s.io/v1/customresourcedefinitions/pvcviewers.kubeflow.org"
        );
    }

    #[test]
    fn test_resource_key_from_object() {
        let object = json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "Role",
            "metadata": {"name": "leader-election", "namespace": "kubeflow"}
        });
        let key = ResourceKey::from_object(&object).unwrap();
        assert_eq!(key.gvk.kind, "Role");
        assert_eq!(key.namespace, "kubeflow");
        assert_eq!(key.to_string(), "rbac.authorization.k8s.io/v1/Role/kubeflow/leader-election");

        let nameless = json!({"apiVersion": "v1", "kind": "Service", "metadata": {}});
        assert!(ResourceKey::from_object(&nameless).is_err());
    }

    #[test]
    fn test_list_path() {
        let rt = ResourceType::namespaced("security.istio.io", "v1", "AuthorizationPolicy");
        assert_eq!(rt.list_path(), "/apis/security.istio.io/v1/authorizationpolicies");
    }
}
