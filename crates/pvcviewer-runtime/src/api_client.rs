use crate::error::{Result, RuntimeError};
use crate::traits::ClusterClient;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status as ApiStatus;
use pvcviewer_core::{ResourceKey, ResourceType};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Where Kubernetes mounts the pod's service account credentials
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Connection settings for the Kubernetes API
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// API server URL (e.g., "https://10.152.183.1:443")
    pub base_url: String,
    /// Bearer token
    pub token: Option<String>,
    /// PEM CA bundle used to verify the API server
    pub ca_cert_pem: Option<Vec<u8>>,
    pub connect_timeout: Duration,
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            ca_cert_pem: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Build the config from the pod environment: `KUBERNETES_SERVICE_HOST`/
    /// `KUBERNETES_SERVICE_PORT` and the mounted service account.
    ///
    /// An explicit `base_url` takes precedence over the environment.
    pub fn in_cluster(base_url: Option<&str>) -> Result<Self> {
        let base_url = match base_url {
            Some(url) => url.to_string(),
            None => {
                let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
                    RuntimeError::invalid_config(
                        "KUBERNETES_SERVICE_HOST is not set",
                        "Run inside a Kubernetes pod or pass --kube-api-url",
                    )
                })?;
                let port =
                    std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
                service_url(&host, &port)
            }
        };

        let sa_dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(sa_dir.join("token"))
            .ok()
            .map(|t| t.trim().to_string());
        let ca_cert_pem = std::fs::read(sa_dir.join("ca.crt")).ok();

        Ok(Self {
            token,
            ca_cert_pem,
            ..Self::new(base_url)
        })
    }
}

/// Format the API server URL, bracketing IPv6 hosts
fn service_url(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("https://[{}]:{}", host, port)
    } else {
        format!("https://{}:{}", host, port)
    }
}

/// HTTP client for the Kubernetes API server
pub struct ApiClient {
    base_url: String,
    client: Client,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> Result<Self> {
        let mut builder = Client::builder().connect_timeout(config.connect_timeout);

        if let Some(pem) = &config.ca_cert_pem {
            let cert = reqwest::Certificate::from_pem(pem).map_err(|e| {
                RuntimeError::invalid_config(
                    format!("Invalid CA certificate: {}", e),
                    "Check the service account ca.crt",
                )
            })?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder.build().map_err(|e| {
            RuntimeError::internal_error(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            token: config.token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);

        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request; `Ok(None)` on 404
    async fn send(&self, method: &Method, path: &str, request: RequestBuilder) -> Result<Option<Value>> {
        let resp = request
            .send()
            .await
            .map_err(|e| RuntimeError::cluster_unavailable(format!("{} {}: {}", method, path, e)))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(api_error_from_body(method.as_str(), path, status, &body));
        }

        resp.json::<Value>()
            .await
            .map(Some)
            .map_err(|e| RuntimeError::internal_error(format!("Failed to parse response of {}: {}", path, e)))
    }
}

/// Turn an error response into an `ApiError`, using the API's `Status`
/// object when the body carries one.
fn api_error_from_body(method: &str, path: &str, status: StatusCode, body: &str) -> RuntimeError {
    match serde_json::from_str::<ApiStatus>(body) {
        Ok(api_status) => RuntimeError::api_error(
            method,
            path,
            status.as_u16(),
            api_status.reason.unwrap_or_default(),
            api_status.message.unwrap_or_default(),
        ),
        Err(_) => RuntimeError::api_error(
            method,
            path,
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown"),
            body,
        ),
    }
}

/// Render a label map as a Kubernetes label selector
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl ClusterClient for ApiClient {
    async fn get(&self, key: &ResourceKey) -> Result<Option<Value>> {
        let path = key.api_path();
        let request = self.request(Method::GET, &path);
        self.send(&Method::GET, &path, request).await
    }

    async fn apply(&self, object: &Value, field_manager: &str) -> Result<Value> {
        let key = ResourceKey::from_object(object)?;
        let path = key.api_path();
        let body = pvcviewer_core::to_json(object)?;

        let request = self
            .request(Method::PATCH, &path)
            .query(&[("fieldManager", field_manager), ("force", "true")])
            .header(reqwest::header::CONTENT_TYPE, "application/apply-patch+yaml")
            .body(body);

        self.send(&Method::PATCH, &path, request).await?.ok_or_else(|| {
            RuntimeError::api_error("PATCH", &path, 404, "NotFound", "resource type is not served")
        })
    }

    async fn list(
        &self,
        resource_type: &ResourceType,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>> {
        let path = resource_type.list_path();
        let request = self
            .request(Method::GET, &path)
            .query(&[("labelSelector", label_selector(labels))]);

        // A missing type (e.g. Istio CRDs not installed) simply has no objects
        let body = match self.send(&Method::GET, &path, request).await? {
            Some(body) => body,
            None => return Ok(Vec::new()),
        };

        let mut items = body["items"].as_array().cloned().unwrap_or_default();
        // List items omit apiVersion/kind; restore them so keys can be built
        for item in items.iter_mut() {
            if let Some(obj) = item.as_object_mut() {
                obj.insert(
                    "apiVersion".to_string(),
                    Value::String(resource_type.gvk.api_version()),
                );
                obj.insert("kind".to_string(), Value::String(resource_type.gvk.kind.clone()));
            }
        }
        Ok(items)
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        let path = key.api_path();
        let request = self.request(Method::DELETE, &path);
        self.send(&Method::DELETE, &path, request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_url() {
        assert_eq!(service_url("10.152.183.1", "443"), "https://10.152.183.1:443");
        assert_eq!(service_url("fd00::1", "6443"), "https://[fd00::1]:6443");
    }

    #[test]
    fn test_label_selector() {
        let mut labels = BTreeMap::new();
        labels.insert("app.juju.is/created-by".to_string(), "pvcviewer".to_string());
        labels.insert("kubernetes-resource-handler-scope".to_string(), "auth".to_string());
        assert_eq!(
            label_selector(&labels),
            "app.juju.is/created-by=pvcviewer,kubernetes-resource-handler-scope=auth"
        );
    }

    #[test]
    fn test_api_error_from_status_body() {
        let body = r#"{"kind":"Status","apiVersion":"v1","metadata":{},"status":"Failure",
            "message":"clusterroles is forbidden","reason":"Forbidden","code":403}"#;
        let err = api_error_from_body("PATCH", "/apis/x", StatusCode::FORBIDDEN, body);
        match err {
            RuntimeError::ApiError {
                code,
                reason,
                message,
                ..
            } => {
                assert_eq!(code, 403);
                assert_eq!(reason, "Forbidden");
                assert_eq!(message, "clusterroles is forbidden");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_api_error_from_plain_body() {
        let err = api_error_from_body("GET", "/api/v1", StatusCode::BAD_GATEWAY, "upstream down");
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("upstream down"));
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = ApiClient::new(ApiClientConfig::new("https://127.0.0.1:6443/")).unwrap();
        assert_eq!(client.base_url(), "https://127.0.0.1:6443");
    }
}
