use crate::error::{Result, RuntimeError};
use crate::traits::WorkloadContainer;
use crate::types::{Layer, ServiceInfo};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;
use tracing::debug;

const MULTIPART_BOUNDARY: &str = "pvcviewer-operator-7c1d2a9e5b";

/// Raw response from the Pebble API
struct PebbleResponse {
    status: u16,
    content_type: String,
    body: Bytes,
}

/// Client for a workload container's Pebble API, spoken over the unix
/// socket Juju mounts into the charm container.
pub struct PebbleClient {
    container: String,
    socket_path: PathBuf,
}

impl PebbleClient {
    pub fn new(container: impl Into<String>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            container: container.into(),
            socket_path: socket_path.into(),
        }
    }

    /// Default socket location for `container` inside a Juju charm container
    pub fn for_container(container: &str) -> Self {
        Self::new(
            container,
            format!("/charm/containers/{}/pebble.socket", container),
        )
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<PebbleResponse> {
        debug!("Pebble {} {} ({})", method, path, self.container);

        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            RuntimeError::container_unreachable(
                &self.container,
                format!("{}: {}", self.socket_path.display(), e),
            )
        })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| RuntimeError::container_unreachable(&self.container, e.to_string()))?;

        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, "localhost")
            .header(CONTENT_TYPE, content_type)
            .body(Full::new(body))
            .map_err(|e| RuntimeError::internal_error(format!("Invalid Pebble request: {}", e)))?;

        // The connection future drives the socket and finishes once the
        // exchange has dropped its sender.
        let exchange = async move {
            let response = sender.send_request(request).await?;
            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let body = response.into_body().collect().await?.to_bytes();
            Ok::<_, hyper::Error>(PebbleResponse {
                status,
                content_type,
                body,
            })
        };

        let (result, conn_result) = tokio::join!(exchange, conn);
        if let Err(e) = conn_result {
            debug!("Pebble connection closed with error: {}", e);
        }

        result.map_err(|e| RuntimeError::container_unreachable(&self.container, e.to_string()))
    }

    /// Send a JSON request and return the decoded envelope, failing on
    /// error envelopes.
    async fn json_request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let body = match body {
            Some(value) => Bytes::from(pvcviewer_core::to_json(value)?),
            None => Bytes::new(),
        };
        let response = self.request(method, path, "application/json", body).await?;
        let envelope = parse_envelope(path, &response.body)?;

        if response.status >= 400 || envelope["type"] == "error" {
            return Err(RuntimeError::pebble_error(path, error_message(&envelope)));
        }
        Ok(envelope)
    }

    /// Block until a change finishes; fail if it ended in error
    async fn wait_change(&self, change_id: &str) -> Result<()> {
        let path = format!("/v1/changes/{}/wait?timeout=60s", change_id);
        let envelope = self.json_request(Method::GET, &path, None).await?;
        let result = &envelope["result"];

        match result["err"].as_str() {
            Some(err) if !err.is_empty() => Err(RuntimeError::pebble_error(path, err)),
            _ => {
                debug!(
                    "Pebble change {} finished with status {}",
                    change_id,
                    result["status"].as_str().unwrap_or("unknown")
                );
                Ok(())
            }
        }
    }
}

fn parse_envelope(path: &str, body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body).map_err(|e| {
        RuntimeError::pebble_error(path, format!("invalid response body: {}", e))
    })
}

fn error_message(envelope: &Value) -> String {
    envelope["result"]["message"]
        .as_str()
        .or_else(|| envelope["status"].as_str())
        .unwrap_or("unknown error")
        .to_string()
}

fn read_file_uri(path: &str) -> String {
    format!("/v1/files?action=read&path={}", urlencoding::encode(path))
}

fn services_uri(names: &[&str]) -> String {
    format!("/v1/services?names={}", urlencoding::encode(&names.join(",")))
}

/// Body of a `POST /v1/files` write request for a single file
fn multipart_write_body(path: &str, data: &[u8]) -> Bytes {
    let request = json!({
        "action": "write",
        "files": [{"path": path, "make-dirs": true, "permissions": "644"}],
    });

    let mut body = Vec::with_capacity(data.len() + 512);
    body.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"request\"\r\n");
    body.extend_from_slice(b"Content-Type: application/json\r\n\r\n");
    body.extend_from_slice(request.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n",
            path
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
    Bytes::from(body)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Extract the boundary parameter of a multipart content type
fn multipart_boundary(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"'))
}

/// Extract the content of the form part called `name`
fn multipart_part<'a>(body: &'a [u8], boundary: &str, name: &str) -> Option<&'a [u8]> {
    let delimiter = format!("--{}", boundary);
    let marker = format!("name=\"{}\"", name);
    let mut rest = body;

    while let Some(start) = find(rest, delimiter.as_bytes()) {
        rest = &rest[start + delimiter.len()..];
        if rest.starts_with(b"--") {
            return None;
        }
        let headers_end = find(rest, b"\r\n\r\n")?;
        let headers = String::from_utf8_lossy(&rest[..headers_end]);
        let content = &rest[headers_end + 4..];
        let content_end = find(content, delimiter.as_bytes()).unwrap_or(content.len());
        let part = content[..content_end]
            .strip_suffix(b"\r\n")
            .unwrap_or(&content[..content_end]);

        if headers.contains(&marker) {
            return Some(part);
        }
        rest = &content[content_end..];
    }
    None
}

fn is_not_found(error: &Value) -> bool {
    error["kind"] == "not-found"
}

#[async_trait]
impl WorkloadContainer for PebbleClient {
    fn name(&self) -> &str {
        &self.container
    }

    async fn can_connect(&self) -> bool {
        match self.json_request(Method::GET, "/v1/system-info", None).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Cannot connect to {}: {}", self.container, e);
                false
            }
        }
    }

    async fn pull(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let uri = read_file_uri(path);
        let response = self
            .request(Method::GET, &uri, "application/json", Bytes::new())
            .await?;

        let boundary = match multipart_boundary(&response.content_type) {
            Some(b) => b.to_string(),
            None => {
                // Whole-request failure comes back as a plain JSON envelope
                let envelope = parse_envelope(&uri, &response.body)?;
                if is_not_found(&envelope["result"]) {
                    return Ok(None);
                }
                return Err(RuntimeError::pebble_error(uri, error_message(&envelope)));
            }
        };

        if let Some(content) = multipart_part(&response.body, &boundary, "files") {
            return Ok(Some(content.to_vec()));
        }

        let envelope = multipart_part(&response.body, &boundary, "response")
            .map(|part| parse_envelope(&uri, part))
            .transpose()?
            .unwrap_or(Value::Null);
        let file_error = &envelope["result"][0]["error"];
        if file_error.is_null() || is_not_found(file_error) {
            Ok(None)
        } else {
            Err(RuntimeError::pebble_error(
                uri,
                file_error["message"].as_str().unwrap_or("read failed"),
            ))
        }
    }

    async fn push(&self, path: &str, data: &[u8]) -> Result<()> {
        let content_type = format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY);
        let response = self
            .request(
                Method::POST,
                "/v1/files",
                &content_type,
                multipart_write_body(path, data),
            )
            .await?;

        let envelope = parse_envelope("/v1/files", &response.body)?;
        if response.status >= 400 || envelope["type"] == "error" {
            return Err(RuntimeError::pebble_error("/v1/files", error_message(&envelope)));
        }
        let file_error = &envelope["result"][0]["error"];
        if !file_error.is_null() {
            return Err(RuntimeError::pebble_error(
                "/v1/files",
                file_error["message"].as_str().unwrap_or("write failed"),
            ));
        }
        Ok(())
    }

    async fn plan(&self) -> Result<Layer> {
        let envelope = self
            .json_request(Method::GET, "/v1/plan?format=yaml", None)
            .await?;
        let yaml = envelope["result"].as_str().unwrap_or_default();
        if yaml.trim().is_empty() || yaml.trim() == "{}" {
            return Ok(Layer::default());
        }
        Ok(pvcviewer_core::from_yaml(yaml)?)
    }

    async fn add_layer(&self, label: &str, layer: &Layer) -> Result<()> {
        let body = json!({
            "action": "add",
            "combine": true,
            "label": label,
            "format": "yaml",
            "layer": pvcviewer_core::to_yaml(layer)?,
        });
        self.json_request(Method::POST, "/v1/layers", Some(&body))
            .await?;
        Ok(())
    }

    async fn replan(&self) -> Result<()> {
        let body = json!({"action": "replan", "services": []});
        let envelope = self
            .json_request(Method::POST, "/v1/services", Some(&body))
            .await?;

        match envelope["change"].as_str() {
            Some(change_id) => self.wait_change(change_id).await,
            None => Ok(()),
        }
    }

    async fn services(&self, names: &[&str]) -> Result<Vec<ServiceInfo>> {
        let path = services_uri(names);
        let envelope = self.json_request(Method::GET, &path, None).await?;
        serde_json::from_value(envelope["result"].clone())
            .map_err(|e| RuntimeError::pebble_error(path, format!("invalid services list: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_values_are_encoded() {
        assert_eq!(
            read_file_uri("/tmp/serving certs/tls.key"),
            "/v1/files?action=read&path=%2Ftmp%2Fserving%20certs%2Ftls.key"
        );
        assert_eq!(
            services_uri(&["pvcviewer-operator", "other"]),
            "/v1/services?names=pvcviewer-operator%2Cother"
        );
    }

    #[test]
    fn test_write_body_roundtrips_through_parser() {
        let body = multipart_write_body("/tmp/tls.crt", b"-----BEGIN CERTIFICATE-----\n");
        let request = multipart_part(&body, MULTIPART_BOUNDARY, "request").unwrap();
        let request: Value = serde_json::from_slice(request).unwrap();
        assert_eq!(request["action"], "write");
        assert_eq!(request["files"][0]["path"], "/tmp/tls.crt");

        let files = multipart_part(&body, MULTIPART_BOUNDARY, "files").unwrap();
        assert_eq!(files, b"-----BEGIN CERTIFICATE-----\n");
    }

    #[test]
    fn test_multipart_missing_part() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"response\"\r\n\r\n{}\r\n--b--\r\n";
        assert!(multipart_part(body, "b", "files").is_none());
        assert_eq!(multipart_part(body, "b", "response").unwrap(), b"{}");
    }

    #[test]
    fn test_multipart_boundary() {
        assert_eq!(
            multipart_boundary("multipart/form-data; boundary=abc123"),
            Some("abc123")
        );
        assert_eq!(
            multipart_boundary("multipart/form-data; boundary=\"quoted\""),
            Some("quoted")
        );
        assert_eq!(multipart_boundary("application/json"), None);
    }

    #[test]
    fn test_error_message() {
        let envelope = json!({"type": "error", "status": "Bad Request",
            "result": {"message": "cannot parse layer"}});
        assert_eq!(error_message(&envelope), "cannot parse layer");
        assert_eq!(error_message(&json!({"status": "Not Found"})), "Not Found");
    }

    #[tokio::test]
    async fn test_missing_socket_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let client = PebbleClient::new("pvcviewer-operator", dir.path().join("pebble.socket"));
        assert!(!client.can_connect().await);
        assert!(matches!(
            client.plan().await,
            Err(RuntimeError::ContainerUnreachable { .. })
        ));
    }

    #[test]
    fn test_default_socket_path() {
        let client = PebbleClient::for_container("pvcviewer-operator");
        assert_eq!(
            client.socket_path,
            PathBuf::from("/charm/containers/pvcviewer-operator/pebble.socket")
        );
    }
}
