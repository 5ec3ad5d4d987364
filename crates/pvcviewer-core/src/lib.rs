//! PVC Viewer Core - Shared types for the pvcviewer operator
//!
//! This crate provides:
//! - The `Status` model reported by every reconciliation component
//! - Juju event kinds and hook-name parsing
//! - Type-safe Kubernetes resource keys and allow-list entries
//! - Error types with miette diagnostics
//! - Serialization helpers

pub mod error;
pub mod events;
pub mod status;
pub mod types;

// Re-export commonly used types
pub use error::{PvcViewerError, Result};
pub use events::{EventKind, RelationChange};
pub use status::Status;
pub use types::{GroupVersionKind, ResourceKey, ResourceType};

/// Serialize a value to JSON
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        PvcViewerError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a value to YAML
pub fn to_yaml<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| {
        PvcViewerError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        PvcViewerError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Split a multi-document YAML stream into JSON objects.
///
/// Empty documents (a bare `---`, or a template branch that rendered nothing)
/// are dropped.
pub fn yaml_documents(data: &str) -> Result<Vec<serde_json::Value>> {
    use serde::Deserialize;

    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(data) {
        let value = serde_json::Value::deserialize(document).map_err(|e| {
            PvcViewerError::serialization_error(
                format!("Failed to parse YAML document: {}", e),
                Some(Box::new(e)),
            )
        })?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}
