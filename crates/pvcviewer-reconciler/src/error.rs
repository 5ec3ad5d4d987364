use miette::Diagnostic;
use pvcviewer_core::Status;
use pvcviewer_runtime::FailureClass;
use thiserror::Error;

/// Reconciliation error type
#[derive(Error, Debug, Diagnostic)]
pub enum ReconcileError {
    /// A manifest template failed to render
    #[error("Failed to render template '{template}': {message}")]
    #[diagnostic(
        code(pvcviewer::reconciler::template_error),
        help("Every variable a template uses must be provided by the manifest context")
    )]
    TemplateError {
        #[allow(unused)]
        template: String,
        #[allow(unused)]
        message: String,
    },

    /// A rendered object is not of an allow-listed type
    #[error("Resource {kind} '{name}' is not managed by {component}")]
    #[diagnostic(
        code(pvcviewer::reconciler::disallowed_resource),
        help("Add the resource type to the component's allow-list or remove it from the templates")
    )]
    DisallowedResource {
        #[allow(unused)]
        component: String,
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        name: String,
    },

    /// Certificate generation failed
    #[error("Certificate error: {message}")]
    #[diagnostic(code(pvcviewer::reconciler::certificate_error))]
    CertificateError {
        #[allow(unused)]
        message: String,
    },

    /// Component registration is inconsistent
    #[error("Cannot register component '{component}': {message}")]
    #[diagnostic(
        code(pvcviewer::reconciler::registration_error),
        help("Register components after their dependencies and give each a unique name")
    )]
    RegistrationError {
        #[allow(unused)]
        component: String,
        #[allow(unused)]
        message: String,
    },

    /// Runtime (cluster, container, hook tool) error
    #[error(transparent)]
    #[diagnostic(transparent)]
    RuntimeError(#[from] pvcviewer_runtime::RuntimeError),

    /// Storage error
    #[error(transparent)]
    #[diagnostic(transparent)]
    StorageError(#[from] pvcviewer_storage::StorageError),

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] pvcviewer_core::PvcViewerError),
}

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, ReconcileError>;

impl ReconcileError {
    pub fn template_error(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TemplateError {
            template: template.into(),
            message: message.into(),
        }
    }

    pub fn disallowed_resource(
        component: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::DisallowedResource {
            component: component.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn certificate_error(message: impl Into<String>) -> Self {
        Self::CertificateError {
            message: message.into(),
        }
    }

    pub fn registration_error(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RegistrationError {
            component: component.into(),
            message: message.into(),
        }
    }

    /// The status a component reports when its reconcile step fails with
    /// this error.
    ///
    /// Transient cluster and container failures wait for the next event,
    /// rejected requests need an operator, everything else is a bug.
    pub fn status(&self) -> Status {
        let message = self.to_string();
        match self {
            ReconcileError::RuntimeError(e) => match e.class() {
                FailureClass::Transient => Status::waiting(message),
                FailureClass::Rejected => Status::blocked(message),
                FailureClass::Fatal => Status::error(message),
            },
            _ => Status::error(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvcviewer_runtime::RuntimeError;

    #[test]
    fn test_status_taxonomy() {
        let conflict: ReconcileError =
            RuntimeError::api_error("PATCH", "/x", 409, "Conflict", "m").into();
        assert!(matches!(conflict.status(), Status::Waiting(_)));

        let forbidden: ReconcileError =
            RuntimeError::api_error("PATCH", "/x", 403, "Forbidden", "m").into();
        assert!(matches!(forbidden.status(), Status::Blocked(_)));

        let unreachable: ReconcileError =
            RuntimeError::container_unreachable("pvcviewer-operator", "no socket").into();
        assert!(matches!(unreachable.status(), Status::Waiting(_)));

        let disallowed = ReconcileError::disallowed_resource("k8s", "Deployment", "x");
        assert!(matches!(disallowed.status(), Status::Error(_)));
    }

    #[test]
    fn test_status_carries_message() {
        let err = ReconcileError::template_error("crd_manifests.yaml.j2", "undefined value");
        assert!(err.status().message().contains("crd_manifests.yaml.j2"));
    }
}
