use miette::Diagnostic;
use thiserror::Error;

/// How a failed collaborator call should be treated by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network trouble, conflicts, server-side hiccups: retry on the next event
    Transient,
    /// Permission or validation failures: an operator has to act
    Rejected,
    /// Anything else
    Fatal,
}

/// Runtime error type for cluster, container and hook-tool operations
#[derive(Error, Debug, Diagnostic)]
pub enum RuntimeError {
    /// Cluster API could not be reached
    #[error("Kubernetes API unavailable: {message}")]
    #[diagnostic(
        code(pvcviewer::runtime::cluster_unavailable),
        help("Check that the API server is reachable from the charm container and the service account token is mounted")
    )]
    ClusterUnavailable {
        #[allow(unused)]
        message: String,
    },

    /// Cluster API answered with an error status
    #[error("{method} {path} failed with status {code} ({reason}): {message}")]
    #[diagnostic(
        code(pvcviewer::runtime::api_error),
        help("403 means the application was deployed without --trust; 422 means a rendered manifest is invalid")
    )]
    ApiError {
        #[allow(unused)]
        method: String,
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        code: u16,
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        message: String,
    },

    /// Workload container's Pebble socket could not be reached
    #[error("Container '{container}' is not reachable: {message}")]
    #[diagnostic(
        code(pvcviewer::runtime::container_unreachable),
        help("The container may still be starting; the charm retries on the next pebble-ready or update-status event")
    )]
    ContainerUnreachable {
        #[allow(unused)]
        container: String,
        #[allow(unused)]
        message: String,
    },

    /// Pebble answered with an error
    #[error("Pebble request {path} failed: {message}")]
    #[diagnostic(
        code(pvcviewer::runtime::pebble_error),
        help("Inspect the workload container with `pebble changes` and `pebble logs`")
    )]
    PebbleError {
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        message: String,
    },

    /// Command execution failed
    #[error("Command '{command}' failed with exit code {exit_code}")]
    #[diagnostic(code(pvcviewer::runtime::command_failed), help("stderr: {stderr}"))]
    CommandFailed {
        #[allow(unused)]
        command: String,
        #[allow(unused)]
        exit_code: i32,
        #[allow(unused)]
        stderr: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(pvcviewer::runtime::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] pvcviewer_core::PvcViewerError),

    /// Internal error
    #[error("Internal runtime error: {message}")]
    #[diagnostic(
        code(pvcviewer::runtime::internal_error),
        help("This is likely a bug in pvcviewer-runtime. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    pub fn cluster_unavailable(message: impl Into<String>) -> Self {
        Self::ClusterUnavailable {
            message: message.into(),
        }
    }

    pub fn api_error(
        method: impl Into<String>,
        path: impl Into<String>,
        code: u16,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ApiError {
            method: method.into(),
            path: path.into(),
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn container_unreachable(container: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ContainerUnreachable {
            container: container.into(),
            message: message.into(),
        }
    }

    pub fn pebble_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PebbleError {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn command_failed(
        command: impl Into<String>,
        exit_code: i32,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Classify the failure for status reporting
    pub fn class(&self) -> FailureClass {
        match self {
            RuntimeError::ClusterUnavailable { .. } | RuntimeError::ContainerUnreachable { .. } => {
                FailureClass::Transient
            }
            RuntimeError::ApiError { code, .. } => match code {
                409 | 429 => FailureClass::Transient,
                500..=599 => FailureClass::Transient,
                400 | 401 | 403 | 422 => FailureClass::Rejected,
                _ => FailureClass::Fatal,
            },
            RuntimeError::PebbleError { .. } => FailureClass::Transient,
            RuntimeError::CommandFailed { .. } => FailureClass::Transient,
            RuntimeError::InvalidConfig { .. }
            | RuntimeError::CoreError(_)
            | RuntimeError::InternalError { .. } => FailureClass::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_classification() {
        let class = |code| RuntimeError::api_error("PATCH", "/x", code, "r", "m").class();
        assert_eq!(class(409), FailureClass::Transient);
        assert_eq!(class(503), FailureClass::Transient);
        assert_eq!(class(403), FailureClass::Rejected);
        assert_eq!(class(422), FailureClass::Rejected);
        assert_eq!(class(418), FailureClass::Fatal);
    }

    #[test]
    fn test_unreachable_is_transient() {
        assert_eq!(
            RuntimeError::cluster_unavailable("connection refused").class(),
            FailureClass::Transient
        );
        assert_eq!(
            RuntimeError::container_unreachable("pvcviewer-operator", "no socket").class(),
            FailureClass::Transient
        );
        assert_eq!(
            RuntimeError::internal_error("bug").class(),
            FailureClass::Fatal
        );
    }
}
