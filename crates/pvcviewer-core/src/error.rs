// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for pvcviewer operations
#[derive(Error, Debug, Diagnostic)]
pub enum PvcViewerError {
    /// Invalid resource
    #[error("Invalid resource: {reason}")]
    #[diagnostic(
        code(pvcviewer::invalid_resource),
        help("{suggestion}")
    )]
    InvalidResource {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Unknown Juju event
    #[error("Unknown event: {hook}")]
    #[diagnostic(
        code(pvcviewer::unknown_event),
        help("The hook name is taken from JUJU_DISPATCH_PATH or JUJU_HOOK_NAME, e.g. 'hooks/install'")
    )]
    UnknownEvent {
        #[allow(unused)]
        hook: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(pvcviewer::serialization_error),
        help("Ensure the document is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, PvcViewerError>;

impl PvcViewerError {
    /// Create an InvalidResource error
    pub fn invalid_resource(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidResource {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an UnknownEvent error
    pub fn unknown_event(hook: impl Into<String>) -> Self {
        Self::UnknownEvent { hook: hook.into() }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }
}
