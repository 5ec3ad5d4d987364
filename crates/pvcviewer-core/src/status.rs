use serde::{Deserialize, Serialize};
use std::fmt;

/// Health reported by a reconciliation component
///
/// Severity for aggregation, highest first: Error, Blocked, Waiting,
/// Maintenance, Active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum Status {
    Active,
    Waiting(String),
    Blocked(String),
    Maintenance(String),
    Error(String),
}

impl Status {
    pub fn waiting(message: impl Into<String>) -> Self {
        Self::Waiting(message.into())
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self::Blocked(message.into())
    }

    pub fn maintenance(message: impl Into<String>) -> Self {
        Self::Maintenance(message.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Status::Active)
    }

    /// Aggregation rank; larger is worse
    pub fn severity(&self) -> u8 {
        match self {
            Status::Active => 0,
            Status::Maintenance(_) => 1,
            Status::Waiting(_) => 2,
            Status::Blocked(_) => 3,
            Status::Error(_) => 4,
        }
    }

    /// Human-readable message (empty for Active)
    pub fn message(&self) -> &str {
        match self {
            Status::Active => "",
            Status::Waiting(m) | Status::Blocked(m) | Status::Maintenance(m) | Status::Error(m) => m,
        }
    }

    /// Status name as understood by Juju's `status-set`.
    ///
    /// A charm cannot put itself into `error`, so Error is surfaced as
    /// `blocked`.
    pub fn juju_name(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Waiting(_) => "waiting",
            Status::Blocked(_) | Status::Error(_) => "blocked",
            Status::Maintenance(_) => "maintenance",
        }
    }

    /// Same status kind with a new message
    pub fn with_message(&self, message: impl Into<String>) -> Self {
        let message = message.into();
        match self {
            Status::Active => Status::Active,
            Status::Waiting(_) => Status::Waiting(message),
            Status::Blocked(_) => Status::Blocked(message),
            Status::Maintenance(_) => Status::Maintenance(message),
            Status::Error(_) => Status::Error(message),
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Waiting("Not yet reconciled".to_string())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Active => write!(f, "active"),
            Status::Waiting(m) => write!(f, "waiting: {}", m),
            Status::Blocked(m) => write!(f, "blocked: {}", m),
            Status::Maintenance(m) => write!(f, "maintenance: {}", m),
            Status::Error(m) => write!(f, "error: {}", m),
        }
    }
}
