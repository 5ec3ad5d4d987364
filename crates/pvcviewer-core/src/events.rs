use crate::{PvcViewerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What happened to a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationChange {
    Created,
    Joined,
    Changed,
    Departed,
    Broken,
}

impl RelationChange {
    fn suffix(&self) -> &'static str {
        match self {
            RelationChange::Created => "created",
            RelationChange::Joined => "joined",
            RelationChange::Changed => "changed",
            RelationChange::Departed => "departed",
            RelationChange::Broken => "broken",
        }
    }
}

/// A Juju event delivered to the charm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Install,
    Start,
    Stop,
    UpgradeCharm,
    ConfigChanged,
    LeaderElected,
    LeaderSettingsChanged,
    UpdateStatus,
    Remove,
    PebbleReady { container: String },
    Relation { relation: String, change: RelationChange },
}

impl EventKind {
    /// Parse a hook name or dispatch path (`hooks/install`, `install`)
    pub fn from_hook(hook: &str) -> Result<Self> {
        let name = hook.trim().rsplit('/').next().unwrap_or_default();

        let event = match name {
            "install" => EventKind::Install,
            "start" => EventKind::Start,
            "stop" => EventKind::Stop,
            "upgrade-charm" => EventKind::UpgradeCharm,
            "config-changed" => EventKind::ConfigChanged,
            "leader-elected" => EventKind::LeaderElected,
            "leader-settings-changed" => EventKind::LeaderSettingsChanged,
            "update-status" => EventKind::UpdateStatus,
            "remove" => EventKind::Remove,
            _ => {
                if let Some(container) = name.strip_suffix("-pebble-ready") {
                    EventKind::PebbleReady {
                        container: container.to_string(),
                    }
                } else {
                    return Self::parse_relation(name)
                        .ok_or_else(|| PvcViewerError::unknown_event(hook));
                }
            }
        };
        Ok(event)
    }

    fn parse_relation(name: &str) -> Option<Self> {
        let (relation, suffix) = name.rsplit_once("-relation-")?;
        if relation.is_empty() {
            return None;
        }
        let change = match suffix {
            "created" => RelationChange::Created,
            "joined" => RelationChange::Joined,
            "changed" => RelationChange::Changed,
            "departed" => RelationChange::Departed,
            "broken" => RelationChange::Broken,
            _ => return None,
        };
        Some(EventKind::Relation {
            relation: relation.to_string(),
            change,
        })
    }

    /// Whether this event runs a reconciliation pass.
    ///
    /// `remove` tears resources down instead; `stop` does nothing.
    pub fn triggers_reconcile(&self) -> bool {
        !matches!(self, EventKind::Remove | EventKind::Stop)
    }
}

impl FromStr for EventKind {
    type Err = PvcViewerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hook(s)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Install => write!(f, "install"),
            EventKind::Start => write!(f, "start"),
            EventKind::Stop => write!(f, "stop"),
            EventKind::UpgradeCharm => write!(f, "upgrade-charm"),
            EventKind::ConfigChanged => write!(f, "config-changed"),
            EventKind::LeaderElected => write!(f, "leader-elected"),
            EventKind::LeaderSettingsChanged => write!(f, "leader-settings-changed"),
            EventKind::UpdateStatus => write!(f, "update-status"),
            EventKind::Remove => write!(f, "remove"),
            EventKind::PebbleReady { container } => write!(f, "{}-pebble-ready", container),
            EventKind::Relation { relation, change } => {
                write!(f, "{}-relation-{}", relation, change.suffix())
            }
        }
    }
}
