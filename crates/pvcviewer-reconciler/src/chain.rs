use crate::component::Component;
use crate::error::{ReconcileError, Result};
use pvcviewer_core::Status;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

struct Registered {
    component: Arc<dyn Component>,
    depends_on: Vec<String>,
}

/// Status of one component after a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentStatus {
    pub name: String,
    pub status: Status,
}

/// Outcome of a reconciliation pass, in registration order
#[derive(Debug, Clone, Default)]
pub struct ChainReport {
    pub components: Vec<ComponentStatus>,
}

impl ChainReport {
    pub fn status_of(&self, name: &str) -> Option<&Status> {
        self.components
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.status)
    }

    /// The worst component status, message prefixed with the component name.
    ///
    /// Among equally severe statuses the first in registration order wins,
    /// which points at the root cause when downstream components forward an
    /// upstream status.
    pub fn overall(&self) -> Status {
        let mut worst: Option<&ComponentStatus> = None;
        for entry in &self.components {
            if entry.status.is_active() {
                continue;
            }
            match worst {
                Some(w) if w.status.severity() >= entry.status.severity() => {}
                _ => worst = Some(entry),
            }
        }

        match worst {
            Some(entry) => entry
                .status
                .with_message(format!("[{}] {}", entry.name, entry.status.message())),
            None => Status::Active,
        }
    }
}

/// Components in dependency order, evaluated once per event
#[derive(Default)]
pub struct ReconcilerChain {
    components: Vec<Registered>,
}

impl ReconcilerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component after all of its dependencies
    pub fn register(&mut self, component: Arc<dyn Component>, depends_on: &[&str]) -> Result<()> {
        let name = component.name().to_string();

        if self.position(&name).is_some() {
            return Err(ReconcileError::registration_error(
                &name,
                "a component with this name is already registered",
            ));
        }
        for dependency in depends_on {
            if self.position(dependency).is_none() {
                return Err(ReconcileError::registration_error(
                    &name,
                    format!("unknown dependency '{}'", dependency),
                ));
            }
        }

        debug!("Registered component {} (depends on {:?})", name, depends_on);
        self.components.push(Registered {
            component,
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        });
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.components
            .iter()
            .position(|r| r.component.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.components
            .iter()
            .map(|r| r.component.name())
            .collect()
    }

    /// Run one reconciliation pass.
    ///
    /// A component whose dependencies are not all Active is skipped and
    /// takes the worst dependency status unchanged.
    pub async fn run(&self) -> ChainReport {
        let mut report = ChainReport::default();

        for registered in &self.components {
            let name = registered.component.name();
            let blocking = registered
                .depends_on
                .iter()
                .filter_map(|dep| report.status_of(dep))
                .filter(|status| !status.is_active())
                .fold(None::<&Status>, |worst, status| match worst {
                    Some(w) if w.severity() >= status.severity() => Some(w),
                    _ => Some(status),
                })
                .cloned();

            let status = match blocking {
                Some(upstream) => {
                    debug!("Skipping {}: upstream is {}", name, upstream);
                    upstream
                }
                None => match registered.component.reconcile().await {
                    Ok(()) => registered.component.status().await,
                    Err(e) => {
                        warn!("Reconcile of {} failed: {}", name, e);
                        e.status()
                    }
                },
            };

            info!("Component {} is {}", name, status);
            report.components.push(ComponentStatus {
                name: name.to_string(),
                status,
            });
        }

        report
    }

    /// Call `remove` on every component in reverse registration order.
    ///
    /// Failures are logged and do not stop the remaining components.
    pub async fn remove(&self) -> Vec<(String, ReconcileError)> {
        let mut failures = Vec::new();
        for registered in self.components.iter().rev() {
            let name = registered.component.name();
            info!("Removing {}", name);
            if let Err(e) = registered.component.remove().await {
                error!("Failed to remove {}: {}", name, e);
                failures.push((name.to_string(), e));
            }
        }
        failures
    }
}
