use crate::component::Component;
use crate::error::Result;
use async_trait::async_trait;
use pvcviewer_core::Status;
use pvcviewer_runtime::UnitContext;
use std::sync::Arc;
use tracing::warn;

pub const LEADERSHIP_GATE: &str = "leadership-gate";

/// Active only while this unit is the application leader
pub struct LeadershipGate {
    unit: Arc<dyn UnitContext>,
}

impl LeadershipGate {
    pub fn new(unit: Arc<dyn UnitContext>) -> Self {
        Self { unit }
    }
}

#[async_trait]
impl Component for LeadershipGate {
    fn name(&self) -> &str {
        LEADERSHIP_GATE
    }

    async fn reconcile(&self) -> Result<()> {
        Ok(())
    }

    async fn status(&self) -> Status {
        match self.unit.is_leader().await {
            Ok(true) => Status::Active,
            Ok(false) => Status::blocked("Waiting for leadership"),
            Err(e) => {
                warn!("Failed to query leadership: {}", e);
                Status::waiting(format!("Failed to query leadership: {}", e))
            }
        }
    }
}
