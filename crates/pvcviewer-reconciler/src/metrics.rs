use crate::error::Result;
use pvcviewer_runtime::UnitContext;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const METRICS_ENDPOINT_RELATION: &str = "metrics-endpoint";
pub const METRICS_PORT: u16 = 8080;
pub const METRICS_PATH: &str = "/metrics";

/// Publishes the Prometheus scrape job for the manager's metrics port
pub struct MetricsEndpointProvider {
    unit: Arc<dyn UnitContext>,
    app_name: String,
    model_name: String,
    model_uuid: Option<String>,
}

impl MetricsEndpointProvider {
    pub fn new(
        unit: Arc<dyn UnitContext>,
        app_name: impl Into<String>,
        model_name: impl Into<String>,
        model_uuid: Option<String>,
    ) -> Self {
        Self {
            unit,
            app_name: app_name.into(),
            model_name: model_name.into(),
            model_uuid,
        }
    }

    /// Application databag content for the `metrics-endpoint` relation
    pub fn databag(&self) -> BTreeMap<String, String> {
        let jobs = json!([{
            "metrics_path": METRICS_PATH,
            "static_configs": [{"targets": [format!("*:{}", METRICS_PORT)]}],
        }]);
        let metadata = json!({
            "model": self.model_name,
            "model_uuid": self.model_uuid.clone().unwrap_or_default(),
            "application": self.app_name,
            "charm_name": "pvcviewer-operator",
        });

        let mut data = BTreeMap::new();
        data.insert("scrape_jobs".to_string(), jobs.to_string());
        data.insert("scrape_metadata".to_string(), metadata.to_string());
        data
    }

    /// Write the scrape job if this unit leads and the relation exists.
    ///
    /// Returns whether anything was written.
    pub async fn publish(&self) -> Result<bool> {
        if !self.unit.is_leader().await? {
            debug!("Not leader, skipping scrape job publication");
            return Ok(false);
        }

        let relation = match self.unit.relation(METRICS_ENDPOINT_RELATION).await? {
            Some(relation) => relation,
            None => return Ok(false),
        };

        self.unit.set_app_data(&relation, &self.databag()).await?;
        info!("Published scrape job on {}", relation.id);
        Ok(true)
    }
}
