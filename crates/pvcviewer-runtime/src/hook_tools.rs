use crate::command::exec;
use crate::error::{Result, RuntimeError};
use crate::traits::UnitContext;
use crate::types::Relation;
use async_trait::async_trait;
use pvcviewer_core::Status;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::debug;

/// `UnitContext` backed by the Juju hook tools on `PATH`
///
/// Every call shells out (`is-leader`, `relation-ids`, `relation-get`, ...)
/// and parses the `--format=json` output.
#[derive(Debug, Clone, Default)]
pub struct HookTools {
    /// Directory holding the tools; `None` resolves them through `PATH`
    tools_dir: Option<String>,
    /// Relation being torn down in the current `-relation-broken` hook.
    /// Juju still lists it, but it must be treated as gone.
    broken_relation: Option<String>,
}

impl HookTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use hook tools from a specific directory
    pub fn with_tools_dir(dir: impl Into<String>) -> Self {
        Self {
            tools_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Hide the relation with this id, e.g. `JUJU_RELATION_ID` during a
    /// `-relation-broken` hook
    pub fn with_broken_relation(mut self, relation_id: impl Into<String>) -> Self {
        self.broken_relation = Some(relation_id.into());
        self
    }

    fn program(&self, tool: &str) -> String {
        match &self.tools_dir {
            Some(dir) => format!("{}/{}", dir.trim_end_matches('/'), tool),
            None => tool.to_string(),
        }
    }

    async fn run_json<T: DeserializeOwned>(&self, tool: &str, args: &[&str]) -> Result<T> {
        let output = exec(&self.program(tool), args).await?;
        parse_json(tool, &output.stdout)
    }
}

fn parse_json<T: DeserializeOwned>(tool: &str, stdout: &str) -> Result<T> {
    serde_json::from_str(stdout.trim()).map_err(|e| {
        RuntimeError::internal_error(format!("Unexpected output from {}: {}", tool, e))
    })
}

/// `relation-list --app` prints the remote application, or nothing before
/// any remote unit has joined
fn parse_remote_app(stdout: &str) -> Result<Option<String>> {
    if stdout.trim().is_empty() {
        return Ok(None);
    }
    let app: Option<String> = parse_json("relation-list", stdout)?;
    Ok(app.filter(|a| !a.is_empty()))
}

/// Arguments for writing `data` into the local app databag of `relation_id`
fn relation_set_args<'a>(relation_id: &'a str, pairs: &'a [String]) -> Vec<&'a str> {
    let mut args = vec!["-r", relation_id, "--app"];
    args.extend(pairs.iter().map(String::as_str));
    args
}

#[async_trait]
impl UnitContext for HookTools {
    async fn is_leader(&self) -> Result<bool> {
        self.run_json("is-leader", &["--format=json"]).await
    }

    async fn relation(&self, endpoint: &str) -> Result<Option<Relation>> {
        let ids: Option<Vec<String>> = self
            .run_json("relation-ids", &["--format=json", endpoint])
            .await?;
        let id = match ids
            .unwrap_or_default()
            .into_iter()
            .find(|id| self.broken_relation.as_deref() != Some(id.as_str()))
        {
            Some(id) => id,
            None => return Ok(None),
        };

        let output = exec(
            &self.program("relation-list"),
            &["-r", &id, "--app", "--format=json"],
        )
        .await?;
        let mut relation = Relation::new(&id, endpoint);
        relation.remote_app = parse_remote_app(&output.stdout)?;

        if let Some(remote_app) = relation.remote_app.clone() {
            let data: Option<BTreeMap<String, String>> = self
                .run_json(
                    "relation-get",
                    &["-r", &id, "--app", "--format=json", "-", &remote_app],
                )
                .await?;
            relation.remote_app_data = data.unwrap_or_default();
        }

        debug!(
            "Relation {} ({:?}) has {} app data keys",
            relation.id,
            relation.remote_app,
            relation.remote_app_data.len()
        );
        Ok(Some(relation))
    }

    async fn set_app_data(
        &self,
        relation: &Relation,
        data: &BTreeMap<String, String>,
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let pairs: Vec<String> = data.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        exec(
            &self.program("relation-set"),
            &relation_set_args(&relation.id, &pairs),
        )
        .await?;
        Ok(())
    }

    async fn set_status(&self, status: &Status) -> Result<()> {
        exec(
            &self.program("status-set"),
            &[status.juju_name(), status.message()],
        )
        .await?;
        Ok(())
    }
}
