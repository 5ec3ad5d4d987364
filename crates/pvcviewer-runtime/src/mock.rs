use crate::error::{Result, RuntimeError};
use crate::traits::{ClusterClient, UnitContext, WorkloadContainer};
use crate::types::{Layer, Relation, ServiceInfo, ServiceState, Startup};
use async_trait::async_trait;
use parking_lot::Mutex;
use pvcviewer_core::{ResourceKey, ResourceType, Status};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Merge `patch` into `target`, recursing into objects and replacing
/// everything else (arrays included), like an apply by a single manager.
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Key a list entry merges on: `port` for Service ports, `name` otherwise
fn list_entry_key(entry: &Value) -> Option<&Value> {
    entry.get("port").or_else(|| entry.get("name"))
}

/// Re-add keyed list entries of `foreign` that `target` lost, like server-side
/// apply keeping entries owned by another field manager.
fn keep_foreign_entries(target: &mut Value, foreign: &Value) {
    match (target, foreign) {
        (Value::Object(target), Value::Object(foreign)) => {
            for (key, value) in foreign {
                if let Some(existing) = target.get_mut(key) {
                    keep_foreign_entries(existing, value);
                }
            }
        }
        (Value::Array(target), Value::Array(foreign)) => {
            for entry in foreign {
                let Some(key) = list_entry_key(entry) else {
                    continue;
                };
                if !target.iter().any(|t| list_entry_key(t) == Some(key)) {
                    target.push(entry.clone());
                }
            }
        }
        _ => {}
    }
}

fn labels_match(object: &Value, selector: &BTreeMap<String, String>) -> bool {
    let labels = &object["metadata"]["labels"];
    selector
        .iter()
        .all(|(k, v)| labels[k].as_str() == Some(v.as_str()))
}

#[derive(Default)]
struct ClusterState {
    objects: BTreeMap<ResourceKey, Value>,
    /// Content seeded with `insert`, owned by some other manager
    foreign: BTreeMap<ResourceKey, Value>,
    applies: usize,
    deletes: usize,
    failure: Option<(u16, String)>,
    unavailable: bool,
}

/// In-memory Kubernetes API for tests
///
/// Counts mutating calls so tests can assert idempotence, and can be told to
/// fail every call with an API status or as unreachable. Keyed list entries
/// of seeded objects survive later applies.
#[derive(Default)]
pub struct MockCluster {
    state: Mutex<ClusterState>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object as if something else had created it
    pub fn insert(&self, object: Value) -> Result<()> {
        let key = ResourceKey::from_object(&object)?;
        let mut state = self.state.lock();
        state.foreign.insert(key.clone(), object.clone());
        state.objects.insert(key, object);
        Ok(())
    }

    pub fn object(&self, key: &ResourceKey) -> Option<Value> {
        self.state.lock().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        self.state.lock().objects.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `apply` calls that reached the store
    pub fn apply_count(&self) -> usize {
        self.state.lock().applies
    }

    pub fn delete_count(&self) -> usize {
        self.state.lock().deletes
    }

    /// Fail every subsequent call with the given HTTP status
    pub fn fail_with(&self, code: u16, reason: impl Into<String>) {
        self.state.lock().failure = Some((code, reason.into()));
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn clear_failure(&self) {
        let mut state = self.state.lock();
        state.failure = None;
        state.unavailable = false;
    }

    fn check(state: &ClusterState, method: &str, path: &str) -> Result<()> {
        if state.unavailable {
            return Err(RuntimeError::cluster_unavailable(format!(
                "{} {}: connection refused",
                method, path
            )));
        }
        if let Some((code, reason)) = &state.failure {
            return Err(RuntimeError::api_error(
                method,
                path,
                *code,
                reason.clone(),
                "injected failure",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn get(&self, key: &ResourceKey) -> Result<Option<Value>> {
        let state = self.state.lock();
        Self::check(&state, "GET", &key.api_path())?;
        Ok(state.objects.get(key).cloned())
    }

    async fn apply(&self, object: &Value, field_manager: &str) -> Result<Value> {
        let key = ResourceKey::from_object(object)?;
        let mut state = self.state.lock();
        Self::check(&state, "PATCH", &key.api_path())?;

        state.applies += 1;
        let foreign = state.foreign.get(&key).cloned();
        let stored = state
            .objects
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Default::default()));
        merge(stored, object);
        if let Some(foreign) = &foreign {
            keep_foreign_entries(stored, foreign);
        }
        debug!("Mock: applied {} as {}", key, field_manager);
        Ok(stored.clone())
    }

    async fn list(
        &self,
        resource_type: &ResourceType,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>> {
        let state = self.state.lock();
        Self::check(&state, "GET", &resource_type.list_path())?;
        Ok(state
            .objects
            .iter()
            .filter(|(key, object)| key.gvk == resource_type.gvk && labels_match(object, labels))
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        let mut state = self.state.lock();
        Self::check(&state, "DELETE", &key.api_path())?;
        state.deletes += 1;
        state.foreign.remove(key);
        if state.objects.remove(key).is_some() {
            debug!("Mock: deleted {}", key);
        }
        Ok(())
    }
}

#[derive(Default)]
struct ContainerState {
    connectable: bool,
    files: BTreeMap<String, Vec<u8>>,
    plan: Layer,
    forced_states: BTreeMap<String, ServiceState>,
    running: BTreeMap<String, ServiceState>,
    pushes: usize,
    layers_added: usize,
    replans: usize,
}

/// In-memory workload container for tests
///
/// `replan` starts every enabled service in the plan unless a state was
/// forced with `set_service_state`.
pub struct MockContainer {
    name: String,
    state: Mutex<ContainerState>,
}

impl MockContainer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ContainerState {
                connectable: true,
                ..Default::default()
            }),
        }
    }

    pub fn set_can_connect(&self, connectable: bool) {
        self.state.lock().connectable = connectable;
    }

    pub fn set_service_state(&self, service: impl Into<String>, state: ServiceState) {
        let service = service.into();
        let mut inner = self.state.lock();
        inner.running.insert(service.clone(), state);
        inner.forced_states.insert(service, state);
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(path).cloned()
    }

    pub fn current_plan(&self) -> Layer {
        self.state.lock().plan.clone()
    }

    pub fn push_count(&self) -> usize {
        self.state.lock().pushes
    }

    pub fn layer_count(&self) -> usize {
        self.state.lock().layers_added
    }

    pub fn replan_count(&self) -> usize {
        self.state.lock().replans
    }

    fn unreachable(&self) -> RuntimeError {
        RuntimeError::container_unreachable(&self.name, "pebble socket not ready")
    }
}

#[async_trait]
impl WorkloadContainer for MockContainer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn can_connect(&self) -> bool {
        self.state.lock().connectable
    }

    async fn pull(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock();
        if !state.connectable {
            return Err(self.unreachable());
        }
        Ok(state.files.get(path).cloned())
    }

    async fn push(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if !state.connectable {
            return Err(self.unreachable());
        }
        state.pushes += 1;
        state.files.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn plan(&self) -> Result<Layer> {
        let state = self.state.lock();
        if !state.connectable {
            return Err(self.unreachable());
        }
        Ok(state.plan.clone())
    }

    async fn add_layer(&self, label: &str, layer: &Layer) -> Result<()> {
        let mut state = self.state.lock();
        if !state.connectable {
            return Err(self.unreachable());
        }
        state.layers_added += 1;
        state.plan.combine(layer);
        debug!("Mock: added layer {} to {}", label, self.name);
        Ok(())
    }

    async fn replan(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.connectable {
            return Err(self.unreachable());
        }
        state.replans += 1;

        let services: Vec<(String, Option<Startup>)> = state
            .plan
            .services
            .iter()
            .map(|(name, spec)| (name.clone(), spec.startup))
            .collect();
        for (name, startup) in services {
            let current = match state.forced_states.get(&name) {
                Some(forced) => *forced,
                None if startup == Some(Startup::Enabled) => ServiceState::Active,
                None => ServiceState::Inactive,
            };
            state.running.insert(name, current);
        }
        Ok(())
    }

    async fn services(&self, names: &[&str]) -> Result<Vec<ServiceInfo>> {
        let state = self.state.lock();
        if !state.connectable {
            return Err(self.unreachable());
        }
        Ok(names
            .iter()
            .filter_map(|name| {
                let spec = state.plan.services.get(*name)?;
                Some(ServiceInfo {
                    name: name.to_string(),
                    startup: spec.startup.map(|s| s.to_string()).unwrap_or_default(),
                    current: state
                        .running
                        .get(*name)
                        .copied()
                        .unwrap_or(ServiceState::Inactive),
                })
            })
            .collect())
    }
}

#[derive(Default)]
struct UnitState {
    leader: bool,
    leader_error: bool,
    relations: BTreeMap<String, Relation>,
    app_data: BTreeMap<String, BTreeMap<String, String>>,
    statuses: Vec<Status>,
}

/// In-memory Juju unit for tests
#[derive(Default)]
pub struct MockUnit {
    state: Mutex<UnitState>,
}

impl MockUnit {
    pub fn new(leader: bool) -> Self {
        let unit = Self::default();
        unit.set_leader(leader);
        unit
    }

    pub fn set_leader(&self, leader: bool) {
        self.state.lock().leader = leader;
    }

    /// Make `is_leader` fail, as when the hook tool is unavailable
    pub fn fail_leader_query(&self, fail: bool) {
        self.state.lock().leader_error = fail;
    }

    /// Add or replace the relation on its endpoint
    pub fn add_relation(&self, relation: Relation) {
        self.state
            .lock()
            .relations
            .insert(relation.name.clone(), relation);
    }

    pub fn remove_relation(&self, endpoint: &str) {
        self.state.lock().relations.remove(endpoint);
    }

    /// Local application data written to the relation on `endpoint`
    pub fn app_data(&self, endpoint: &str) -> BTreeMap<String, String> {
        self.state
            .lock()
            .app_data
            .get(endpoint)
            .cloned()
            .unwrap_or_default()
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.state.lock().statuses.clone()
    }

    pub fn last_status(&self) -> Option<Status> {
        self.state.lock().statuses.last().cloned()
    }
}

#[async_trait]
impl UnitContext for MockUnit {
    async fn is_leader(&self) -> Result<bool> {
        let state = self.state.lock();
        if state.leader_error {
            return Err(RuntimeError::command_failed(
                "is-leader --format=json",
                1,
                "cannot reach the controller",
            ));
        }
        Ok(state.leader)
    }

    async fn relation(&self, endpoint: &str) -> Result<Option<Relation>> {
        Ok(self.state.lock().relations.get(endpoint).cloned())
    }

    async fn set_app_data(
        &self,
        relation: &Relation,
        data: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if !state.leader {
            return Err(RuntimeError::command_failed(
                format!("relation-set -r {} --app", relation.id),
                1,
                "cannot write relation settings: not the leader",
            ));
        }
        state
            .app_data
            .entry(relation.name.clone())
            .or_default()
            .extend(data.clone());
        Ok(())
    }

    async fn set_status(&self, status: &Status) -> Result<()> {
        self.state.lock().statuses.push(status.clone());
        Ok(())
    }
}
