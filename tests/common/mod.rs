//! Shared fixtures: an in-memory stateful provider and helpers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use anvil::domain::errors::{EngineError, EngineResult};
use anvil::domain::models::{Action, Resource, ResourceDiff, ResourceState};
use anvil::domain::ports::{absent_state, is_absent, ObservedState, Provider};

/// Shared world state for fake providers: resource ID → observed state.
pub type World = Arc<Mutex<HashMap<String, ObservedState>>>;

pub fn empty_world() -> World {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Seed a resource as present in the world.
pub async fn seed_present(world: &World, id: &str) {
    let mut state = ObservedState::new();
    state.insert("state".to_string(), Value::String("present".to_string()));
    world.lock().await.insert(id.to_string(), state);
}

/// A provider over the shared world. Reads and applies go through the
/// world map; resources listed in `fail_applies` error on apply. Apply
/// order is recorded for assertions.
pub struct FakeProvider {
    pub kind: &'static str,
    pub world: World,
    pub fail_applies: HashSet<String>,
    pub apply_log: Arc<Mutex<Vec<String>>>,
}

impl FakeProvider {
    pub fn new(kind: &'static str, world: World) -> Self {
        Self {
            kind,
            world,
            fail_applies: HashSet::new(),
            apply_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(mut self, name: &str) -> Self {
        self.fail_applies.insert(name.to_string());
        self
    }

    fn desired_properties(resource: &Resource) -> BTreeMap<String, Value> {
        resource
            .properties
            .iter()
            .filter(|(key, _)| key.as_str() != "state")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn type_name(&self) -> &'static str {
        self.kind
    }

    fn validate(&self, resource: &Resource) -> EngineResult<()> {
        resource.validate()
    }

    async fn read(&self, resource: &Resource) -> EngineResult<ObservedState> {
        let world = self.world.lock().await;
        Ok(world.get(&resource.id()).cloned().unwrap_or_else(absent_state))
    }

    fn diff(&self, resource: &Resource, current: &ObservedState) -> EngineResult<ResourceDiff> {
        let id = resource.id();
        let currently_absent = is_absent(current);
        let wants_absent = resource.desired_state() == Some(ResourceState::Absent);

        if wants_absent {
            if currently_absent {
                return Ok(ResourceDiff::noop(id));
            }
            return Ok(ResourceDiff::new(id, Action::Delete).with_change(
                "state",
                "present",
                "absent",
            ));
        }

        if currently_absent {
            let mut diff = ResourceDiff::new(id, Action::Create).with_change(
                "state",
                "absent",
                "present",
            );
            for (key, value) in Self::desired_properties(resource) {
                diff = diff.with_change(key, Value::Null, value);
            }
            return Ok(diff);
        }

        let mut diff = ResourceDiff::new(id.clone(), Action::Update);
        for (key, want) in Self::desired_properties(resource) {
            let have = current.get(&key).cloned().unwrap_or(Value::Null);
            if have != want {
                diff = diff.with_change(key, have, want);
            }
        }
        if diff.changes.is_empty() {
            return Ok(ResourceDiff::noop(id));
        }
        Ok(diff)
    }

    async fn apply(&self, resource: &Resource, diff: &ResourceDiff) -> EngineResult<()> {
        self.apply_log.lock().await.push(resource.id());

        if self.fail_applies.contains(&resource.name) {
            return Err(EngineError::Apply {
                resource_id: resource.id(),
                message: "scripted apply failure".to_string(),
            });
        }

        let mut world = self.world.lock().await;
        match diff.action {
            Action::Noop => {}
            Action::Delete => {
                world.remove(&resource.id());
            }
            Action::Create | Action::Update => {
                let mut state = ObservedState::new();
                state.insert("state".to_string(), Value::String("present".to_string()));
                for (key, value) in Self::desired_properties(resource) {
                    state.insert(key, value);
                }
                // Rollback hands the provider a diff whose target values
                // are the captured prior state; honor them over the
                // resource's declared properties when they disagree.
                if diff.reason.as_deref() == Some("rollback") {
                    state.clear();
                    for (key, change) in &diff.changes {
                        state.insert(key.clone(), change.to.clone());
                    }
                }
                if state
                    .get("state")
                    .and_then(Value::as_str)
                    .map(|s| s == "absent")
                    .unwrap_or(false)
                {
                    world.remove(&resource.id());
                } else {
                    world.insert(resource.id(), state);
                }
            }
        }
        Ok(())
    }
}
