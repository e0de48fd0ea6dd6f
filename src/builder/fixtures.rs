//! Fixture manager
//!
//! Tracks setup ("before") and teardown ("after") fixtures grouped under
//! containers. An active fixture is registered in the execution context
//! under its id until it stops; afterwards it is only reachable through its
//! container.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use super::item::{container_key, fixture_key, ActiveFixture, ContextItem, Scope};
use super::tree::{StepFinish, StepStart, StepTree};
use crate::context::ContextStore;
use crate::models::{ContainerUpdate, FixtureContainer, FixtureKind, FixtureResult, FixtureUpdate};

pub struct FixtureManager {
    store: Arc<ContextStore<ContextItem>>,
    tree: Arc<StepTree>,
    containers: Mutex<IndexMap<String, FixtureContainer>>,
}

impl FixtureManager {
    pub fn new(store: Arc<ContextStore<ContextItem>>, tree: Arc<StepTree>) -> Self {
        Self {
            store,
            tree,
            containers: Mutex::new(IndexMap::new()),
        }
    }

    /// Register a container and make it the current one for this thread
    pub fn start_container(&self, container: FixtureContainer) {
        let id = container.id.clone();
        debug!(container = %id, "Starting fixture container");
        self.containers.lock().insert(id.clone(), container);
        self.store.put(container_key(&id), ContextItem::Container(id));
    }

    /// Merge `update` into the container `id`, or into the most recently
    /// started container visible to this thread when no id is given
    pub fn update_container(&self, id: Option<&str>, update: ContainerUpdate) -> bool {
        let id = match id {
            Some(id) => id.to_string(),
            None => match self.store.get_last_matching(ContextItem::is_container) {
                Some((_, ContextItem::Container(id))) => id,
                _ => {
                    warn!("No active container to update");
                    return false;
                }
            },
        };

        match self.containers.lock().get_mut(&id) {
            Some(container) => {
                update.merge_into(container);
                true
            }
            None => {
                warn!(container = %id, "Unknown container, update ignored");
                false
            }
        }
    }

    /// Remove a container and return it with every fixture it collected
    ///
    /// Fixtures of the container still active on this thread are closed
    /// first; they keep their nested steps and no outcome.
    pub fn stop_container(&self, id: &str) -> Option<FixtureContainer> {
        self.close_unfinished(id);
        self.store.remove(&container_key(id));
        let container = self.containers.lock().shift_remove(id);
        if container.is_none() {
            warn!(container = %id, "Stopping unknown container");
        }
        container
    }

    fn close_unfinished(&self, container_id: &str) {
        let unfinished: Vec<(String, ActiveFixture)> = self.store.read(|view| {
            if view.is_inherited() {
                return Vec::new();
            }
            view.iter()
                .filter_map(|(key, item)| match item {
                    ContextItem::Fixture(active) if active.container_id == container_id => {
                        Some((key.to_string(), active.clone()))
                    }
                    _ => None,
                })
                .collect()
        });

        for (key, active) in unfinished {
            warn!(fixture = %key, container = %container_id, "Fixture never stopped, closing it with its container");
            self.store.remove(&key);
            let steps = self
                .tree
                .take_subtree(&active.open)
                .map(|subtree| subtree.step_results)
                .unwrap_or_default();
            if let Some(fixture) = self
                .containers
                .lock()
                .get_mut(container_id)
                .and_then(|container| container.fixtures_mut(active.kind).get_mut(active.index))
            {
                fixture.steps = steps;
            }
        }
    }

    pub fn container(&self, id: &str) -> Option<FixtureContainer> {
        self.containers.lock().get(id).cloned()
    }

    pub fn start_before_fixture(
        &self,
        container_id: &str,
        fixture_id: &str,
        fixture: FixtureResult,
    ) -> bool {
        self.start_fixture(FixtureKind::Before, container_id, fixture_id, fixture)
    }

    pub fn stop_before_fixture(
        &self,
        fixture_id: &str,
        update: FixtureUpdate,
    ) -> Option<FixtureResult> {
        self.stop_fixture(FixtureKind::Before, fixture_id, update)
    }

    pub fn start_after_fixture(
        &self,
        container_id: &str,
        fixture_id: &str,
        fixture: FixtureResult,
    ) -> bool {
        self.start_fixture(FixtureKind::After, container_id, fixture_id, fixture)
    }

    pub fn stop_after_fixture(
        &self,
        fixture_id: &str,
        update: FixtureUpdate,
    ) -> Option<FixtureResult> {
        self.stop_fixture(FixtureKind::After, fixture_id, update)
    }

    fn start_fixture(
        &self,
        kind: FixtureKind,
        container_id: &str,
        fixture_id: &str,
        fixture: FixtureResult,
    ) -> bool {
        if !self.containers.lock().contains_key(container_id) {
            warn!(container = %container_id, fixture = %fixture_id, "Fixture started for unknown container");
            return false;
        }

        let start = StepStart {
            title: fixture.title.clone(),
            description: fixture.description.clone(),
            parameters: fixture.parameters.clone(),
        };
        let open = self.tree.start_root(Scope::from(kind), start);

        let index = {
            let mut containers = self.containers.lock();
            let Some(container) = containers.get_mut(container_id) else {
                return false;
            };
            let fixtures = container.fixtures_mut(kind);
            fixtures.push(fixture);
            fixtures.len() - 1
        };

        self.store.put(
            fixture_key(fixture_id),
            ContextItem::Fixture(ActiveFixture {
                container_id: container_id.to_string(),
                kind,
                index,
                open,
            }),
        );
        true
    }

    fn stop_fixture(
        &self,
        kind: FixtureKind,
        fixture_id: &str,
        update: FixtureUpdate,
    ) -> Option<FixtureResult> {
        let Some(ContextItem::Fixture(active)) = self.store.remove(&fixture_key(fixture_id)) else {
            warn!(fixture = %fixture_id, "Stop for a fixture that is not active, ignoring");
            return None;
        };
        if active.kind != kind {
            warn!(fixture = %fixture_id, expected = ?kind, actual = ?active.kind, "Fixture stopped with mismatched kind");
        }

        self.tree.close(
            &active.open,
            StepFinish {
                outcome: update.outcome,
                started_on: update.started_on,
                completed_on: update.completed_on,
                duration_ms: update.duration_ms,
                attachments: Vec::new(),
            },
        );
        let steps = self
            .tree
            .take_subtree(&active.open)
            .map(|subtree| subtree.step_results)
            .unwrap_or_default();

        let mut containers = self.containers.lock();
        let fixture = containers
            .get_mut(&active.container_id)?
            .fixtures_mut(active.kind)
            .get_mut(active.index)?;
        update.merge_into(fixture);
        fixture.steps = steps;
        Some(fixture.clone())
    }

    /// Ordered snapshot of the items active for this thread
    pub fn get_all_items(&self) -> IndexMap<String, ContextItem> {
        self.store.snapshot_all()
    }
}
