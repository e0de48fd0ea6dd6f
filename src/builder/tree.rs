//! Step tree builder
//!
//! Turns paired start/finish events into nested [`StepResult`] trees. Nodes
//! live in a per-thread arena and are addressed by index; open nodes are
//! tracked in the shared [`ContextStore`] under the key returned by
//! [`StepTree::start_step`], so finish events correlate by identifier rather
//! than by title.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

use super::item::{step_id, step_key, ContextItem, NodeRef, OpenNode, Scope};
use crate::context::ContextStore;
use crate::models::{Outcome, StepDefinition, StepResult};

/// Nesting depth kept for compatibility with existing reports
pub const DEFAULT_MAX_DEPTH: usize = 14;

/// Data known when a step opens
#[derive(Clone, Debug, Default)]
pub struct StepStart {
    pub title: String,
    pub description: Option<String>,
    pub parameters: BTreeMap<String, String>,
}

impl StepStart {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Data reported when a step closes
#[derive(Clone, Debug, Default)]
pub struct StepFinish {
    pub outcome: Option<Outcome>,
    pub started_on: Option<DateTime<Utc>>,
    pub completed_on: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub attachments: Vec<String>,
}

impl StepFinish {
    pub fn outcome(outcome: Outcome) -> Self {
        Self {
            outcome: Some(outcome),
            ..Default::default()
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    fn apply(self, result: &mut StepResult) {
        if let Some(started) = self.started_on {
            result.started_on = Some(started);
        }
        let completed = self.completed_on.unwrap_or_else(Utc::now);
        result.completed_on = Some(completed);
        result.duration_ms = self.duration_ms.unwrap_or_else(|| {
            result
                .started_on
                .map(|started| (completed - started).num_milliseconds().max(0) as u64)
                .unwrap_or(0)
        });
        result.outcome = self.outcome;
        result.attachments.extend(self.attachments);
    }
}

/// Handle returned by `start_step`, required by the matching finish
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StepHandle {
    key: String,
}

impl StepHandle {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Trees accumulated by one thread, split by scope
#[derive(Clone, Debug, Default)]
pub struct DrainedSteps {
    pub setup: Vec<StepResult>,
    pub body: Vec<StepResult>,
    pub teardown: Vec<StepResult>,
}

impl DrainedSteps {
    /// Static step shape of the test body
    pub fn definitions(&self) -> Vec<StepDefinition> {
        self.body.iter().map(StepResult::definition).collect()
    }

    pub fn node_count(&self) -> usize {
        self.setup
            .iter()
            .chain(&self.body)
            .chain(&self.teardown)
            .map(StepResult::node_count)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.setup.is_empty() && self.body.is_empty() && self.teardown.is_empty()
    }
}

struct StepNode {
    result: StepResult,
    children: Vec<usize>,
    scope: Scope,
}

struct Arena {
    generation: u64,
    nodes: Vec<StepNode>,
    roots: Vec<usize>,
}

impl Arena {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            nodes: Vec::new(),
            roots: Vec::new(),
        }
    }

    fn index_of(&self, node: NodeRef) -> Option<usize> {
        (node.generation == self.generation && node.index < self.nodes.len()).then_some(node.index)
    }

    /// Materialize the subtree rooted at `root`
    fn build(&mut self, root: usize) -> StepResult {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(index) = stack.pop() {
            order.push(index);
            stack.extend(self.nodes[index].children.iter().copied());
        }

        // children always sit at higher indices than their parent
        order.sort_unstable_by(|a, b| b.cmp(a));

        let mut built: HashMap<usize, StepResult> = HashMap::new();
        for index in order {
            let node = &mut self.nodes[index];
            let mut result = std::mem::take(&mut node.result);
            result.step_results = node
                .children
                .iter()
                .filter_map(|child| built.remove(child))
                .collect();
            built.insert(index, result);
        }
        built.remove(&root).unwrap_or_default()
    }
}

/// Builder for step trees shared by every thread of one run
pub struct StepTree {
    store: Arc<ContextStore<ContextItem>>,
    arenas: Mutex<HashMap<ThreadId, Arena>>,
    max_depth: usize,
    next_generation: AtomicU64,
    next_key: AtomicU64,
}

impl StepTree {
    pub fn new(store: Arc<ContextStore<ContextItem>>, max_depth: usize) -> Self {
        Self {
            store,
            arenas: Mutex::new(HashMap::new()),
            max_depth,
            next_generation: AtomicU64::new(0),
            next_key: AtomicU64::new(0),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Open a step under the innermost open node visible to this thread
    pub fn start_step(&self, key: Option<String>, start: StepStart) -> StepHandle {
        let parent = self
            .store
            .get_last_matching(|item| item.open_node().is_some())
            .and_then(|(_, item)| item.open_node());

        let open = self.open(Scope::Body, start, parent);
        let key = key.unwrap_or_else(|| {
            format!("step-{}", self.next_key.fetch_add(1, Ordering::Relaxed))
        });
        self.store.put(step_key(&key), ContextItem::Step(open));
        StepHandle { key }
    }

    /// Open a root node in `scope` without registering it in the context
    pub fn start_root(&self, scope: Scope, start: StepStart) -> OpenNode {
        self.open(scope, start, None)
    }

    fn open(&self, scope: Scope, start: StepStart, parent: Option<OpenNode>) -> OpenNode {
        let depth = parent.map_or(1, |p| p.depth + 1);
        let scope = parent.map_or(scope, |p| p.scope);

        if parent.is_some_and(|p| p.is_discarded()) {
            debug!(title = %start.title, depth, "Dropping step nested under a discarded step");
            return OpenNode {
                node: None,
                depth,
                scope,
            };
        }
        if depth > self.max_depth {
            warn!(
                title = %start.title,
                depth,
                max_depth = self.max_depth,
                "Maximum step nesting depth reached, step content discarded"
            );
            return OpenNode {
                node: None,
                depth,
                scope,
            };
        }

        let parent_ref = parent.and_then(|p| p.node);
        let owner = match parent_ref {
            Some(node) => node.owner,
            None => self.store.resolve(thread::current().id()),
        };

        let mut arenas = self.arenas.lock();
        let arena = arenas
            .entry(owner)
            .or_insert_with(|| Arena::new(self.next_generation.fetch_add(1, Ordering::Relaxed)));

        let parent_index = parent_ref.and_then(|node| arena.index_of(node));
        if parent_ref.is_some() && parent_index.is_none() {
            warn!(title = %start.title, "Parent step belongs to a drained tree, opening as root");
        }

        let index = arena.nodes.len();
        arena.nodes.push(StepNode {
            result: StepResult {
                title: start.title,
                description: start.description,
                parameters: start.parameters,
                started_on: Some(Utc::now()),
                ..Default::default()
            },
            children: Vec::new(),
            scope,
        });
        match parent_index {
            Some(p) => arena.nodes[p].children.push(index),
            None => arena.roots.push(index),
        }

        OpenNode {
            node: Some(NodeRef {
                owner,
                generation: arena.generation,
                index,
            }),
            depth,
            scope,
        }
    }

    /// Close the step opened under `handle`
    ///
    /// Returns false, with a warning, when no such step is open on this
    /// thread.
    pub fn finish_step(&self, handle: &StepHandle, finish: StepFinish) -> bool {
        let key = step_key(&handle.key);
        if self.store.update(&key, |item| item.is_step()) != Some(true) {
            warn!(step = %handle.key, "Finish for a step that is not open, ignoring");
            return false;
        }

        let was_innermost = self.store.read(|view| {
            view.last_matching(ContextItem::is_step)
                .is_some_and(|(id, _)| id == key)
        });
        if !was_innermost {
            warn!(step = %handle.key, "Step closed while nested steps are still open");
        }

        match self.store.remove(&key) {
            Some(ContextItem::Step(open)) => {
                self.close(&open, finish);
                true
            }
            _ => false,
        }
    }

    /// Close the innermost step opened by this thread
    pub fn finish_last_step(&self, finish: StepFinish) -> bool {
        let key = self.store.read(|view| {
            if view.is_inherited() {
                None
            } else {
                view.last_matching(ContextItem::is_step)
                    .and_then(|(id, _)| step_id(id))
                    .map(str::to_string)
            }
        });

        match key {
            Some(key) => self.finish_step(&StepHandle { key }, finish),
            None => {
                warn!("Finish without an open step, ignoring");
                false
            }
        }
    }

    /// Write finish data onto an open node
    pub fn close(&self, open: &OpenNode, finish: StepFinish) {
        let Some(node) = open.node else {
            return;
        };
        let mut arenas = self.arenas.lock();
        let Some(arena) = arenas.get_mut(&node.owner) else {
            warn!("Closing a step whose tree was already drained");
            return;
        };
        match arena.index_of(node) {
            Some(index) => finish.apply(&mut arena.nodes[index].result),
            None => warn!("Closing a step whose tree was already drained"),
        }
    }

    /// Detach a root node and return it with its children
    pub fn take_subtree(&self, open: &OpenNode) -> Option<StepResult> {
        let node = open.node?;
        let mut arenas = self.arenas.lock();
        let arena = arenas.get_mut(&node.owner)?;
        let index = arena.index_of(node)?;
        arena.roots.retain(|root| *root != index);
        Some(arena.build(index))
    }

    /// Return this thread's accumulated trees and start a fresh one
    ///
    /// Steps and fixtures still open on this thread are dropped from the
    /// context. Roots of dropped fixtures are discarded: their record lives
    /// in a container, not in the drained trees.
    pub fn drain_and_reset(&self) -> DrainedSteps {
        let current = thread::current().id();
        let abandoned: Vec<NodeRef> = self.store.read(|view| {
            if view.is_inherited() {
                return Vec::new();
            }
            view.iter()
                .filter_map(|(_, item)| match item {
                    ContextItem::Fixture(fixture) => fixture.open.node,
                    _ => None,
                })
                .filter(|node| node.owner == current)
                .collect()
        });

        let steps = self.store.retain_own(|item| !item.is_step());
        if steps > 0 {
            warn!(count = steps, "Unfinished steps dropped at test end");
        }
        let fixtures = self.store.retain_own(|item| !item.is_fixture());
        if fixtures > 0 {
            warn!(count = fixtures, "Unfinished fixtures dropped at test end");
        }

        let Some(mut arena) = self.arenas.lock().remove(&current) else {
            return DrainedSteps::default();
        };

        let mut drained = DrainedSteps::default();
        let roots = std::mem::take(&mut arena.roots);
        for root in roots {
            if abandoned.iter().any(|node| arena.index_of(*node) == Some(root)) {
                continue;
            }
            let scope = arena.nodes[root].scope;
            let result = arena.build(root);
            match scope {
                Scope::Setup => drained.setup.push(result),
                Scope::Body => drained.body.push(result),
                Scope::Teardown => drained.teardown.push(result),
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(max_depth: usize) -> StepTree {
        StepTree::new(Arc::new(ContextStore::new()), max_depth)
    }

    #[test]
    fn test_balanced_events_build_nested_tree() {
        let tree = tree(DEFAULT_MAX_DEPTH);

        let a = tree.start_step(None, StepStart::new("a"));
        let a1 = tree.start_step(None, StepStart::new("a1"));
        let a1x = tree.start_step(None, StepStart::new("a1x"));
        assert!(tree.finish_step(&a1x, StepFinish::outcome(Outcome::Passed)));
        assert!(tree.finish_step(&a1, StepFinish::outcome(Outcome::Passed)));
        let a2 = tree.start_step(None, StepStart::new("a2"));
        assert!(tree.finish_step(&a2, StepFinish::outcome(Outcome::Failed)));
        assert!(tree.finish_step(&a, StepFinish::outcome(Outcome::Failed)));
        let b = tree.start_step(None, StepStart::new("b"));
        assert!(tree.finish_step(&b, StepFinish::outcome(Outcome::Passed)));

        let drained = tree.drain_and_reset();
        assert_eq!(drained.node_count(), 5);
        assert_eq!(drained.body.len(), 2);

        let a = &drained.body[0];
        assert_eq!(a.title, "a");
        assert_eq!(a.step_results.len(), 2);
        assert_eq!(a.step_results[0].title, "a1");
        assert_eq!(a.step_results[0].step_results[0].title, "a1x");
        assert_eq!(a.step_results[1].title, "a2");
        assert_eq!(a.step_results[1].outcome, Some(Outcome::Failed));
        assert_eq!(drained.body[1].title, "b");
    }

    #[test]
    fn test_finish_records_reported_duration() {
        let tree = tree(DEFAULT_MAX_DEPTH);
        let step = tree.start_step(None, StepStart::new("timed"));
        tree.finish_step(&step, StepFinish::outcome(Outcome::Passed).with_duration(250));

        let drained = tree.drain_and_reset();
        assert_eq!(drained.body[0].duration_ms, 250);
        assert!(drained.body[0].completed_on.is_some());
    }

    #[test]
    fn test_finish_without_open_step_is_noop() {
        let tree = tree(DEFAULT_MAX_DEPTH);
        assert!(!tree.finish_last_step(StepFinish::outcome(Outcome::Passed)));

        let step = tree.start_step(None, StepStart::new("once"));
        assert!(tree.finish_step(&step, StepFinish::outcome(Outcome::Passed)));
        assert!(!tree.finish_step(&step, StepFinish::outcome(Outcome::Failed)));

        let drained = tree.drain_and_reset();
        assert_eq!(drained.body[0].outcome, Some(Outcome::Passed));
    }

    #[test]
    fn test_positional_finish_pops_innermost() {
        let tree = tree(DEFAULT_MAX_DEPTH);
        tree.start_step(None, StepStart::new("outer"));
        tree.start_step(None, StepStart::new("inner"));
        assert!(tree.finish_last_step(StepFinish::outcome(Outcome::Failed)));
        assert!(tree.finish_last_step(StepFinish::outcome(Outcome::Passed)));

        let drained = tree.drain_and_reset();
        assert_eq!(drained.body[0].outcome, Some(Outcome::Passed));
        assert_eq!(drained.body[0].step_results[0].outcome, Some(Outcome::Failed));
    }

    #[test]
    fn test_same_titles_correlate_by_handle() {
        let tree = tree(DEFAULT_MAX_DEPTH);
        let first = tree.start_step(Some("first".into()), StepStart::new("retry"));
        assert!(tree.finish_step(&first, StepFinish::outcome(Outcome::Failed)));
        let second = tree.start_step(Some("second".into()), StepStart::new("retry"));
        assert!(tree.finish_step(&second, StepFinish::outcome(Outcome::Passed)));

        let drained = tree.drain_and_reset();
        assert_eq!(drained.body[0].outcome, Some(Outcome::Failed));
        assert_eq!(drained.body[1].outcome, Some(Outcome::Passed));
    }

    #[test]
    fn test_depth_cap_discards_without_corrupting() {
        let tree = tree(2);
        let l1 = tree.start_step(None, StepStart::new("l1"));
        let l2 = tree.start_step(None, StepStart::new("l2"));
        let l3 = tree.start_step(None, StepStart::new("l3"));
        let l4 = tree.start_step(None, StepStart::new("l4"));
        assert!(tree.finish_step(&l4, StepFinish::outcome(Outcome::Passed)));
        assert!(tree.finish_step(&l3, StepFinish::outcome(Outcome::Passed)));
        assert!(tree.finish_step(&l2, StepFinish::outcome(Outcome::Passed)));
        let sibling = tree.start_step(None, StepStart::new("l2b"));
        assert!(tree.finish_step(&sibling, StepFinish::outcome(Outcome::Passed)));
        assert!(tree.finish_step(&l1, StepFinish::outcome(Outcome::Passed)));

        let drained = tree.drain_and_reset();
        assert_eq!(drained.node_count(), 3);
        let l1 = &drained.body[0];
        assert_eq!(l1.step_results.len(), 2);
        assert!(l1.step_results[0].step_results.is_empty());
        assert_eq!(l1.step_results[1].title, "l2b");
    }

    #[test]
    fn test_helper_thread_steps_nest_under_primary_step() {
        let store = Arc::new(ContextStore::new());
        let tree = Arc::new(StepTree::new(store, DEFAULT_MAX_DEPTH));

        let parent = tree.start_step(None, StepStart::new("spawns helper"));
        let helper_tree = tree.clone();
        std::thread::spawn(move || {
            let child = helper_tree.start_step(None, StepStart::new("from helper"));
            let grandchild = helper_tree.start_step(None, StepStart::new("nested in helper"));
            helper_tree.finish_step(&grandchild, StepFinish::outcome(Outcome::Passed));
            helper_tree.finish_step(&child, StepFinish::outcome(Outcome::Passed));
        })
        .join()
        .unwrap();
        tree.finish_step(&parent, StepFinish::outcome(Outcome::Passed));

        let drained = tree.drain_and_reset();
        assert_eq!(drained.body.len(), 1);
        let child = &drained.body[0].step_results[0];
        assert_eq!(child.title, "from helper");
        assert_eq!(child.step_results[0].title, "nested in helper");
    }

    #[test]
    fn test_drain_resets_between_tests() {
        let tree = tree(DEFAULT_MAX_DEPTH);
        let first = tree.start_step(None, StepStart::new("test one"));
        tree.finish_step(&first, StepFinish::outcome(Outcome::Passed));
        assert_eq!(tree.drain_and_reset().body.len(), 1);

        // an unfinished step does not leak into the next test
        tree.start_step(None, StepStart::new("left open"));
        let drained = tree.drain_and_reset();
        assert_eq!(drained.body.len(), 1);
        assert_eq!(drained.body[0].outcome, None);

        let second = tree.start_step(None, StepStart::new("test two"));
        tree.finish_step(&second, StepFinish::outcome(Outcome::Passed));
        let drained = tree.drain_and_reset();
        assert_eq!(drained.body.len(), 1);
        assert_eq!(drained.body[0].title, "test two");
        assert!(tree.drain_and_reset().is_empty());
    }

    #[test]
    fn test_drain_discards_unstopped_fixture() {
        let tree = tree(DEFAULT_MAX_DEPTH);
        let root = tree.start_root(Scope::Setup, StepStart::new("never stopped"));
        tree.store.put(
            "fixture:fx",
            ContextItem::Fixture(crate::builder::ActiveFixture {
                container_id: "t1".to_string(),
                kind: crate::models::FixtureKind::Before,
                index: 0,
                open: root,
            }),
        );
        tree.start_step(None, StepStart::new("inside fixture"));

        let drained = tree.drain_and_reset();
        assert!(drained.is_empty());
        assert!(tree.store.snapshot_all().is_empty());

        let step = tree.start_step(None, StepStart::new("next test"));
        tree.finish_step(&step, StepFinish::outcome(Outcome::Passed));
        let drained = tree.drain_and_reset();
        assert_eq!(drained.body.len(), 1);
        assert!(drained.setup.is_empty());
    }

    #[test]
    fn test_step_id_matching_other_kind_is_kept_apart() {
        let tree = tree(DEFAULT_MAX_DEPTH);
        tree.store.put("container:t1", ContextItem::Container("t1".to_string()));
        let step = tree.start_step(Some("t1".into()), StepStart::new("same id as test"));
        assert!(tree.store.get("container:t1").is_some());
        assert!(tree.finish_step(&step, StepFinish::outcome(Outcome::Passed)));
        assert!(tree.store.get("container:t1").is_some());
    }

    #[test]
    fn test_take_subtree_detaches_root() {
        let tree = tree(DEFAULT_MAX_DEPTH);
        let root = tree.start_root(Scope::Setup, StepStart::new("fixture"));
        tree.store.put("fx", ContextItem::Step(root));
        let step = tree.start_step(None, StepStart::new("inside fixture"));
        tree.finish_step(&step, StepFinish::outcome(Outcome::Passed));
        tree.store.remove("fx");
        tree.close(&root, StepFinish::outcome(Outcome::Passed));

        let subtree = tree.take_subtree(&root).unwrap();
        assert_eq!(subtree.title, "fixture");
        assert_eq!(subtree.step_results[0].title, "inside fixture");
        assert!(tree.drain_and_reset().is_empty());
    }
}
