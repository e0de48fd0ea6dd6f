//! Step and fixture tree building
//!
//! Everything that turns open/close events into result trees. A
//! [`RunContext`] bundles the pieces for one run and is passed explicitly to
//! whoever produces events.

mod fixtures;
mod item;
mod tree;

pub use fixtures::FixtureManager;
pub use item::{ActiveFixture, ContextItem, NodeRef, OpenNode, Scope};
pub use tree::{DrainedSteps, StepFinish, StepHandle, StepStart, StepTree, DEFAULT_MAX_DEPTH};

use std::sync::Arc;

use crate::context::ContextStore;

/// Execution context, step tree and fixture manager of one run
///
/// The thread that creates it becomes the primary context.
pub struct RunContext {
    pub store: Arc<ContextStore<ContextItem>>,
    pub steps: Arc<StepTree>,
    pub fixtures: FixtureManager,
}

impl RunContext {
    pub fn new(max_depth: usize) -> Self {
        let store = Arc::new(ContextStore::new());
        let steps = Arc::new(StepTree::new(store.clone(), max_depth));
        let fixtures = FixtureManager::new(store.clone(), steps.clone());
        Self {
            store,
            steps,
            fixtures,
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}
