//! Items kept in the execution context while a step or fixture is open

use std::thread::ThreadId;

use crate::models::FixtureKind;

/// Tree a root node belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Setup,
    Body,
    Teardown,
}

impl From<FixtureKind> for Scope {
    fn from(kind: FixtureKind) -> Self {
        match kind {
            FixtureKind::Before => Scope::Setup,
            FixtureKind::After => Scope::Teardown,
        }
    }
}

/// Address of a node in a step arena
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub(crate) owner: ThreadId,
    pub(crate) generation: u64,
    pub(crate) index: usize,
}

/// An open node; `node` is `None` when its content was discarded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenNode {
    pub node: Option<NodeRef>,
    pub depth: usize,
    pub scope: Scope,
}

impl OpenNode {
    pub fn is_discarded(&self) -> bool {
        self.node.is_none()
    }
}

/// A fixture between its start and stop events
#[derive(Clone, Debug)]
pub struct ActiveFixture {
    pub container_id: String,
    pub kind: FixtureKind,
    pub index: usize,
    pub open: OpenNode,
}

#[derive(Clone, Debug)]
pub enum ContextItem {
    Step(OpenNode),
    Fixture(ActiveFixture),
    Container(String),
}

impl ContextItem {
    /// Node new steps should nest under, if this item is one
    pub fn open_node(&self) -> Option<OpenNode> {
        match self {
            ContextItem::Step(open) => Some(*open),
            ContextItem::Fixture(fixture) => Some(fixture.open),
            ContextItem::Container(_) => None,
        }
    }

    pub fn is_step(&self) -> bool {
        matches!(self, ContextItem::Step(_))
    }

    pub fn is_fixture(&self) -> bool {
        matches!(self, ContextItem::Fixture(_))
    }

    pub fn is_container(&self) -> bool {
        matches!(self, ContextItem::Container(_))
    }
}

// Steps, fixtures and containers share one context map; framework ids of
// different kinds may collide, so each kind gets its own key prefix.
const STEP_PREFIX: &str = "step:";

pub(crate) fn step_key(id: &str) -> String {
    format!("{STEP_PREFIX}{id}")
}

/// Framework id of a step key, `None` for other kinds
pub(crate) fn step_id(key: &str) -> Option<&str> {
    key.strip_prefix(STEP_PREFIX)
}

pub(crate) fn fixture_key(id: &str) -> String {
    format!("fixture:{id}")
}

pub(crate) fn container_key(id: &str) -> String {
    format!("container:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_do_not_collide_across_kinds() {
        let keys = [step_key("t1"), fixture_key("t1"), container_key("t1")];
        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[1], keys[2]);
        assert_ne!(keys[0], keys[2]);
        assert_eq!(step_id(&keys[0]), Some("t1"));
        assert_eq!(step_id(&keys[2]), None);
    }
}
