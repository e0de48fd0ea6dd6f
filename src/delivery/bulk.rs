//! Bulk delivery slots
//!
//! A slot holds at most one pending entry per external id. A rerun of the
//! same test inside one session goes to a later slot, so slots flushed in
//! order keep the reruns in order.

use indexmap::IndexMap;

use crate::api::{AutotestPost, AutotestPut, TestResultPost};

/// Work items to link and unlink after an update flush
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkItemDiff {
    pub autotest_id: String,
    pub link: Vec<String>,
    pub unlink: Vec<String>,
}

impl WorkItemDiff {
    /// Compare linked work items with the declared ones
    pub fn compute(
        autotest_id: impl Into<String>,
        current: &[String],
        desired: &[String],
        allow_unlink: bool,
    ) -> Self {
        let unlink = if allow_unlink {
            current
                .iter()
                .filter(|id| !desired.contains(id))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        let link = desired
            .iter()
            .filter(|id| !current.contains(id))
            .cloned()
            .collect();

        Self {
            autotest_id: autotest_id.into(),
            link,
            unlink,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.link.is_empty() && self.unlink.is_empty()
    }
}

/// Pending create with its paired result
#[derive(Clone, Debug)]
pub struct CreateEntry {
    pub autotest: AutotestPost,
    pub result: TestResultPost,
}

/// Pending update with its paired result and link changes
#[derive(Clone, Debug)]
pub struct UpdateEntry {
    pub autotest: AutotestPut,
    pub result: TestResultPost,
    pub work_items: WorkItemDiff,
}

/// Ordered set of slots for one kind of entry
#[derive(Debug)]
pub struct BulkSlots<T> {
    capacity: usize,
    slots: Vec<IndexMap<String, T>>,
}

impl<T> BulkSlots<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: Vec::new(),
        }
    }

    /// Add an entry. Returns the entries of its slot when that slot is full,
    /// removing the slot.
    pub fn push(&mut self, external_id: impl Into<String>, entry: T) -> Option<Vec<T>> {
        let external_id = external_id.into();
        let index = match self
            .slots
            .iter()
            .position(|slot| slot.len() < self.capacity && !slot.contains_key(&external_id))
        {
            Some(index) => index,
            None => {
                self.slots.push(IndexMap::new());
                self.slots.len() - 1
            }
        };

        self.slots[index].insert(external_id, entry);

        if self.slots[index].len() >= self.capacity {
            Some(self.slots.remove(index).into_values().collect())
        } else {
            None
        }
    }

    /// Take every non-empty slot, in slot order
    pub fn drain_all(&mut self) -> Vec<Vec<T>> {
        self.slots
            .drain(..)
            .filter(|slot| !slot.is_empty())
            .map(|slot| slot.into_values().collect())
            .collect()
    }

    /// Index of every slot holding `external_id`
    pub fn slots_of(&self, external_id: &str) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.contains_key(external_id))
            .map(|(index, _)| index)
            .collect()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn pending(&self) -> usize {
        self.slots.iter().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}
