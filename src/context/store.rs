//! Thread-scoped ordered item store
//!
//! Writes always land in the calling thread's own map. Reads go through a
//! [`ContextView`], which is either the caller's own map or, when that map is
//! empty, a read-only view of the primary thread's map.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::thread::{self, ThreadId};

/// Ordered id -> item maps, one per thread
pub struct ContextStore<T> {
    primary: ThreadId,
    contexts: Mutex<HashMap<ThreadId, IndexMap<String, T>>>,
}

impl<T: Clone> ContextStore<T> {
    /// Create a store whose primary context is the calling thread
    pub fn new() -> Self {
        Self::with_primary(thread::current().id())
    }

    pub fn with_primary(primary: ThreadId) -> Self {
        Self {
            primary,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    pub fn primary(&self) -> ThreadId {
        self.primary
    }

    /// Thread whose map serves reads issued from `thread`
    pub fn resolve(&self, thread: ThreadId) -> ThreadId {
        let contexts = self.contexts.lock();
        Self::resolve_locked(&contexts, self.primary, thread)
    }

    fn resolve_locked(
        contexts: &HashMap<ThreadId, IndexMap<String, T>>,
        primary: ThreadId,
        thread: ThreadId,
    ) -> ThreadId {
        let has_own = contexts.get(&thread).is_some_and(|items| !items.is_empty());
        if has_own || thread == primary {
            thread
        } else {
            primary
        }
    }

    /// Run `f` against the context resolved for the calling thread
    ///
    /// The store lock is held while `f` runs; `f` must not call back into
    /// the store.
    pub fn read<R>(&self, f: impl FnOnce(ContextView<'_, T>) -> R) -> R {
        self.read_as(thread::current().id(), f)
    }

    pub fn read_as<R>(&self, thread: ThreadId, f: impl FnOnce(ContextView<'_, T>) -> R) -> R {
        let contexts = self.contexts.lock();
        let owner = Self::resolve_locked(&contexts, self.primary, thread);
        f(ContextView {
            owner,
            inherited: owner != thread,
            items: contexts.get(&owner),
        })
    }

    /// Insert or replace `id` in the calling thread's own map
    pub fn put(&self, id: impl Into<String>, item: T) {
        self.contexts
            .lock()
            .entry(thread::current().id())
            .or_default()
            .insert(id.into(), item);
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.read(|view| view.get(id).cloned())
    }

    /// Most recently inserted item
    pub fn get_last(&self) -> Option<T> {
        self.read(|view| view.last().map(|(_, item)| item.clone()))
    }

    /// Most recently inserted item accepted by `pred`, with its id
    pub fn get_last_matching(&self, pred: impl Fn(&T) -> bool) -> Option<(String, T)> {
        self.read(|view| {
            view.last_matching(pred)
                .map(|(id, item)| (id.to_string(), item.clone()))
        })
    }

    /// Mutate an item in the calling thread's own map
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.contexts
            .lock()
            .get_mut(&thread::current().id())
            .and_then(|items| items.get_mut(id))
            .map(f)
    }

    /// Remove an item from the calling thread's own map
    pub fn remove(&self, id: &str) -> Option<T> {
        let current = thread::current().id();
        let mut contexts = self.contexts.lock();
        let items = contexts.get_mut(&current)?;
        let removed = items.shift_remove(id);
        if items.is_empty() {
            contexts.remove(&current);
        }
        removed
    }

    /// Ordered copy of the context resolved for the calling thread
    pub fn snapshot_all(&self) -> IndexMap<String, T> {
        self.read(|view| view.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    /// Drop every item of the calling thread that `pred` accepts
    pub fn retain_own(&self, pred: impl Fn(&T) -> bool) -> usize {
        let current = thread::current().id();
        let mut contexts = self.contexts.lock();
        let Some(items) = contexts.get_mut(&current) else {
            return 0;
        };
        let before = items.len();
        items.retain(|_, item| pred(item));
        let dropped = before - items.len();
        if items.is_empty() {
            contexts.remove(&current);
        }
        dropped
    }
}

impl<T: Clone> Default for ContextStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of one thread's items
pub struct ContextView<'a, T> {
    owner: ThreadId,
    inherited: bool,
    items: Option<&'a IndexMap<String, T>>,
}

impl<'a, T> ContextView<'a, T> {
    /// Thread owning the viewed map
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// True when the caller is reading the primary thread's map
    pub fn is_inherited(&self) -> bool {
        self.inherited
    }

    pub fn get(&self, id: &str) -> Option<&'a T> {
        self.items.and_then(|items| items.get(id))
    }

    pub fn last(&self) -> Option<(&'a str, &'a T)> {
        self.items
            .and_then(|items| items.last())
            .map(|(id, item)| (id.as_str(), item))
    }

    pub fn last_matching(&self, pred: impl Fn(&T) -> bool) -> Option<(&'a str, &'a T)> {
        self.items.and_then(|items| {
            items
                .iter()
                .rev()
                .find(|(_, item)| pred(item))
                .map(|(id, item)| (id.as_str(), item))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a T)> {
        self.items
            .into_iter()
            .flat_map(|items| items.iter().map(|(id, item)| (id.as_str(), item)))
    }

    pub fn len(&self) -> usize {
        self.items.map_or(0, IndexMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_put_get_remove() {
        let store = ContextStore::new();
        store.put("a", 1);
        store.put("b", 2);

        assert_eq!(store.get("a"), Some(1));
        assert_eq!(store.get_last(), Some(2));
        assert_eq!(store.remove("b"), Some(2));
        assert_eq!(store.get_last(), Some(1));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn test_last_matching_filters_by_kind() {
        let store = ContextStore::new();
        store.put("s1", "step");
        store.put("f1", "fixture");
        store.put("s2", "step");
        store.put("f2", "fixture");

        let (id, _) = store.get_last_matching(|item| *item == "step").unwrap();
        assert_eq!(id, "s2");
    }

    #[test]
    fn test_snapshot_keeps_insertion_order() {
        let store = ContextStore::new();
        store.put("z", 1);
        store.put("a", 2);
        store.put("m", 3);

        let keys: Vec<_> = store.snapshot_all().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_helper_thread_inherits_primary_read_only() {
        let store = Arc::new(ContextStore::new());
        store.put("root", 10);

        let helper = store.clone();
        std::thread::spawn(move || {
            // Empty helper context falls back to the primary's last item
            assert_eq!(helper.get_last(), Some(10));
            assert!(helper.read(|view| view.is_inherited()));

            // Writes create the helper's own map and never touch the primary
            helper.put("child", 20);
            assert_eq!(helper.get_last(), Some(20));
            assert_eq!(helper.remove("root"), None);
        })
        .join()
        .unwrap();

        assert_eq!(store.get_last(), Some(10));
        assert_eq!(store.snapshot_all().len(), 1);
    }

    #[test]
    fn test_concurrent_writers_are_isolated() {
        let store = Arc::new(ContextStore::new());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        store.put(format!("item-{i}"), n);
                    }
                    store.snapshot_all().len()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 100);
        }
        assert!(store.snapshot_all().is_empty());
    }

    #[test]
    fn test_retain_own() {
        let store = ContextStore::new();
        store.put("a", 1);
        store.put("b", 2);
        store.put("c", 3);
        assert_eq!(store.retain_own(|v| v % 2 == 1), 1);
        assert_eq!(store.get("b"), None);
    }
}
