use std::collections::VecDeque;
use std::sync::Mutex;

use crate::spec::AppSpec;
use crate::workflow::engine::Execution;

/// Query surface for workflow executions.
pub trait ExecutionStore: Send + Sync {
    /// Insert or replace (by id) an execution record.
    fn put(&self, execution: Execution);
    fn get(&self, id: &str) -> Option<Execution>;
    /// All retained executions, oldest first.
    fn list(&self) -> Vec<Execution>;
}

/// Storage for accepted AppSpecs, keyed by `layout.id`.
pub trait AppStore: Send + Sync {
    fn put_app(&self, spec: AppSpec) -> String;
    fn get_app(&self, id: &str) -> Option<AppSpec>;
    fn list_apps(&self) -> Vec<AppSpec>;
}

/// Bounded, insertion-ordered map. Once full, the oldest entry is evicted.
pub struct RingStore<T> {
    capacity: usize,
    key: fn(&T) -> String,
    entries: Mutex<VecDeque<T>>,
}

impl<T: Clone> RingStore<T> {
    pub fn new(capacity: usize, key: fn(&T) -> String) -> Self {
        Self {
            capacity: capacity.max(1),
            key,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&self, item: T) -> String {
        let id = (self.key)(&item);
        let Ok(mut entries) = self.entries.lock() else {
            return id;
        };
        if let Some(slot) = entries.iter_mut().find(|existing| (self.key)(existing) == id) {
            *slot = item;
            return id;
        }
        entries.push_back(item);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        id
    }

    pub fn get(&self, id: &str) -> Option<T> {
        let entries = self.entries.lock().ok()?;
        entries.iter().find(|item| (self.key)(item) == id).cloned()
    }

    pub fn list(&self) -> Vec<T> {
        self.entries
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }
}

pub type MemoryExecutionStore = RingStore<Execution>;
pub type MemoryAppStore = RingStore<AppSpec>;

impl RingStore<Execution> {
    pub fn for_executions(capacity: usize) -> Self {
        Self::new(capacity, |execution| execution.id.clone())
    }
}

impl RingStore<AppSpec> {
    pub fn for_apps(capacity: usize) -> Self {
        Self::new(capacity, |spec| spec.layout.id.clone())
    }
}

impl ExecutionStore for RingStore<Execution> {
    fn put(&self, execution: Execution) {
        self.insert(execution);
    }

    fn get(&self, id: &str) -> Option<Execution> {
        RingStore::get(self, id)
    }

    fn list(&self) -> Vec<Execution> {
        RingStore::list(self)
    }
}

impl AppStore for RingStore<AppSpec> {
    fn put_app(&self, spec: AppSpec) -> String {
        self.insert(spec)
    }

    fn get_app(&self, id: &str) -> Option<AppSpec> {
        self.get(id)
    }

    fn list_apps(&self) -> Vec<AppSpec> {
        self.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Item {
        id: &'static str,
        value: u32,
    }

    fn store(capacity: usize) -> RingStore<Item> {
        RingStore::new(capacity, |item| item.id.to_string())
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let ring = store(2);
        ring.insert(Item { id: "a", value: 1 });
        ring.insert(Item { id: "b", value: 2 });
        ring.insert(Item { id: "c", value: 3 });
        assert_eq!(ring.len(), 2);
        assert!(ring.get("a").is_none());
        let ids: Vec<_> = ring.list().iter().map(|item| item.id).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn replaces_in_place_by_key() {
        let ring = store(3);
        ring.insert(Item { id: "a", value: 1 });
        ring.insert(Item { id: "b", value: 2 });
        ring.insert(Item { id: "a", value: 9 });
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.get("a").unwrap().value, 9);
        assert_eq!(ring.list()[0].id, "a");
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let ring = store(0);
        ring.insert(Item { id: "a", value: 1 });
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.len(), 1);
    }
}
