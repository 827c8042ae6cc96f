//! Binding registry for a single context
//!
//! Uses DashMap for lock-free concurrent access. Each entry remembers when it
//! was first registered so listings come back in registration order.

use crate::binding::Binding;
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone)]
struct RegistryEntry {
    seq: u64,
    binding: Arc<Binding>,
}

/// Thread-safe map from key to binding.
pub(crate) struct BindingRegistry {
    entries: DashMap<String, RegistryEntry, RandomState>,
    next_seq: AtomicU64,
}

impl BindingRegistry {
    /// Create an empty registry.
    ///
    /// Uses 8 shards; contexts typically hold few bindings and child
    /// contexts are created per request.
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::with_capacity_and_hasher_and_shard_amount(
                0,
                RandomState::new(),
                8,
            ),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Insert a binding, returning the one it replaced.
    ///
    /// A replacement keeps the registration position of the binding it
    /// replaces.
    pub(crate) fn insert(&self, binding: Arc<Binding>) -> Option<Arc<Binding>> {
        match self.entries.entry(binding.key().to_string()) {
            Entry::Occupied(mut occupied) => {
                let seq = occupied.get().seq;
                let old = occupied.insert(RegistryEntry { seq, binding });
                Some(old.binding)
            }
            Entry::Vacant(vacant) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                vacant.insert(RegistryEntry { seq, binding });
                None
            }
        }
    }

    /// Look up a binding by key
    #[inline]
    pub(crate) fn get(&self, key: &str) -> Option<Arc<Binding>> {
        self.entries.get(key).map(|e| Arc::clone(&e.binding))
    }

    /// Check if key exists
    #[inline]
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove `key` only if it still maps to `binding`
    pub(crate) fn remove_if_same(&self, key: &str, binding: &Arc<Binding>) -> bool {
        self.entries
            .remove_if(key, |_, e| Arc::ptr_eq(&e.binding, binding))
            .is_some()
    }

    /// All bindings in registration order
    pub(crate) fn bindings(&self) -> Vec<Arc<Binding>> {
        let mut found: Vec<RegistryEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        found.sort_by_key(|e| e.seq);
        found.into_iter().map(|e| e.binding).collect()
    }

    /// Remove every binding, returning them in registration order
    pub(crate) fn drain(&self) -> Vec<Arc<Binding>> {
        let bindings = self.bindings();
        for binding in &bindings {
            self.remove_if_same(binding.key(), binding);
        }
        bindings
    }

    /// Get number of registered bindings
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingRegistry")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(bindings: &[Arc<Binding>]) -> Vec<&str> {
        bindings.iter().map(|b| b.key()).collect()
    }

    #[test]
    fn test_registry_insert_and_get() {
        let registry = BindingRegistry::new();
        assert!(registry.insert(Binding::bind("foo")).is_none());

        assert!(registry.contains("foo"));
        assert_eq!(registry.get("foo").unwrap().key(), "foo");
        assert!(registry.get("bar").is_none());
    }

    #[test]
    fn test_registry_preserves_registration_order() {
        let registry = BindingRegistry::new();
        for key in ["c", "a", "b"] {
            registry.insert(Binding::bind(key));
        }
        assert_eq!(keys(&registry.bindings()), vec!["c", "a", "b"]);

        // replacing keeps the original position
        let replaced = registry.insert(Binding::bind("c"));
        assert!(replaced.is_some());
        assert_eq!(keys(&registry.bindings()), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_registry_remove() {
        let registry = BindingRegistry::new();
        let foo = Binding::bind("foo");
        registry.insert(Arc::clone(&foo));

        assert!(!registry.remove_if_same("foo", &Binding::bind("foo")));
        assert!(registry.remove_if_same("foo", &foo));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_drain() {
        let registry = BindingRegistry::new();
        registry.insert(Binding::bind("a"));
        registry.insert(Binding::bind("b"));
        assert_eq!(keys(&registry.drain()), vec!["a", "b"]);
        assert_eq!(registry.len(), 0);
    }
}
