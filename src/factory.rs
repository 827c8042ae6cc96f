//! Value sources behind a binding and the scoped instance cache
//!
//! A binding is configured with exactly one `BindingSource`. Cached scopes
//! store resolved instances (or in-flight resolutions) in an `InstanceCache`
//! keyed by the id of the context the value belongs to.

use crate::binding::ResolutionContext;
use crate::metadata::ClassDescriptor;
use crate::scope::ContextId;
use crate::{BindingKey, BoxedValue, ContextError, PendingValue, Result, ValueOrPromise};
use futures::FutureExt;
use futures::future::Shared;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

#[cfg(feature = "logging")]
use tracing::trace;

/// Factory invoked for `DynamicValue` bindings
pub type DynamicValueFn =
    Arc<dyn Fn(&ResolutionContext) -> Result<ValueOrPromise<BoxedValue>> + Send + Sync>;

/// Kind of value source a binding is configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum BindingType {
    /// A literal value
    Constant,
    /// A factory called on resolution
    DynamicValue,
    /// A class instantiated with injected dependencies
    Class,
    /// A class whose `value()` produces the bound value
    Provider,
    /// Forwards resolution to another key
    Alias,
}

/// The configured value source of a binding.
#[derive(Clone, Default)]
pub(crate) enum BindingSource {
    /// Nothing configured yet
    #[default]
    Unset,
    Constant(BoxedValue),
    DynamicValue(DynamicValueFn),
    Class(Arc<ClassDescriptor>),
    Provider(Arc<ClassDescriptor>),
    Alias(BindingKey),
}

impl BindingSource {
    pub(crate) fn binding_type(&self) -> Option<BindingType> {
        match self {
            BindingSource::Unset => None,
            BindingSource::Constant(_) => Some(BindingType::Constant),
            BindingSource::DynamicValue(_) => Some(BindingType::DynamicValue),
            BindingSource::Class(_) => Some(BindingType::Class),
            BindingSource::Provider(_) => Some(BindingType::Provider),
            BindingSource::Alias(_) => Some(BindingType::Alias),
        }
    }

    pub(crate) fn class_descriptor(&self) -> Option<&Arc<ClassDescriptor>> {
        match self {
            BindingSource::Class(desc) => Some(desc),
            _ => None,
        }
    }
}

/// A cached instance: settled, pending, or still being instantiated
#[derive(Clone)]
enum CachedValue {
    Ready(BoxedValue),
    Pending(Shared<PendingValue<BoxedValue>>),
    InFlight(Arc<InFlight>),
}

/// Threads currently blocked on another thread's instantiation
static WAITING: Lazy<Mutex<HashMap<ThreadId, Arc<InFlight>>>> = Lazy::new(Default::default);

/// An instantiation running on `owner`.
///
/// No lock is held while the value is computed. Other callers block on the
/// condition variable until the owner settles it, unless waiting would
/// close a cycle of threads waiting on each other.
pub(crate) struct InFlight {
    key: String,
    owner: ThreadId,
    outcome: Mutex<Option<Result<()>>>,
    settled: Condvar,
}

impl InFlight {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            owner: thread::current().id(),
            outcome: Mutex::new(None),
            settled: Condvar::new(),
        }
    }

    fn is_settled(&self) -> bool {
        self.outcome.lock().is_some()
    }

    fn settle(&self, outcome: Result<()>) {
        *self.outcome.lock() = Some(outcome);
        self.settled.notify_all();
    }

    /// Block until the owner settles the instantiation.
    ///
    /// `path` is the caller's binding stack. Fails with `CircularDependency`
    /// when the owner is (transitively) waiting on the calling thread.
    pub(crate) fn wait(self: &Arc<Self>, mut path: Vec<String>) -> Result<()> {
        let me = thread::current().id();
        {
            let mut waiting = WAITING.lock();
            let mut owner = self.owner;
            let mut key = self.key.clone();
            loop {
                if owner == me {
                    path.push(key);
                    return Err(ContextError::circular(path));
                }
                match waiting.get(&owner) {
                    Some(next) if !next.is_settled() => {
                        owner = next.owner;
                        key = next.key.clone();
                    }
                    _ => break,
                }
            }
            waiting.insert(me, Arc::clone(self));
        }

        let outcome = {
            let mut outcome = self.outcome.lock();
            loop {
                if let Some(result) = outcome.as_ref() {
                    break result.clone();
                }
                self.settled.wait(&mut outcome);
            }
        };
        WAITING.lock().remove(&me);
        outcome
    }
}

/// Outcome of looking up a cache slot for resolution
pub(crate) enum CacheSlot {
    /// A settled or pending instance
    Hit(ValueOrPromise<BoxedValue>),
    /// Another caller is instantiating the value
    InFlight(Arc<InFlight>),
    /// The caller owns the instantiation and must complete the claim
    Claimed(InstantiationClaim),
}

/// Ownership of an in-flight instantiation.
///
/// Dropped without [`InstanceCache::complete`] (the factory panicked), the
/// claim releases its slot and fails the waiters.
pub(crate) struct InstantiationClaim {
    entries: Arc<Mutex<HashMap<ContextId, CachedValue>>>,
    id: ContextId,
    flight: Arc<InFlight>,
    completed: bool,
}

impl InstantiationClaim {
    fn release(&self) {
        let mut entries = self.entries.lock();
        if owns(&entries, self.id, &self.flight) {
            entries.remove(&self.id);
        }
    }
}

impl Drop for InstantiationClaim {
    fn drop(&mut self) {
        if !self.completed {
            self.release();
            self.flight.settle(Err(ContextError::Internal(format!(
                "instantiation of {} was abandoned",
                self.flight.key
            ))));
        }
    }
}

fn owns(entries: &HashMap<ContextId, CachedValue>, id: ContextId, flight: &Arc<InFlight>) -> bool {
    matches!(entries.get(&id), Some(CachedValue::InFlight(f)) if Arc::ptr_eq(f, flight))
}

/// Per-binding cache of resolved instances keyed by owning context.
///
/// A pending resolution is stored as a shared future so concurrent callers
/// observe the same computation. When it settles successfully the plain
/// value replaces it; a failure evicts it. Clearing the cache bumps the
/// generation so late results of earlier resolutions are dropped.
pub(crate) struct InstanceCache {
    entries: Arc<Mutex<HashMap<ContextId, CachedValue>>>,
    generation: Arc<AtomicU64>,
}

impl InstanceCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Look up a settled or pending instance
    pub(crate) fn get(&self, id: ContextId) -> Option<ValueOrPromise<BoxedValue>> {
        let entries = self.entries.lock();
        match entries.get(&id)? {
            CachedValue::Ready(value) => Some(ValueOrPromise::Value(Arc::clone(value))),
            CachedValue::Pending(shared) => Some(ValueOrPromise::Promise(shared.clone().boxed())),
            CachedValue::InFlight(_) => None,
        }
    }

    /// Look up the slot for `id`, claiming it when empty
    pub(crate) fn claim(&self, id: ContextId, key: &str) -> CacheSlot {
        let mut entries = self.entries.lock();
        match entries.get(&id) {
            Some(CachedValue::Ready(value)) => CacheSlot::Hit(ValueOrPromise::Value(Arc::clone(value))),
            Some(CachedValue::Pending(shared)) => {
                CacheSlot::Hit(ValueOrPromise::Promise(shared.clone().boxed()))
            }
            Some(CachedValue::InFlight(flight)) => CacheSlot::InFlight(Arc::clone(flight)),
            None => {
                let flight = Arc::new(InFlight::new(key));
                entries.insert(id, CachedValue::InFlight(Arc::clone(&flight)));
                CacheSlot::Claimed(InstantiationClaim {
                    entries: Arc::clone(&self.entries),
                    id,
                    flight,
                    completed: false,
                })
            }
        }
    }

    /// Cache the outcome of a claimed instantiation and wake its waiters.
    ///
    /// A value computed after its slot was cleared is returned uncached.
    pub(crate) fn complete(
        &self,
        mut claim: InstantiationClaim,
        computed: Result<ValueOrPromise<BoxedValue>>,
    ) -> Result<ValueOrPromise<BoxedValue>> {
        claim.completed = true;
        match computed {
            Ok(value) => {
                let value = self.insert(claim.id, value, Some(&claim.flight));
                claim.flight.settle(Ok(()));
                Ok(value)
            }
            Err(err) => {
                claim.release();
                claim.flight.settle(Err(err.clone()));
                Err(err)
            }
        }
    }

    /// Cache a freshly computed value and hand back what callers should see.
    #[cfg(test)]
    pub(crate) fn store(
        &self,
        id: ContextId,
        value: ValueOrPromise<BoxedValue>,
    ) -> ValueOrPromise<BoxedValue> {
        self.insert(id, value, None)
    }

    fn insert(
        &self,
        id: ContextId,
        value: ValueOrPromise<BoxedValue>,
        claimed: Option<&Arc<InFlight>>,
    ) -> ValueOrPromise<BoxedValue> {
        let replaces = |entries: &HashMap<ContextId, CachedValue>| {
            claimed.is_none_or(|flight| owns(entries, id, flight))
        };
        match value {
            ValueOrPromise::Value(v) => {
                let mut entries = self.entries.lock();
                if replaces(&entries) {
                    entries.insert(id, CachedValue::Ready(Arc::clone(&v)));
                }
                ValueOrPromise::Value(v)
            }
            ValueOrPromise::Promise(fut) => {
                let started_at = self.generation.load(Ordering::Acquire);
                let entries = Arc::clone(&self.entries);
                let generation = Arc::clone(&self.generation);
                let settled = async move {
                    let result = fut.await;
                    if generation.load(Ordering::Acquire) == started_at {
                        let mut entries = entries.lock();
                        match &result {
                            Ok(v) => {
                                entries.insert(id, CachedValue::Ready(Arc::clone(v)));
                            }
                            Err(_) => {
                                if matches!(entries.get(&id), Some(CachedValue::Pending(_))) {
                                    entries.remove(&id);
                                }
                            }
                        }
                    }
                    result
                }
                .boxed()
                .shared();

                let mut entries = self.entries.lock();
                if replaces(&entries) {
                    entries.insert(id, CachedValue::Pending(settled.clone()));

                    #[cfg(feature = "logging")]
                    trace!(
                        target: "contexify",
                        context = %id,
                        "Cached pending resolution"
                    );
                }

                ValueOrPromise::Promise(settled.boxed())
            }
        }
    }

    /// Whether an instance is cached (or being instantiated) for this context
    pub(crate) fn contains(&self, id: ContextId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Drop the instance cached for one context
    pub(crate) fn remove(&self, id: ContextId) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        // dropped after the lock is released: an instance may own the last
        // handle of a context whose drop clears this cache
        let removed = self.entries.lock().remove(&id);
        drop(removed);
    }

    /// Drop all cached instances
    pub(crate) fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let drained = std::mem::take(&mut *self.entries.lock());
        drop(drained);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxed;

    #[test]
    fn test_store_and_get_ready() {
        let cache = InstanceCache::new();
        let id = ContextId::new();
        let stored = cache.store(id, ValueOrPromise::Value(boxed(42u32)));
        assert!(!stored.is_promise());

        match cache.get(id) {
            Some(ValueOrPromise::Value(v)) => assert_eq!(v.downcast_ref::<u32>(), Some(&42)),
            _ => panic!("expected a cached value"),
        }
    }

    #[tokio::test]
    async fn test_pending_settles_into_ready() {
        let cache = InstanceCache::new();
        let id = ContextId::new();
        let pending = ValueOrPromise::pending(async { Ok(boxed("late".to_string())) });

        let first = cache.store(id, pending);
        let second = cache.get(id).unwrap();
        assert!(second.is_promise());

        let a = first.resolve().await.unwrap();
        let b = second.resolve().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        assert!(matches!(cache.get(id), Some(ValueOrPromise::Value(_))));
    }

    #[tokio::test]
    async fn test_failed_pending_is_evicted() {
        let cache = InstanceCache::new();
        let id = ContextId::new();
        let pending = ValueOrPromise::pending(async {
            Err::<BoxedValue, _>(crate::ContextError::Internal("boom".into()))
        });

        let out = cache.store(id, pending);
        assert!(out.resolve().await.is_err());
        assert!(!cache.contains(id));
    }

    #[test]
    fn test_claim_then_complete() {
        let cache = InstanceCache::new();
        let id = ContextId::new();
        let CacheSlot::Claimed(claim) = cache.claim(id, "svc") else {
            panic!("expected an empty slot");
        };
        assert!(matches!(cache.claim(id, "svc"), CacheSlot::InFlight(_)));
        assert!(cache.get(id).is_none());

        cache.complete(claim, Ok(ValueOrPromise::Value(boxed(7u8)))).unwrap();
        assert!(matches!(cache.claim(id, "svc"), CacheSlot::Hit(ValueOrPromise::Value(_))));
    }

    #[test]
    fn test_waiting_on_own_instantiation_is_circular() {
        let cache = InstanceCache::new();
        let id = ContextId::new();
        let _claim = cache.claim(id, "svc");
        let CacheSlot::InFlight(flight) = cache.claim(id, "svc") else {
            panic!("expected an in-flight slot");
        };
        let err = flight.wait(vec!["other".to_string()]).unwrap_err();
        assert_eq!(err.to_string(), "Circular dependency detected: other --> svc");
    }

    #[test]
    fn test_abandoned_claim_fails_waiters() {
        let cache = Arc::new(InstanceCache::new());
        let id = ContextId::new();
        let CacheSlot::Claimed(claim) = cache.claim(id, "svc") else {
            panic!("expected an empty slot");
        };
        let CacheSlot::InFlight(flight) = cache.claim(id, "svc") else {
            panic!("expected an in-flight slot");
        };

        let waiter = std::thread::spawn(move || flight.wait(Vec::new()));
        drop(claim);

        assert!(waiter.join().unwrap().is_err());
        assert!(!cache.contains(id));
    }

    #[tokio::test]
    async fn test_clear_discards_late_result() {
        let cache = InstanceCache::new();
        let id = ContextId::new();
        let out = cache.store(id, ValueOrPromise::pending(async { Ok(boxed(1u8)) }));
        cache.clear();
        let _ = out.resolve().await.unwrap();
        assert_eq!(cache.len(), 0);
    }
}
