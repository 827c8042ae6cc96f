//! Values that are either available now or pending
//!
//! Resolution stays synchronous as long as every input is synchronous; only
//! when a pending input shows up does the composed result become pending.

use crate::{ContextError, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Type-erased resolved value
pub type BoxedValue = Arc<dyn Any + Send + Sync>;

/// Future producing a value of type `T`
pub type PendingValue<T> = BoxFuture<'static, Result<T>>;

/// Either a plain value or a pending asynchronous computation of one.
pub enum ValueOrPromise<T> {
    /// Available now
    Value(T),
    /// Still being computed
    Promise(PendingValue<T>),
}

impl<T: Send + 'static> ValueOrPromise<T> {
    /// Wrap a future
    #[inline]
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        ValueOrPromise::Promise(future.boxed())
    }

    /// Whether the value is still pending
    #[inline]
    pub fn is_promise(&self) -> bool {
        matches!(self, ValueOrPromise::Promise(_))
    }

    /// Map the value, staying synchronous when possible.
    pub fn transform<U, F>(self, f: F) -> Result<ValueOrPromise<U>>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        match self {
            ValueOrPromise::Value(v) => f(v).map(ValueOrPromise::Value),
            ValueOrPromise::Promise(fut) => Ok(ValueOrPromise::pending(async move { f(fut.await?) })),
        }
    }

    /// Chain a step that may itself be pending.
    pub fn and_then<U, F>(self, f: F) -> Result<ValueOrPromise<U>>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<ValueOrPromise<U>> + Send + 'static,
    {
        match self {
            ValueOrPromise::Value(v) => f(v),
            ValueOrPromise::Promise(fut) => Ok(ValueOrPromise::pending(async move {
                let v = fut.await?;
                f(v)?.resolve().await
            })),
        }
    }

    /// Wait for the value.
    pub async fn resolve(self) -> Result<T> {
        match self {
            ValueOrPromise::Value(v) => Ok(v),
            ValueOrPromise::Promise(fut) => fut.await,
        }
    }

    /// Convert into a boxed future
    pub fn into_future(self) -> PendingValue<T> {
        match self {
            ValueOrPromise::Value(v) => futures::future::ready(Ok(v)).boxed(),
            ValueOrPromise::Promise(fut) => fut,
        }
    }

    /// Take the value synchronously, failing if it is pending.
    pub fn into_sync(self, key: &str) -> Result<T> {
        match self {
            ValueOrPromise::Value(v) => Ok(v),
            ValueOrPromise::Promise(_) => Err(ContextError::sync_resolution(key)),
        }
    }
}

impl<T> fmt::Debug for ValueOrPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueOrPromise::Value(_) => f.write_str("ValueOrPromise::Value(..)"),
            ValueOrPromise::Promise(_) => f.write_str("ValueOrPromise::Promise(..)"),
        }
    }
}

/// Resolve every item, preserving input order.
///
/// Returns a plain list when all items resolve synchronously; otherwise waits
/// only for the pending ones.
pub fn resolve_list<I, T, F>(items: I, mut f: F) -> Result<ValueOrPromise<Vec<T>>>
where
    I: IntoIterator,
    T: Send + 'static,
    F: FnMut(I::Item, usize) -> Result<ValueOrPromise<T>>,
{
    let mut slots = Vec::new();
    let mut has_pending = false;
    for (index, item) in items.into_iter().enumerate() {
        let resolved = f(item, index)?;
        has_pending |= resolved.is_promise();
        slots.push(resolved);
    }

    if !has_pending {
        let values = slots
            .into_iter()
            .filter_map(|slot| match slot {
                ValueOrPromise::Value(v) => Some(v),
                ValueOrPromise::Promise(_) => None,
            })
            .collect();
        return Ok(ValueOrPromise::Value(values));
    }

    let futures = slots.into_iter().map(ValueOrPromise::into_future);
    Ok(ValueOrPromise::pending(futures::future::try_join_all(futures)))
}

/// Resolve every entry of a map, staying synchronous when possible.
pub fn resolve_map<K, I, T, F>(entries: I, mut f: F) -> Result<ValueOrPromise<HashMap<K, T>>>
where
    K: Eq + Hash + Send + 'static,
    I: IntoIterator,
    I::Item: Into<(K, T)> + Send,
    T: Send + 'static,
    F: FnMut(T, &K) -> Result<ValueOrPromise<T>>,
{
    let mut keys = Vec::new();
    let resolved = resolve_list(entries, |entry, _| {
        let (key, value) = entry.into();
        let out = f(value, &key)?;
        keys.push(key);
        Ok(out)
    })?;
    resolved.transform(move |values| Ok(keys.into_iter().zip(values).collect()))
}

/// Run `action`, then `finally` once the result settles (successfully or not).
pub fn try_with_finally<T, A, F>(action: A, finally: F) -> Result<ValueOrPromise<T>>
where
    T: Send + 'static,
    A: FnOnce() -> Result<ValueOrPromise<T>>,
    F: FnOnce() + Send + 'static,
{
    match action() {
        Ok(ValueOrPromise::Promise(fut)) => Ok(ValueOrPromise::pending(async move {
            let result = fut.await;
            finally();
            result
        })),
        other => {
            finally();
            other
        }
    }
}

/// Wrap a value for storage in a context
#[inline]
pub fn boxed<T: Any + Send + Sync>(value: T) -> BoxedValue {
    Arc::new(value)
}

/// Downcast a resolved value, naming `key` on mismatch.
pub fn downcast<T: Any + Send + Sync>(value: BoxedValue, key: &str) -> Result<Arc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| ContextError::type_mismatch::<T>(key))
}

/// Read a dot-separated property path out of a JSON value.
///
/// Only `serde_json::Value` payloads are traversable; anything else, or a
/// missing segment, yields `None`.
pub fn get_deep_property(value: &BoxedValue, path: &str) -> Option<BoxedValue> {
    if path.is_empty() {
        return Some(Arc::clone(value));
    }
    let json = value.downcast_ref::<serde_json::Value>()?;
    let mut current = json;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(Arc::new(current.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_resolve_list_sync() {
        let out = resolve_list(vec![1, 2, 3], |v, _| Ok(ValueOrPromise::Value(v * 2))).unwrap();
        match out {
            ValueOrPromise::Value(v) => assert_eq!(v, vec![2, 4, 6]),
            ValueOrPromise::Promise(_) => panic!("expected a plain value"),
        }
    }

    #[tokio::test]
    async fn test_resolve_list_keeps_order_with_pending() {
        let out = resolve_list(vec![1u64, 2, 3], |v, idx| {
            if idx == 0 {
                Ok(ValueOrPromise::pending(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    Ok(v * 10)
                }))
            } else {
                Ok(ValueOrPromise::Value(v * 10))
            }
        })
        .unwrap();
        assert!(out.is_promise());
        assert_eq!(out.resolve().await.unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn test_resolve_list_sync_error_short_circuits() {
        let result = resolve_list(vec![1, 2], |v, _| {
            if v == 2 {
                Err(ContextError::Internal("boom".into()))
            } else {
                Ok(ValueOrPromise::Value(v))
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_map_sync() {
        let out = resolve_map(vec![("a", 1), ("b", 2)], |v, _| Ok(ValueOrPromise::Value(v + 1))).unwrap();
        let map = out.into_sync("map").unwrap();
        assert_eq!(map["a"], 2);
        assert_eq!(map["b"], 3);
    }

    #[tokio::test]
    async fn test_transform_pending() {
        let v = ValueOrPromise::pending(async { Ok(2) });
        let t = v.transform(|x| Ok(x + 1)).unwrap();
        assert!(t.is_promise());
        assert_eq!(t.resolve().await.unwrap(), 3);
    }

    #[test]
    fn test_into_sync_rejects_pending() {
        let v: ValueOrPromise<i32> = ValueOrPromise::pending(async { Ok(1) });
        let err = v.into_sync("foo").unwrap_err();
        assert!(matches!(err, ContextError::SyncResolution { .. }));
    }

    #[tokio::test]
    async fn test_try_with_finally_runs_after_pending() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let out = try_with_finally(
            || Ok(ValueOrPromise::pending(async { Ok(1) })),
            move || flag.store(true, Ordering::SeqCst),
        )
        .unwrap();
        assert!(!done.load(Ordering::SeqCst));
        assert_eq!(out.resolve().await.unwrap(), 1);
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_get_deep_property() {
        let value = boxed(json!({"db": {"hosts": ["a", "b"]}}));
        let host = get_deep_property(&value, "db.hosts.1").unwrap();
        assert_eq!(host.downcast_ref::<serde_json::Value>(), Some(&json!("b")));
        assert!(get_deep_property(&value, "db.port").is_none());
        assert!(get_deep_property(&boxed(1u32), "x").is_none());
    }
}
