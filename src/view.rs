//! Live, filtered views over a context chain
//!
//! A view caches the list of matching bindings and drops the cache whenever
//! a matching binding is bound or unbound anywhere in the chain, or when any
//! binding's tags change.

use crate::binding::{Binding, ResolutionOptions, tag_generation};
use crate::filter::{BindingComparator, BindingFilter};
use crate::injection::Getter;
use crate::session::ResolutionSession;
use crate::subscription::{ContextEvent, ContextEventListener, ContextObserver};
use crate::{BoxedValue, Context, ContextError, Result, ValueOrPromise, downcast, resolve_list};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::trace;

/// Event emitted by a view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextViewEvent {
    /// The cached binding list was invalidated
    Refresh,
}

type ViewListener = Arc<dyn Fn(ContextViewEvent) + Send + Sync>;

struct CachedBindings {
    bindings: Vec<Arc<Binding>>,
    tag_generation: u64,
}

struct ViewInner {
    context: Context,
    filter: BindingFilter,
    comparator: Option<BindingComparator>,
    cached: RwLock<Option<CachedBindings>>,
    listener_id: Mutex<Option<u64>>,
    refresh_listeners: RwLock<Vec<ViewListener>>,
}

impl ViewInner {
    fn invalidate(&self) {
        let had_cache = self.cached.write().take().is_some();
        if had_cache {
            #[cfg(feature = "logging")]
            trace!(
                target: "contexify",
                context = self.context.name(),
                "View invalidated"
            );
        }
        let listeners: Vec<ViewListener> = self.refresh_listeners.read().clone();
        for listener in listeners {
            listener(ContextViewEvent::Refresh);
        }
    }
}

impl Drop for ViewInner {
    fn drop(&mut self) {
        if let Some(id) = self.listener_id.get_mut().take() {
            self.context.remove_listener(id);
        }
    }
}

/// A live, filtered list of bindings from a context and its ancestors.
///
/// Cloning shares the underlying view.
#[derive(Clone)]
pub struct ContextView {
    inner: Arc<ViewInner>,
}

impl ContextView {
    /// Create a closed view; call [`open`](Self::open) to track changes
    pub fn new(context: Context, filter: BindingFilter, comparator: Option<BindingComparator>) -> Self {
        Self {
            inner: Arc::new(ViewInner {
                context,
                filter,
                comparator,
                cached: RwLock::new(None),
                listener_id: Mutex::new(None),
                refresh_listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// The context this view is rooted at
    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// Start tracking bind/unbind events. Idempotent.
    pub fn open(&self) -> &Self {
        let mut listener_id = self.inner.listener_id.lock();
        if listener_id.is_some() {
            return self;
        }
        let weak: Weak<ViewInner> = Arc::downgrade(&self.inner);
        let listener: ContextEventListener = Arc::new(move |event: &ContextEvent| {
            if let Some(inner) = weak.upgrade() {
                if (inner.filter)(&event.binding) {
                    inner.invalidate();
                }
            }
        });
        *listener_id = Some(self.inner.context.on_event(listener));
        self
    }

    /// Stop tracking events and drop the cache
    pub fn close(&self) {
        if let Some(id) = self.inner.listener_id.lock().take() {
            self.inner.context.remove_listener(id);
        }
        self.inner.cached.write().take();
    }

    /// Whether the view is tracking events
    pub fn is_open(&self) -> bool {
        self.inner.listener_id.lock().is_some()
    }

    /// Register a callback for refresh events
    pub fn on_refresh(&self, listener: impl Fn(ContextViewEvent) + Send + Sync + 'static) {
        self.inner.refresh_listeners.write().push(Arc::new(listener));
    }

    /// Drop the cached binding list
    pub fn refresh(&self) {
        self.inner.invalidate();
    }

    /// Matching bindings, local first, sorted by the comparator if any.
    pub fn bindings(&self) -> Vec<Arc<Binding>> {
        let generation = tag_generation();
        if let Some(cached) = self.inner.cached.read().as_ref() {
            if cached.tag_generation == generation {
                return cached.bindings.clone();
            }
        }

        let mut found = self.inner.context.find_by_filter(&self.inner.filter);
        if let Some(comparator) = &self.inner.comparator {
            found.sort_by(|a, b| comparator(a, b));
        }

        // only cache while tracking; a closed view cannot see changes
        if self.is_open() {
            *self.inner.cached.write() = Some(CachedBindings {
                bindings: found.clone(),
                tag_generation: generation,
            });
        }
        found
    }

    /// Resolve every matching binding, preserving order.
    pub fn resolve(&self, session: Option<&ResolutionSession>) -> Result<ValueOrPromise<Vec<BoxedValue>>> {
        let bindings = self.bindings();
        let ctx = self.inner.context.clone();
        resolve_list(bindings, |binding, _| {
            let options = ResolutionOptions {
                session: Some(ResolutionSession::fork(session)),
                ..ResolutionOptions::default()
            };
            binding.get_value(&ctx, &options)
        })
    }

    /// Resolved values of all matching bindings
    pub async fn values(&self) -> Result<Vec<BoxedValue>> {
        self.resolve(None)?.resolve().await
    }

    /// Values downcast to `T`
    pub async fn values_as<T: Any + Send + Sync>(&self) -> Result<Vec<Arc<T>>> {
        let keys: Vec<String> = self.bindings().iter().map(|b| b.key().to_string()).collect();
        let values = self.values().await?;
        values
            .into_iter()
            .zip(keys)
            .map(|(v, key)| downcast(v, &key))
            .collect()
    }

    /// Synchronous [`values`](Self::values)
    pub fn values_sync(&self) -> Result<Vec<BoxedValue>> {
        self.resolve(None)?.into_sync("view")
    }

    /// Value of the only matching binding; `None` when nothing matches.
    pub async fn single_value(&self) -> Result<Option<BoxedValue>> {
        let bindings = self.bindings();
        match bindings.as_slice() {
            [] => Ok(None),
            [binding] => {
                let value = binding
                    .get_value(&self.inner.context, &ResolutionOptions::default())?
                    .resolve()
                    .await?;
                Ok(Some(value))
            }
            many => Err(ContextError::MultipleBindings {
                keys: many.iter().map(|b| b.key()).collect::<Vec<_>>().join(", "),
            }),
        }
    }

    /// Getter that resolves the current values on each call
    pub fn as_getter(&self) -> Getter {
        Getter::view(self.clone())
    }
}

impl ContextObserver for ContextView {
    fn filter(&self) -> Option<BindingFilter> {
        Some(Arc::clone(&self.inner.filter))
    }

    fn observe(&self, _event: &ContextEvent) -> Result<ValueOrPromise<()>> {
        self.refresh();
        Ok(ValueOrPromise::Value(()))
    }
}

impl fmt::Debug for ContextView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextView")
            .field("context", &self.inner.context.name())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{compare_bindings_by_tag, filter_by_tag};

    fn tagged(ctx: &Context, key: &str, value: u32) {
        let binding = Binding::bind(key);
        binding.to(value).unwrap().tag("item").tag(("order", value));
        ctx.add(binding).unwrap();
    }

    #[test]
    fn test_view_tracks_binds_and_unbinds() {
        let app = Context::new("app");
        let server = Context::child(&app, "server");
        tagged(&app, "a", 1);
        let view = server.create_view(filter_by_tag("item"), None);
        assert_eq!(view.bindings().len(), 1);

        tagged(&server, "b", 2);
        assert_eq!(view.bindings().len(), 2);

        tagged(&app, "c", 3);
        assert_eq!(view.bindings().len(), 3);

        app.unbind("a").unwrap();
        let keys: Vec<_> = view.bindings().iter().map(|b| b.key().to_string()).collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn test_view_sees_tags_added_after_bind() {
        let ctx = Context::new("app");
        let view = ctx.create_view(filter_by_tag("late"), None);
        let binding = ctx.bind("x").unwrap();
        assert!(view.bindings().is_empty());

        binding.tag("late");
        assert_eq!(view.bindings().len(), 1);
    }

    #[test]
    fn test_view_values_sorted() {
        let ctx = Context::new("app");
        tagged(&ctx, "three", 3);
        tagged(&ctx, "one", 1);
        tagged(&ctx, "two", 2);
        let view = ctx.create_view(
            filter_by_tag("item"),
            Some(compare_bindings_by_tag("order", vec![])),
        );
        let values: Vec<u32> = view
            .values_sync()
            .unwrap()
            .into_iter()
            .map(|v| *v.downcast::<u32>().unwrap())
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_single_value() {
        let ctx = Context::new("app");
        let view = ctx.create_view(filter_by_tag("item"), None);
        assert!(view.single_value().await.unwrap().is_none());

        tagged(&ctx, "one", 1);
        let value = view.single_value().await.unwrap().unwrap();
        assert_eq!(value.downcast_ref::<u32>(), Some(&1));

        tagged(&ctx, "two", 2);
        let err = view.single_value().await.unwrap_err();
        assert!(matches!(err, ContextError::MultipleBindings { .. }));
    }

    #[test]
    fn test_closed_view_recomputes() {
        let ctx = Context::new("app");
        let view = ctx.create_view(filter_by_tag("item"), None);
        view.close();
        assert!(!view.is_open());
        tagged(&ctx, "one", 1);
        assert_eq!(view.bindings().len(), 1);
    }

    #[test]
    fn test_dropped_view_removes_listener() {
        let ctx = Context::new("app");
        let view = ctx.create_view(filter_by_tag("item"), None);
        let other = view.clone();
        assert_eq!(ctx.listener_count(), 1);

        drop(view);
        assert_eq!(ctx.listener_count(), 1);
        drop(other);
        assert_eq!(ctx.listener_count(), 0);
    }

    #[test]
    fn test_refresh_listener() {
        let ctx = Context::new("app");
        let view = ctx.create_view(filter_by_tag("item"), None);
        let hits = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        view.on_refresh(move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        tagged(&ctx, "one", 1);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
