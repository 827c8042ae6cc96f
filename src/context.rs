//! Hierarchical binding context
//!
//! A `Context` owns a registry of bindings and delegates lookups to its
//! parent chain. Bindings in a child shadow identically-keyed bindings of
//! its ancestors for both resolution and search; binding or unbinding in a
//! child never touches the parent.

use crate::binding::{Binding, ResolutionOptions};
use crate::filter::{BindingComparator, BindingFilter, KeyFilter, TagFilter, filter_by_key, filter_by_tag};
use crate::metadata::{BindingFromClassOptions, Injectable, create_binding_from_class};
use crate::storage::BindingRegistry;
use crate::subscription::{
    ContextEvent, ContextEventListener, ContextEventType, ContextObserver, Subscription,
    SubscriptionManager,
};
use crate::view::ContextView;
use crate::{
    BindingKey, BindingScope, BoxedValue, ContextError, ContextId, Result, ValueOrPromise,
    downcast, get_deep_property,
};
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Well-known tag names
pub struct ContextTags;

impl ContextTags {
    pub const CLASS: &'static str = "class";
    pub const PROVIDER: &'static str = "provider";
    pub const TYPE: &'static str = "type";
    pub const NAMESPACE: &'static str = "namespace";
    pub const NAME: &'static str = "name";
    pub const KEY: &'static str = "key";
    /// Tag on configuration bindings naming the key they configure
    pub const CONFIGURATION_FOR: &'static str = "configurationFor";
    /// Marks a binding as a global interceptor
    pub const GLOBAL_INTERCEPTOR: &'static str = "globalInterceptor";
    /// Group used to order global interceptors
    pub const GLOBAL_INTERCEPTOR_GROUP: &'static str = "globalInterceptorGroup";
    /// Invocation source kinds a global interceptor applies to
    pub const GLOBAL_INTERCEPTOR_SOURCE: &'static str = "globalInterceptorSource";
    /// Key namespace for global interceptors
    pub const GLOBAL_INTERCEPTOR_NAMESPACE: &'static str = "globalInterceptors";
}

/// Well-known binding keys
pub struct ContextBindings;

impl ContextBindings {
    /// Custom [`ConfigurationResolver`]
    pub const CONFIGURATION_RESOLVER: &'static str = "context.configurationResolver";
    /// `Vec<String>` of global interceptor groups in invocation order
    pub const GLOBAL_INTERCEPTOR_ORDERED_GROUPS: &'static str = "globalInterceptor.orderedGroups";
}

/// Resolves configuration for a binding key.
///
/// Bind an `Arc<dyn ConfigurationResolver>` at
/// [`ContextBindings::CONFIGURATION_RESOLVER`] to replace the default, which
/// reads the `$config:<key>` binding.
pub trait ConfigurationResolver: Send + Sync {
    fn get_config_as_value_or_promise(
        &self,
        ctx: &Context,
        key: &str,
        property_path: Option<&str>,
        options: &ResolutionOptions,
    ) -> Result<ValueOrPromise<Option<BoxedValue>>>;
}

/// Reads configuration from the derived `$config:<key>` binding
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConfigurationResolver;

impl ConfigurationResolver for DefaultConfigurationResolver {
    fn get_config_as_value_or_promise(
        &self,
        ctx: &Context,
        key: &str,
        property_path: Option<&str>,
        options: &ResolutionOptions,
    ) -> Result<ValueOrPromise<Option<BoxedValue>>> {
        let config_key = BindingKey::build_key_for_config(key);
        let address = BindingKey::create(config_key.key(), property_path)?;
        ctx.get_value_or_promise(address, options)
    }
}

pub(crate) struct ContextInner {
    id: ContextId,
    name: String,
    /// Strong reference; a child keeps its ancestors resolvable
    parent: Option<Context>,
    registry: Arc<BindingRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    children: Mutex<Vec<Weak<ContextInner>>>,
    closed: AtomicBool,
    scope: RwLock<BindingScope>,
    depth: u32,
}

impl ContextInner {
    /// Drop instances ancestors cached for this context
    fn release_ancestor_caches(&self) {
        let parents = std::iter::successors(self.parent.as_ref(), |ctx| ctx.parent());
        for ancestor in parents {
            for binding in ancestor.inner.registry.bindings() {
                binding.clear_cache_for(self.id);
            }
        }
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            self.release_ancestor_caches();
        }
    }
}

/// A hierarchical registry of bindings.
///
/// Cloning is cheap: clones share the same registry.
///
/// # Examples
///
/// ```rust
/// use contexify::Context;
///
/// let app = Context::new("app");
/// app.bind("greeting").unwrap().to("hello".to_string()).unwrap();
///
/// let request = Context::child(&app, "request");
/// request.bind("user").unwrap().to("John".to_string()).unwrap();
///
/// assert!(request.is_bound("greeting"));
/// assert!(!app.is_bound("user"));
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    fn with_parent(name: String, parent: Option<Context>) -> Self {
        let depth = parent.as_ref().map_or(0, |p| p.inner.depth + 1);

        #[cfg(feature = "logging")]
        debug!(
            target: "contexify",
            name = %name,
            parent = parent.as_ref().map(|p| p.name()),
            depth = depth,
            "Creating context"
        );

        Self {
            inner: Arc::new(ContextInner {
                id: ContextId::new(),
                subscriptions: Arc::new(SubscriptionManager::new(&name)),
                name,
                parent,
                registry: Arc::new(BindingRegistry::new()),
                children: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                scope: RwLock::new(BindingScope::Context),
                depth,
            }),
        }
    }

    /// Create a root context.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_parent(name.into(), None)
    }

    /// Create a root context with a generated name
    pub fn root() -> Self {
        Self::new(BindingKey::generate(None).key())
    }

    /// Create a child of `parent`.
    pub fn child(parent: &Context, name: impl Into<String>) -> Self {
        let child = Self::with_parent(name.into(), Some(parent.clone()));
        let mut children = parent.inner.children.lock();
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(&child.inner));
        child
    }

    /// Create a child with a generated name
    pub fn create_child(&self) -> Self {
        let name = format!("{}-{}", self.name(), BindingKey::generate(None).key());
        Self::child(self, name)
    }

    /// Unique id of this context
    #[inline]
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Diagnostic name
    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Parent context, if any
    #[inline]
    pub fn parent(&self) -> Option<&Context> {
        self.inner.parent.as_ref()
    }

    /// Number of ancestors
    #[inline]
    pub fn depth(&self) -> u32 {
        self.inner.depth
    }

    /// Scope this context anchors (`Application` contexts own
    /// application-scoped instances)
    pub fn scope(&self) -> BindingScope {
        *self.inner.scope.read()
    }

    pub fn set_scope(&self, scope: BindingScope) -> &Self {
        *self.inner.scope.write() = scope;
        self
    }

    /// Whether `close()` has been called
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Whether both handles refer to the same context
    #[inline]
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ContextError::closed(self.name()));
        }
        Ok(())
    }

    /// This context followed by its ancestors
    pub fn chain(&self) -> impl Iterator<Item = &Context> {
        std::iter::successors(Some(self), |ctx| ctx.parent())
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Create and register a binding for `key`.
    ///
    /// Replaces an existing unlocked binding at the same key; a locked one
    /// is rejected with `LockedBinding`.
    pub fn bind(&self, key: impl Into<String>) -> Result<Arc<Binding>> {
        let key = key.into();
        Self::validate_key(&key)?;
        let binding = Binding::bind(key);
        self.add(Arc::clone(&binding))?;
        Ok(binding)
    }

    fn validate_key(key: &str) -> Result<()> {
        BindingKey::validate(key)?;
        if key.contains(BindingKey::PROPERTY_SEPARATOR) {
            return Err(ContextError::invalid_key(
                key,
                "binding key must not contain the property separator '#'",
            ));
        }
        Ok(())
    }

    /// Register a pre-built binding.
    pub fn add(&self, binding: Arc<Binding>) -> Result<&Self> {
        self.check_open()?;
        let key = binding.key().to_string();
        Self::validate_key(&key)?;

        if let Some(existing) = self.inner.registry.get(&key) {
            if existing.is_locked() {
                return Err(ContextError::locked(key));
            }
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "contexify",
            context = self.name(),
            key = %key,
            binding_count = self.inner.registry.len() + 1,
            "Adding binding"
        );

        let replaced = self.inner.registry.insert(Arc::clone(&binding));
        if let Some(old) = replaced {
            self.emit(ContextEventType::Unbind, &old);
        }
        self.emit(ContextEventType::Bind, &binding);
        Ok(self)
    }

    /// Remove a local binding.
    ///
    /// Returns false when the key is not bound locally or the binding is
    /// locked.
    pub fn unbind(&self, key: &str) -> Result<bool> {
        self.remove_binding(key, false)
    }

    /// Remove a local binding even if it is locked
    pub fn force_unbind(&self, key: &str) -> Result<bool> {
        self.remove_binding(key, true)
    }

    fn remove_binding(&self, key: &str, force: bool) -> Result<bool> {
        self.check_open()?;
        let Some(binding) = self.inner.registry.get(key) else {
            return Ok(false);
        };
        if binding.is_locked() && !force {
            #[cfg(feature = "logging")]
            debug!(
                target: "contexify",
                context = self.name(),
                key = key,
                "Refusing to unbind locked binding"
            );
            return Ok(false);
        }
        if !self.inner.registry.remove_if_same(key, &binding) {
            return Ok(false);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "contexify",
            context = self.name(),
            key = key,
            "Unbound key"
        );

        self.emit(ContextEventType::Unbind, &binding);
        Ok(true)
    }

    /// Create (or return) the local binding for `key`
    pub fn find_or_create_binding(&self, key: &str) -> Result<Arc<Binding>> {
        self.check_open()?;
        match self.inner.registry.get(key) {
            Some(existing) => Ok(existing),
            None => self.bind(key),
        }
    }

    /// Binding that holds configuration for `key`, created if absent.
    pub fn configure(&self, key: &str) -> Result<Arc<Binding>> {
        self.check_open()?;
        let config_key = BindingKey::build_key_for_config(key);
        if let Some(existing) = self.inner.registry.get(config_key.key()) {
            return Ok(existing);
        }
        let binding = Binding::configure(key);
        self.add(Arc::clone(&binding))?;
        Ok(binding)
    }

    /// Build a binding from class metadata and register it
    pub fn register<T: Injectable>(&self) -> Result<Arc<Binding>> {
        self.register_with::<T>(BindingFromClassOptions::default())
    }

    /// Like [`register`](Self::register) with explicit options
    pub fn register_with<T: Injectable>(
        &self,
        options: BindingFromClassOptions,
    ) -> Result<Arc<Binding>> {
        let binding = create_binding_from_class::<T>(options)?;
        self.add(Arc::clone(&binding))?;
        Ok(binding)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Whether `key` is bound in this context (ignoring ancestors)
    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.registry.contains(key)
    }

    /// Whether `key` is bound anywhere in the chain
    pub fn is_bound(&self, key: &str) -> bool {
        self.chain().any(|ctx| ctx.contains(key))
    }

    /// Nearest context in the chain that binds `key`
    pub fn get_owner_context(&self, key: &str) -> Option<Context> {
        self.chain().find(|ctx| ctx.contains(key)).cloned()
    }

    /// Nearest context in the chain anchoring `scope`
    pub fn get_scoped_context(&self, scope: BindingScope) -> Option<Context> {
        self.chain().find(|ctx| ctx.scope() == scope).cloned()
    }

    fn find_binding(&self, key: &str) -> Option<Arc<Binding>> {
        self.chain().find_map(|ctx| ctx.inner.registry.get(key))
    }

    /// Binding record for `key` from the nearest context binding it
    pub fn get_binding(&self, key: &str) -> Result<Arc<Binding>> {
        self.find_binding(key)
            .ok_or_else(|| ContextError::not_bound(key, self.name()))
    }

    /// Like [`get_binding`](Self::get_binding) but `None` when unbound
    pub fn get_binding_optional(&self, key: &str) -> Option<Arc<Binding>> {
        self.find_binding(key)
    }

    /// Bindings whose key matches, local first.
    ///
    /// A local key shadows the same key in every ancestor.
    pub fn find(&self, pattern: impl Into<KeyFilter>) -> Vec<Arc<Binding>> {
        self.find_by_filter(&filter_by_key(pattern))
    }

    /// Bindings whose tags match, local first.
    pub fn find_by_tag(&self, tag: impl Into<TagFilter>) -> Vec<Arc<Binding>> {
        self.find_by_filter(&filter_by_tag(tag))
    }

    /// Bindings accepted by `filter`, local first.
    pub fn find_by_filter(&self, filter: &BindingFilter) -> Vec<Arc<Binding>> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for ctx in self.chain() {
            for binding in ctx.inner.registry.bindings() {
                if seen.insert(binding.key().to_string()) && filter(&binding) {
                    found.push(binding);
                }
            }
        }
        found
    }

    /// Every visible binding, local first
    pub fn find_all(&self) -> Vec<Arc<Binding>> {
        self.find_by_filter(&(Arc::new(|_: &Binding| true) as BindingFilter))
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Context a binding of `scope` resolves and caches against.
    pub(crate) fn resolution_context_for(
        &self,
        binding: &Arc<Binding>,
        scope: BindingScope,
    ) -> Context {
        let owner = || {
            self.chain()
                .find(|ctx| {
                    ctx.inner
                        .registry
                        .get(binding.key())
                        .is_some_and(|b| Arc::ptr_eq(&b, binding))
                })
                .cloned()
                .unwrap_or_else(|| self.clone())
        };
        match scope {
            BindingScope::Singleton => owner(),
            BindingScope::Application => self
                .get_scoped_context(BindingScope::Application)
                .unwrap_or_else(owner),
            BindingScope::Context | BindingScope::Transient => self.clone(),
        }
    }

    /// Resolve an address to a value or a pending value.
    ///
    /// `None` is returned for an optional unbound key or a missing property
    /// path.
    pub fn get_value_or_promise(
        &self,
        key: impl Into<BindingKey>,
        options: &ResolutionOptions,
    ) -> Result<ValueOrPromise<Option<BoxedValue>>> {
        self.check_open()?;
        let key = key.into();

        #[cfg(feature = "logging")]
        trace!(
            target: "contexify",
            context = self.name(),
            key = %key,
            optional = options.optional,
            "Resolving key"
        );

        let Some(binding) = self.find_binding(key.key()) else {
            if options.optional {
                return Ok(ValueOrPromise::Value(None));
            }
            return Err(ContextError::not_bound(key.key(), self.name()));
        };

        let value = binding.get_value(self, options)?;
        match key.property_path() {
            None => value.transform(|v| Ok(Some(v))),
            Some(path) => {
                let path = path.to_string();
                value.transform(move |v| Ok(get_deep_property(&v, &path)))
            }
        }
    }

    pub(crate) fn required<T: Any + Send + Sync>(
        &self,
        value: Option<BoxedValue>,
        key: &BindingKey,
    ) -> Result<Arc<T>> {
        match value {
            Some(v) => downcast(v, &key.to_string()),
            None => Err(ContextError::not_bound(key.to_string(), self.name())),
        }
    }

    /// Resolve `key` and downcast it to `T`.
    pub async fn get<T: Any + Send + Sync>(&self, key: impl Into<BindingKey>) -> Result<Arc<T>> {
        let key = key.into();
        let value = self
            .get_value_or_promise(&key, &ResolutionOptions::default())?
            .resolve()
            .await?;
        self.required(value, &key)
    }

    /// Resolve with options; `None` when optional and unbound
    pub async fn get_with<T: Any + Send + Sync>(
        &self,
        key: impl Into<BindingKey>,
        options: ResolutionOptions,
    ) -> Result<Option<Arc<T>>> {
        let key = key.into();
        let value = self.get_value_or_promise(&key, &options)?.resolve().await?;
        value.map(|v| downcast(v, &key.to_string())).transpose()
    }

    /// Resolve synchronously.
    ///
    /// Fails with `SyncResolution` if any part of the graph is pending.
    pub fn get_sync<T: Any + Send + Sync>(&self, key: impl Into<BindingKey>) -> Result<Arc<T>> {
        let key = key.into();
        let value = self
            .get_value_or_promise(&key, &ResolutionOptions::default())?
            .into_sync(&key.to_string())?;
        self.required(value, &key)
    }

    /// Synchronous [`get_with`](Self::get_with)
    pub fn get_sync_with<T: Any + Send + Sync>(
        &self,
        key: impl Into<BindingKey>,
        options: ResolutionOptions,
    ) -> Result<Option<Arc<T>>> {
        let key = key.into();
        let value = self
            .get_value_or_promise(&key, &options)?
            .into_sync(&key.to_string())?;
        value.map(|v| downcast(v, &key.to_string())).transpose()
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    fn configuration_resolver(&self) -> Result<Arc<dyn ConfigurationResolver>> {
        let custom = self
            .get_value_or_promise(
                ContextBindings::CONFIGURATION_RESOLVER,
                &ResolutionOptions::optional(),
            )?
            .into_sync(ContextBindings::CONFIGURATION_RESOLVER)?;
        match custom {
            Some(value) => {
                let resolver = downcast::<Arc<dyn ConfigurationResolver>>(
                    value,
                    ContextBindings::CONFIGURATION_RESOLVER,
                )?;
                Ok((*resolver).clone())
            }
            None => Ok(Arc::new(DefaultConfigurationResolver)),
        }
    }

    /// Resolve configuration for `key` through the configuration resolver
    pub fn get_config_as_value_or_promise(
        &self,
        key: &str,
        property_path: Option<&str>,
        options: &ResolutionOptions,
    ) -> Result<ValueOrPromise<Option<BoxedValue>>> {
        self.check_open()?;
        let resolver = self.configuration_resolver()?;
        resolver.get_config_as_value_or_promise(self, key, property_path, options)
    }

    /// Configuration for `key`; `None` when unset
    pub async fn get_config<T: Any + Send + Sync>(
        &self,
        key: &str,
        property_path: Option<&str>,
    ) -> Result<Option<Arc<T>>> {
        let value = self
            .get_config_as_value_or_promise(key, property_path, &ResolutionOptions::optional())?
            .resolve()
            .await?;
        value
            .map(|v| downcast(v, BindingKey::build_key_for_config(key).key()))
            .transpose()
    }

    /// Synchronous [`get_config`](Self::get_config)
    pub fn get_config_sync<T: Any + Send + Sync>(
        &self,
        key: &str,
        property_path: Option<&str>,
    ) -> Result<Option<Arc<T>>> {
        let config_key = BindingKey::build_key_for_config(key);
        let value = self
            .get_config_as_value_or_promise(key, property_path, &ResolutionOptions::optional())?
            .into_sync(config_key.key())?;
        value.map(|v| downcast(v, config_key.key())).transpose()
    }

    // =========================================================================
    // Views and events
    // =========================================================================

    /// Open a live view over matching bindings of this chain
    pub fn create_view(
        &self,
        filter: BindingFilter,
        comparator: Option<BindingComparator>,
    ) -> ContextView {
        let view = ContextView::new(self.clone(), filter, comparator);
        view.open();
        view
    }

    /// Register an observer for bind/unbind events of this context and
    /// its ancestors.
    pub fn subscribe(&self, observer: Arc<dyn ContextObserver>) -> Result<Subscription> {
        self.check_open()?;
        Ok(self.inner.subscriptions.subscribe(observer))
    }

    /// Remove an observer; false if it was not subscribed
    pub fn unsubscribe(&self, observer: &Arc<dyn ContextObserver>) -> bool {
        self.inner.subscriptions.unsubscribe(observer)
    }

    /// Whether `observer` is subscribed here
    pub fn is_subscribed(&self, observer: &Arc<dyn ContextObserver>) -> bool {
        self.inner.subscriptions.is_subscribed(observer)
    }

    /// Add a listener that runs synchronously for every event.
    ///
    /// Returns an id for [`remove_listener`](Self::remove_listener).
    pub fn on_event(&self, listener: ContextEventListener) -> u64 {
        self.inner.subscriptions.add_listener(listener)
    }

    pub fn remove_listener(&self, id: u64) -> bool {
        self.inner.subscriptions.remove_listener(id)
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.inner.subscriptions.listener_count()
    }

    fn emit(&self, event_type: ContextEventType, binding: &Arc<Binding>) {
        let event = ContextEvent {
            event_type,
            binding: Arc::clone(binding),
            context: self.clone(),
        };
        self.notify_subtree(&event);
    }

    fn live_children(&self) -> Vec<Context> {
        self.inner
            .children
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| Context { inner })
            .filter(|child| !child.is_closed())
            .collect()
    }

    fn notify_subtree(&self, event: &ContextEvent) {
        self.inner.subscriptions.notify(event);
        for child in self.live_children() {
            child.notify_subtree(event);
        }
    }

    /// Resolves once every queued observer notification of this context
    /// and its descendants has been delivered.
    pub async fn wait_until_pending_notifications_done(&self) {
        let mut pending = vec![self.clone()];
        let mut index = 0;
        while index < pending.len() {
            let children = pending[index].live_children();
            pending.extend(children);
            index += 1;
        }
        for ctx in pending {
            ctx.inner
                .subscriptions
                .wait_until_pending_notifications_done()
                .await;
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Close the context.
    ///
    /// Releases local bindings (emitting unbind events), drops instances
    /// ancestors cached for this context, stops notifications and detaches
    /// from the parent. Closing twice is a no-op.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "contexify",
            context = self.name(),
            bindings = self.inner.registry.len(),
            "Closing context"
        );

        let bindings = self.inner.registry.drain();
        for binding in &bindings {
            binding.clear_cache();
            self.emit(ContextEventType::Unbind, binding);
        }

        self.inner.release_ancestor_caches();
        self.inner.subscriptions.close();

        if let Some(parent) = self.parent() {
            let me = Arc::as_ptr(&self.inner);
            parent
                .inner
                .children
                .lock()
                .retain(|c| c.strong_count() > 0 && !std::ptr::eq(c.as_ptr(), me));
        }
    }

    /// JSON snapshot of the context chain
    pub fn inspect(&self) -> Value {
        let mut bindings = serde_json::Map::new();
        for binding in self.inner.registry.bindings() {
            bindings.insert(binding.key().to_string(), binding.to_json());
        }
        let mut json = json!({
            "name": self.name(),
            "id": self.id().id(),
            "scope": self.scope(),
            "closed": self.is_closed(),
            "bindings": bindings,
        });
        if let Some(parent) = self.parent() {
            json["parent"] = parent.inspect();
        }
        json
    }

    /// Number of local bindings
    pub fn len(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry.is_empty()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name())
            .field("id", &self.id())
            .field("depth", &self.depth())
            .field("bindings", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_bind_and_get() {
        let ctx = Context::new("app");
        ctx.bind("foo").unwrap().to("bar".to_string()).unwrap();
        assert!(ctx.contains("foo"));
        assert_eq!(ctx.get_sync::<String>("foo").unwrap().as_str(), "bar");
    }

    #[test]
    fn test_bind_rejects_bad_keys() {
        let ctx = Context::new("app");
        assert!(matches!(
            ctx.bind("").unwrap_err(),
            ContextError::InvalidBindingKey { .. }
        ));
        assert!(matches!(
            ctx.bind("a#b").unwrap_err(),
            ContextError::InvalidBindingKey { .. }
        ));
    }

    #[test]
    fn test_unbind_locked_is_noop() {
        let ctx = Context::new("app");
        ctx.bind("foo").unwrap().to(1u8).unwrap().lock();
        assert!(!ctx.unbind("foo").unwrap());
        assert!(ctx.contains("foo"));
        assert!(ctx.force_unbind("foo").unwrap());
        assert!(!ctx.contains("foo"));
        assert!(!ctx.unbind("foo").unwrap());
    }

    #[test]
    fn test_not_bound_names_key() {
        let ctx = Context::new("app");
        let err = ctx.get_sync::<u8>("missing").unwrap_err();
        assert!(err.is_not_bound());
        assert!(err.to_string().contains("'missing'"));
        assert!(
            ctx.get_sync_with::<u8>("missing", ResolutionOptions::optional())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_deep_property_resolution() {
        let ctx = Context::new("app");
        ctx.bind("config")
            .unwrap()
            .to(json!({"db": {"port": 5432}}))
            .unwrap();
        let port = ctx.get_sync::<Value>("config#db.port").unwrap();
        assert_eq!(*port, json!(5432));
    }

    #[test]
    fn test_context_scope_per_child() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        let app = Context::new("app");
        app.bind("req")
            .unwrap()
            .to_dynamic_value(|| CALLS.fetch_add(1, Ordering::SeqCst))
            .unwrap()
            .in_scope(BindingScope::Context);

        let a = Context::child(&app, "a");
        let b = Context::child(&app, "b");
        let a1 = a.get_sync::<u32>("req").unwrap();
        let a2 = a.get_sync::<u32>("req").unwrap();
        let b1 = b.get_sync::<u32>("req").unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b1));
    }

    #[test]
    fn test_singleton_resolves_in_owner() {
        let app = Context::new("app");
        app.bind("name").unwrap().to("app".to_string()).unwrap();
        app.bind("greeting")
            .unwrap()
            .to_factory(|rctx| {
                let name = rctx.get_sync::<String>("name")?;
                Ok(ValueOrPromise::Value(crate::boxed(format!("hello {name}"))))
            })
            .unwrap()
            .in_scope(BindingScope::Singleton);

        let request = Context::child(&app, "request");
        request.bind("name").unwrap().to("request".to_string()).unwrap();

        let greeting = request.get_sync::<String>("greeting").unwrap();
        assert_eq!(greeting.as_str(), "hello app");
    }

    #[test]
    fn test_application_scope_uses_application_context() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        let root = Context::new("root");
        let app = Context::child(&root, "app");
        app.set_scope(BindingScope::Application);
        root.bind("svc")
            .unwrap()
            .to_dynamic_value(|| CALLS.fetch_add(1, Ordering::SeqCst))
            .unwrap()
            .in_scope(BindingScope::Application);

        let r1 = Context::child(&app, "r1");
        let r2 = Context::child(&app, "r2");
        let v1 = r1.get_sync::<u32>("svc").unwrap();
        let v2 = r2.get_sync::<u32>("svc").unwrap();
        assert!(Arc::ptr_eq(&v1, &v2));
    }

    #[test]
    fn test_configure_returns_same_binding() {
        let ctx = Context::new("app");
        let first = ctx.configure("servers.rest").unwrap();
        let second = ctx.configure("servers.rest").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(ctx.contains("$config:servers.rest"));
    }

    #[test]
    fn test_config_defaults_to_optional() {
        let ctx = Context::new("app");
        assert!(ctx.get_config_sync::<Value>("missing", None).unwrap().is_none());

        ctx.configure("servers.rest")
            .unwrap()
            .to(json!({"port": 3000}))
            .unwrap();
        let port = ctx
            .get_config_sync::<Value>("servers.rest", Some("port"))
            .unwrap()
            .unwrap();
        assert_eq!(*port, json!(3000));
    }

    #[test]
    fn test_custom_configuration_resolver() {
        struct Fixed;
        impl ConfigurationResolver for Fixed {
            fn get_config_as_value_or_promise(
                &self,
                _ctx: &Context,
                key: &str,
                _path: Option<&str>,
                _options: &ResolutionOptions,
            ) -> Result<ValueOrPromise<Option<BoxedValue>>> {
                Ok(ValueOrPromise::Value(Some(crate::boxed(format!("cfg:{key}")))))
            }
        }

        let ctx = Context::new("app");
        let resolver: Arc<dyn ConfigurationResolver> = Arc::new(Fixed);
        ctx.bind(ContextBindings::CONFIGURATION_RESOLVER)
            .unwrap()
            .to(resolver)
            .unwrap();
        let value = ctx.get_config_sync::<String>("any", None).unwrap().unwrap();
        assert_eq!(value.as_str(), "cfg:any");
    }

    #[test]
    fn test_closed_context_rejects_operations() {
        let app = Context::new("app");
        let child = Context::child(&app, "child");
        child.bind("foo").unwrap().to(1u8).unwrap();
        child.close();
        child.close();

        assert!(child.is_closed());
        assert!(matches!(
            child.bind("bar").unwrap_err(),
            ContextError::ContextClosed { .. }
        ));
        assert!(matches!(
            child.get_sync::<u8>("foo").unwrap_err(),
            ContextError::ContextClosed { .. }
        ));
        assert!(!app.is_closed());
    }

    #[test]
    fn test_close_purges_context_scoped_cache_in_parent() {
        let app = Context::new("app");
        let binding = app.bind("svc").unwrap();
        binding
            .to_dynamic_value(|| 1u8)
            .unwrap()
            .in_scope(BindingScope::Context);

        let child = Context::child(&app, "child");
        child.get_sync::<u8>("svc").unwrap();
        assert!(binding.cached_for(child.id()));

        child.close();
        assert!(!binding.cached_for(child.id()));
    }

    #[test]
    fn test_dropped_children_release_parent_cache() {
        let app = Context::new("app");
        let binding = app.bind("svc").unwrap();
        binding
            .to_dynamic_value(|| 1u8)
            .unwrap()
            .in_scope(BindingScope::Context);

        let ids: Vec<ContextId> = (0..100)
            .map(|i| {
                let child = Context::child(&app, format!("request-{i}"));
                child.get_sync::<u8>("svc").unwrap();
                assert!(binding.cached_for(child.id()));
                child.id()
            })
            .collect();

        assert!(ids.iter().all(|id| !binding.cached_for(*id)));
    }

    #[test]
    fn test_inspect() {
        let app = Context::new("app");
        app.bind("a").unwrap().to(1u8).unwrap();
        let child = Context::child(&app, "child");
        let json = child.inspect();
        assert_eq!(json["name"], "child");
        assert_eq!(json["parent"]["name"], "app");
        assert_eq!(json["parent"]["bindings"]["a"]["type"], "Constant");
    }
}
