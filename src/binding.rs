//! Bindings: the resolvable unit registered under a key
//!
//! A binding carries a value source, a scope, tags and a lock flag, and
//! computes its value lazily through [`Binding::get_value`].

use crate::factory::{BindingSource, CacheSlot, DynamicValueFn, InstanceCache};
use crate::injection::{InjectionTarget, Param, instantiate_class, resolve_injected_arguments};
use crate::interceptor::InvocationSource;
use crate::metadata::{ClassDescriptor, Injectable};
use crate::provider::Provider;
use crate::session::ResolutionSession;
use crate::{
    Arguments, BindingKey, BindingScope, BindingType, BoxedValue, Context, ContextError, Result,
    ValueOrPromise, boxed, downcast,
};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Bumped whenever any binding's tags change; views use it to notice
/// tag edits made after a binding was registered.
static TAG_GENERATION: AtomicU64 = AtomicU64::new(0);

#[inline]
pub(crate) fn tag_generation() -> u64 {
    TAG_GENERATION.load(Ordering::Acquire)
}

/// A configuration step applied to a binding
pub type BindingTemplate = Arc<dyn Fn(&Binding) -> Result<()> + Send + Sync>;

/// A tag to attach to a binding.
///
/// A bare name `n` is stored as `{n: n}`; entries are merged as-is.
#[derive(Debug, Clone)]
pub enum BindingTag {
    Name(String),
    Entries(Vec<(String, Value)>),
}

impl From<&str> for BindingTag {
    fn from(name: &str) -> Self {
        BindingTag::Name(name.to_string())
    }
}

impl From<String> for BindingTag {
    fn from(name: String) -> Self {
        BindingTag::Name(name)
    }
}

impl<V: Into<Value>> From<(&str, V)> for BindingTag {
    fn from((name, value): (&str, V)) -> Self {
        BindingTag::Entries(vec![(name.to_string(), value.into())])
    }
}

impl From<Map<String, Value>> for BindingTag {
    fn from(map: Map<String, Value>) -> Self {
        BindingTag::Entries(map.into_iter().collect())
    }
}

/// Options controlling a single resolution
#[derive(Clone, Default)]
pub struct ResolutionOptions {
    /// Resolve to `None` instead of failing when the key is not bound
    pub optional: bool,
    /// Resolution session to continue (for cycle detection)
    pub session: Option<ResolutionSession>,
    /// Wrap the resolved class instance in an intercepting proxy
    pub as_proxy_with_interceptors: bool,
}

impl ResolutionOptions {
    /// Options for an optional lookup
    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Self::default()
        }
    }

    /// Continue an existing session
    pub fn with_session(mut self, session: ResolutionSession) -> Self {
        self.session = Some(session);
        self
    }

    /// Request an intercepting proxy
    pub fn as_proxy(mut self) -> Self {
        self.as_proxy_with_interceptors = true;
        self
    }
}

impl fmt::Debug for ResolutionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionOptions")
            .field("optional", &self.optional)
            .field("has_session", &self.session.is_some())
            .field("as_proxy_with_interceptors", &self.as_proxy_with_interceptors)
            .finish()
    }
}

/// What a dynamic value factory sees while it runs.
#[derive(Clone)]
pub struct ResolutionContext {
    /// Context the value is being resolved in
    pub context: Context,
    /// Binding being resolved
    pub binding: Arc<Binding>,
    /// Options, including the session with this binding pushed
    pub options: ResolutionOptions,
}

impl ResolutionContext {
    fn nested(&self, optional: bool) -> ResolutionOptions {
        ResolutionOptions {
            optional,
            session: self.options.session.clone(),
            as_proxy_with_interceptors: false,
        }
    }

    /// Resolve a dependency within the current session
    pub fn get_value_or_promise(
        &self,
        key: impl Into<BindingKey>,
        optional: bool,
    ) -> Result<ValueOrPromise<Option<BoxedValue>>> {
        self.context.get_value_or_promise(key, &self.nested(optional))
    }

    /// Resolve a dependency asynchronously within the current session
    pub async fn get<T: Any + Send + Sync>(&self, key: impl Into<BindingKey>) -> Result<Arc<T>> {
        let key = key.into();
        let value = self.get_value_or_promise(&key, false)?.resolve().await?;
        self.context.required(value, &key)
    }

    /// Resolve a dependency synchronously within the current session
    pub fn get_sync<T: Any + Send + Sync>(&self, key: impl Into<BindingKey>) -> Result<Arc<T>> {
        let key = key.into();
        let value = self
            .get_value_or_promise(&key, false)?
            .into_sync(&key.to_string())?;
        self.context.required(value, &key)
    }
}

struct BindingState {
    scope: Option<BindingScope>,
    tags: Map<String, Value>,
    source: BindingSource,
}

/// A registered, resolvable unit identified by a key.
///
/// # Examples
///
/// ```rust
/// use contexify::{BindingScope, Context};
///
/// let ctx = Context::new("app");
/// ctx.bind("greeting").unwrap()
///     .to("hello".to_string()).unwrap()
///     .tag("message")
///     .in_scope(BindingScope::Singleton);
///
/// let greeting = ctx.get_sync::<String>("greeting").unwrap();
/// assert_eq!(greeting.as_str(), "hello");
/// ```
pub struct Binding {
    key: String,
    state: RwLock<BindingState>,
    locked: AtomicBool,
    cache: InstanceCache,
}

impl Binding {
    /// Create a detached binding (not registered with any context).
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: RwLock::new(BindingState {
                scope: None,
                tags: Map::new(),
                source: BindingSource::Unset,
            }),
            locked: AtomicBool::new(false),
            cache: InstanceCache::new(),
        }
    }

    /// Create a shareable detached binding
    pub fn bind(key: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(key))
    }

    /// Create the configuration binding for `key`
    pub fn configure(key: &str) -> Arc<Self> {
        let binding = Self::bind(BindingKey::build_key_for_config(key).key());
        binding.tag((crate::ContextTags::CONFIGURATION_FOR, key));
        binding
    }

    /// The binding key
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The effective scope (transient unless set)
    pub fn scope(&self) -> BindingScope {
        self.state.read().scope.unwrap_or_default()
    }

    /// Kind of value source, if configured
    pub fn binding_type(&self) -> Option<BindingType> {
        self.state.read().source.binding_type()
    }

    /// Whether rebinding the key is refused
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Copy of the tag map
    pub fn tag_map(&self) -> Map<String, Value> {
        self.state.read().tags.clone()
    }

    /// Tag names in sorted order
    pub fn tag_names(&self) -> Vec<String> {
        self.state.read().tags.keys().cloned().collect()
    }

    /// Value of one tag
    pub fn tag_value(&self, name: &str) -> Option<Value> {
        self.state.read().tags.get(name).cloned()
    }

    /// Whether the tag is present
    pub fn has_tag(&self, name: &str) -> bool {
        self.state.read().tags.contains_key(name)
    }

    pub(crate) fn class_descriptor(&self) -> Option<Arc<ClassDescriptor>> {
        self.state.read().source.class_descriptor().cloned()
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Lock the binding against rebinding
    pub fn lock(&self) -> &Self {
        self.locked.store(true, Ordering::Release);
        self
    }

    /// Allow rebinding again
    pub fn unlock(&self) -> &Self {
        self.locked.store(false, Ordering::Release);
        self
    }

    /// Add tags. Re-tagging a name overwrites its value.
    pub fn tag(&self, tag: impl Into<BindingTag>) -> &Self {
        {
            let mut state = self.state.write();
            match tag.into() {
                BindingTag::Name(name) => {
                    state.tags.insert(name.clone(), Value::String(name));
                }
                BindingTag::Entries(entries) => {
                    for (name, value) in entries {
                        state.tags.insert(name, value);
                    }
                }
            }
        }
        TAG_GENERATION.fetch_add(1, Ordering::AcqRel);
        self
    }

    /// Add several tags
    pub fn tags<I, T>(&self, tags: I) -> &Self
    where
        I: IntoIterator<Item = T>,
        T: Into<BindingTag>,
    {
        for tag in tags {
            self.tag(tag);
        }
        self
    }

    /// Set the cache lifetime policy
    pub fn in_scope(&self, scope: BindingScope) -> &Self {
        self.state.write().scope = Some(scope);
        self.cache.clear();
        self
    }

    /// Set the scope only if none was set explicitly
    pub fn apply_default_scope(&self, scope: BindingScope) -> &Self {
        let unset = self.state.read().scope.is_none();
        if unset {
            self.in_scope(scope);
        }
        self
    }

    /// Apply binding templates in order
    pub fn apply(&self, templates: &[BindingTemplate]) -> Result<&Self> {
        for template in templates {
            template(self)?;
        }
        Ok(self)
    }

    fn set_source(&self, source: BindingSource) -> Result<&Self> {
        if self.is_locked() {
            return Err(ContextError::locked(&self.key));
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "contexify",
            key = %self.key,
            binding_type = ?source.binding_type(),
            "Configuring binding value source"
        );

        self.state.write().source = source;
        self.cache.clear();
        Ok(self)
    }

    /// Bind to a constant value
    pub fn to<T: Any + Send + Sync>(&self, value: T) -> Result<&Self> {
        self.set_source(BindingSource::Constant(boxed(value)))
    }

    /// Bind to an already type-erased value
    pub fn to_boxed(&self, value: BoxedValue) -> Result<&Self> {
        self.set_source(BindingSource::Constant(value))
    }

    /// Bind to a synchronous factory called on every uncached resolution
    pub fn to_dynamic_value<T, F>(&self, factory: F) -> Result<&Self>
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.to_factory(move |_| Ok(ValueOrPromise::Value(boxed(factory()))))
    }

    /// Bind to an asynchronous factory
    pub fn to_async_value<T, F, Fut>(&self, factory: F) -> Result<&Self>
    where
        T: Any + Send + Sync,
        F: Fn(ResolutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.to_factory(move |rctx| {
            let fut = factory(rctx.clone());
            Ok(ValueOrPromise::pending(async move { Ok(boxed(fut.await?)) }))
        })
    }

    /// Bind to a raw factory that may return a plain or pending value
    pub fn to_factory<F>(&self, factory: F) -> Result<&Self>
    where
        F: Fn(&ResolutionContext) -> Result<ValueOrPromise<BoxedValue>> + Send + Sync + 'static,
    {
        let factory: DynamicValueFn = Arc::new(factory);
        self.set_source(BindingSource::DynamicValue(factory))
    }

    /// Bind to a factory whose arguments are injected
    pub fn to_injected_factory<F>(&self, params: Vec<Param>, factory: F) -> Result<&Self>
    where
        F: Fn(Arguments) -> Result<ValueOrPromise<BoxedValue>> + Send + Sync + 'static,
    {
        let params = Arc::new(params);
        let factory = Arc::new(factory);
        self.to_factory(move |rctx| {
            let target = InjectionTarget::function(rctx.binding.key());
            let args = resolve_injected_arguments(
                &params,
                &target,
                &rctx.context,
                rctx.options.session.as_ref(),
                Vec::new(),
            )?;
            let factory = Arc::clone(&factory);
            args.and_then(move |args| factory(args))
        })
    }

    /// Bind to a class instantiated with injected dependencies
    pub fn to_class<T: Injectable>(&self) -> Result<&Self> {
        self.to_class_descriptor(ClassDescriptor::of::<T>())
    }

    /// Bind to a class by descriptor
    pub fn to_class_descriptor(&self, descriptor: Arc<ClassDescriptor>) -> Result<&Self> {
        self.set_source(BindingSource::Class(descriptor))
    }

    /// Bind to a provider class; its `value()` produces the bound value
    pub fn to_provider<P: Injectable + Provider>(&self) -> Result<&Self> {
        self.to_provider_class(ClassDescriptor::provider_of::<P>())
    }

    /// Bind to a provider class by descriptor.
    ///
    /// Fails with `NotAProvider` when the class has no `value()` hook.
    pub fn to_provider_class(&self, descriptor: Arc<ClassDescriptor>) -> Result<&Self> {
        if !descriptor.is_provider() {
            return Err(ContextError::NotAProvider {
                class: descriptor.name().to_string(),
            });
        }
        self.set_source(BindingSource::Provider(descriptor))
    }

    /// Forward resolution to another key (optionally with a property path)
    pub fn to_alias(&self, key: impl Into<BindingKey>) -> Result<&Self> {
        self.set_source(BindingSource::Alias(key.into()))
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve this binding's value in `ctx`.
    ///
    /// Returns a plain value when every dependency is synchronous, otherwise
    /// a pending value. Cached scopes hand concurrent callers the same
    /// in-flight computation.
    pub fn get_value(
        self: &Arc<Self>,
        ctx: &Context,
        options: &ResolutionOptions,
    ) -> Result<ValueOrPromise<BoxedValue>> {
        let scope = self.scope();
        let resolution_ctx = ctx.resolution_context_for(self, scope);
        let cache_id = resolution_ctx.id();

        if scope.is_cached() {
            if let Some(hit) = self.cache.get(cache_id) {
                #[cfg(feature = "logging")]
                trace!(
                    target: "contexify",
                    key = %self.key,
                    scope = %scope,
                    context = resolution_ctx.name(),
                    "Binding value served from cache"
                );
                return self.wrap_proxy(hit, ctx, options);
            }
        }

        let mut session = ResolutionSession::fork(options.session.as_ref());
        session.push_binding(self)?;
        let nested = ResolutionOptions {
            optional: options.optional,
            session: Some(session),
            as_proxy_with_interceptors: false,
        };

        let value = if scope.is_cached() {
            loop {
                match self.cache.claim(cache_id, &self.key) {
                    CacheSlot::Hit(hit) => break hit,
                    CacheSlot::InFlight(flight) => {
                        #[cfg(feature = "logging")]
                        trace!(
                            target: "contexify",
                            key = %self.key,
                            context = resolution_ctx.name(),
                            "Waiting for in-flight instantiation"
                        );
                        let path: Vec<String> = nested
                            .session
                            .as_ref()
                            .map(|s| s.binding_stack().iter().map(|b| b.key().to_string()).collect())
                            .unwrap_or_default();
                        flight.wait(path)?;
                    }
                    CacheSlot::Claimed(claim) => {
                        let computed = self.compute(&resolution_ctx, &nested);
                        break self.cache.complete(claim, computed)?;
                    }
                }
            }
        } else {
            self.compute(&resolution_ctx, &nested)?
        };

        self.wrap_proxy(value, ctx, options)
    }

    fn compute(
        self: &Arc<Self>,
        ctx: &Context,
        options: &ResolutionOptions,
    ) -> Result<ValueOrPromise<BoxedValue>> {
        let source = self.state.read().source.clone();

        #[cfg(feature = "logging")]
        trace!(
            target: "contexify",
            key = %self.key,
            binding_type = ?source.binding_type(),
            context = ctx.name(),
            "Computing binding value"
        );

        match source {
            BindingSource::Unset => Err(ContextError::BindingNotConfigured {
                key: self.key.clone(),
            }),
            BindingSource::Constant(value) => Ok(ValueOrPromise::Value(value)),
            BindingSource::DynamicValue(factory) => factory(&ResolutionContext {
                context: ctx.clone(),
                binding: Arc::clone(self),
                options: options.clone(),
            }),
            BindingSource::Class(descriptor) => {
                instantiate_class(&descriptor, ctx, options.session.as_ref(), Vec::new())
            }
            BindingSource::Provider(descriptor) => {
                let instance =
                    instantiate_class(&descriptor, ctx, options.session.as_ref(), Vec::new())?;
                instance.and_then(move |provider| descriptor.provide(&provider))
            }
            BindingSource::Alias(target) => {
                let alias_options = ResolutionOptions {
                    optional: false,
                    session: options.session.clone(),
                    as_proxy_with_interceptors: false,
                };
                let context_name = ctx.name().to_string();
                ctx.get_value_or_promise(&target, &alias_options)?
                    .transform(move |value| {
                        value.ok_or_else(|| ContextError::not_bound(target.to_string(), context_name))
                    })
            }
        }
    }

    fn wrap_proxy(
        &self,
        value: ValueOrPromise<BoxedValue>,
        ctx: &Context,
        options: &ResolutionOptions,
    ) -> Result<ValueOrPromise<BoxedValue>> {
        if !options.as_proxy_with_interceptors {
            return Ok(value);
        }
        let Some(descriptor) = self.class_descriptor() else {
            return Ok(value);
        };
        let ctx = ctx.clone();
        let session = options.session.clone();
        let source = InvocationSource::proxy(&self.key);
        value.transform(move |instance| descriptor.make_proxy(instance, ctx, session, Some(source)))
    }

    /// Resolve and downcast to `T`
    pub async fn get<T: Any + Send + Sync>(self: &Arc<Self>, ctx: &Context) -> Result<Arc<T>> {
        let value = self
            .get_value(ctx, &ResolutionOptions::default())?
            .resolve()
            .await?;
        downcast(value, &self.key)
    }

    // =========================================================================
    // Cache control
    // =========================================================================

    /// Drop every cached instance
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Drop the instance cached for the scope context `ctx` resolves to
    pub fn refresh(self: &Arc<Self>, ctx: &Context) {
        let scope = self.scope();
        let resolution_ctx = ctx.resolution_context_for(self, scope);
        self.cache.remove(resolution_ctx.id());
    }

    pub(crate) fn clear_cache_for(&self, id: crate::ContextId) {
        if self.cache.contains(id) {
            self.cache.remove(id);
        }
    }

    #[cfg(test)]
    pub(crate) fn cached_for(&self, id: crate::ContextId) -> bool {
        self.cache.contains(id)
    }

    /// JSON description for inspection
    pub fn to_json(&self) -> Value {
        let state = self.state.read();
        let mut json = serde_json::json!({
            "key": self.key,
            "scope": state.scope.unwrap_or_default(),
            "isLocked": self.is_locked(),
            "tags": state.tags,
        });
        if let Some(binding_type) = state.source.binding_type() {
            json["type"] = serde_json::json!(binding_type);
        }
        if let BindingSource::Alias(target) = &state.source {
            json["alias"] = Value::String(target.to_string());
        }
        if let Some(desc) = state.source.class_descriptor() {
            json["valueConstructor"] = Value::String(desc.name().to_string());
        }
        json
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("key", &self.key)
            .field("scope", &self.scope())
            .field("type", &self.binding_type())
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_new_binding_is_unlocked() {
        let binding = Binding::new("foo");
        assert!(!binding.is_locked());
        assert_eq!(binding.scope(), BindingScope::Transient);
        assert_eq!(binding.binding_type(), None);
    }

    #[test]
    fn test_tags_merge() {
        let binding = Binding::new("foo");
        binding
            .tag("controller")
            .tag(("name", "my-controller"))
            .tag(("name", "renamed"));

        let tags = binding.tag_map();
        assert_eq!(tags["controller"], Value::String("controller".into()));
        assert_eq!(tags["name"], Value::String("renamed".into()));
        assert_eq!(binding.tag_names(), vec!["controller", "name"]);
    }

    #[test]
    fn test_locked_binding_rejects_reconfiguration() {
        let binding = Binding::new("foo");
        binding.to(1u32).unwrap().lock();
        let err = binding.to(2u32).err().unwrap();
        assert!(matches!(err, ContextError::LockedBinding { .. }));

        binding.unlock();
        assert!(binding.to(2u32).is_ok());
    }

    #[test]
    fn test_apply_default_scope_respects_explicit() {
        let binding = Binding::new("foo");
        binding.in_scope(BindingScope::Context);
        binding.apply_default_scope(BindingScope::Singleton);
        assert_eq!(binding.scope(), BindingScope::Context);

        let other = Binding::new("bar");
        other.apply_default_scope(BindingScope::Singleton);
        assert_eq!(other.scope(), BindingScope::Singleton);
    }

    #[test]
    fn test_reconfigure_clears_cache() {
        let ctx = Context::new("test");
        let binding = ctx.bind("foo").unwrap();
        binding.to(1u32).unwrap().in_scope(BindingScope::Singleton);
        assert_eq!(*ctx.get_sync::<u32>("foo").unwrap(), 1);

        binding.to(2u32).unwrap();
        assert_eq!(*ctx.get_sync::<u32>("foo").unwrap(), 2);
    }

    #[test]
    fn test_singleton_dynamic_value_created_once() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        let ctx = Context::new("test");
        ctx.bind("counter")
            .unwrap()
            .to_dynamic_value(|| CALLS.fetch_add(1, Ordering::SeqCst))
            .unwrap()
            .in_scope(BindingScope::Singleton);

        let a = ctx.get_sync::<u32>("counter").unwrap();
        let b = ctx.get_sync::<u32>("counter").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_singleton_cycle_across_threads_fails() {
        use std::sync::Barrier;
        use std::thread;

        let ctx = Context::new("test");
        let barrier = Arc::new(Barrier::new(2));
        for (key, dep) in [("a", "b"), ("b", "a")] {
            let barrier = Arc::clone(&barrier);
            ctx.bind(key)
                .unwrap()
                .to_factory(move |rctx| {
                    barrier.wait();
                    let dep = rctx.get_sync::<u8>(dep)?;
                    Ok(ValueOrPromise::Value(boxed(*dep)))
                })
                .unwrap()
                .in_scope(BindingScope::Singleton);
        }

        let handles: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|key| {
                let ctx = ctx.clone();
                thread::spawn(move || ctx.get_sync::<u8>(key))
            })
            .collect();

        for handle in handles {
            let err = handle.join().unwrap().unwrap_err();
            assert!(
                matches!(err, ContextError::CircularDependency { .. }),
                "unexpected error: {err}"
            );
        }
        assert!(!ctx.get_binding("a").unwrap().cached_for(ctx.id()));
    }

    #[test]
    fn test_unset_binding_fails() {
        let ctx = Context::new("test");
        ctx.bind("empty").unwrap();
        let err = ctx.get_sync::<u32>("empty").unwrap_err();
        assert!(matches!(err, ContextError::BindingNotConfigured { .. }));
    }

    #[test]
    fn test_to_json() {
        let binding = Binding::new("foo");
        binding.to(1u8).unwrap().tag("a").in_scope(BindingScope::Singleton);
        let json = binding.to_json();
        assert_eq!(json["key"], "foo");
        assert_eq!(json["scope"], "Singleton");
        assert_eq!(json["type"], "Constant");
        assert_eq!(json["tags"]["a"], "a");
    }

    #[test]
    fn test_configure_tags_target() {
        let binding = Binding::configure("servers.rest");
        assert_eq!(binding.key(), "$config:servers.rest");
        assert_eq!(
            binding.tag_value(crate::ContextTags::CONFIGURATION_FOR),
            Some(Value::String("servers.rest".into()))
        );
    }
}
