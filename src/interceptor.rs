//! Interceptors and the invocation chain
//!
//! An interceptor wraps a method invocation: it receives the
//! [`InvocationContext`] and a [`Next`] continuation, and may inspect or
//! rewrite arguments, transform the result, handle errors, or short-circuit
//! by not proceeding.
//!
//! Chain order is: global interceptors (bindings tagged
//! `globalInterceptor`, filtered by invocation source and sorted by the
//! ordered groups bound at `globalInterceptor.orderedGroups`), then
//! class-level, then method-level interceptors, then the method itself.

use crate::binding::{Binding, ResolutionOptions};
use crate::filter::{filter_by_tag, sort_bindings_by_phase};
use crate::injection::invoke_target_method;
use crate::metadata::ClassDescriptor;
use crate::session::ResolutionSession;
use crate::{
    BindingKey, BindingScope, BoxedValue, Context, ContextBindings, ContextError, ContextTags,
    Result, ValueOrPromise, downcast, try_with_finally,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Namespace for interceptors registered without `global`
pub const LOCAL_INTERCEPTOR_NAMESPACE: &str = "interceptors";

/// Middleware around a method invocation.
///
/// Closures `Fn(Arc<InvocationContext>, Next) -> Result<ValueOrPromise<BoxedValue>>`
/// implement this trait.
pub trait Interceptor: Send + Sync + 'static {
    fn intercept(
        &self,
        invocation: Arc<InvocationContext>,
        next: Next,
    ) -> Result<ValueOrPromise<BoxedValue>>;
}

impl<F> Interceptor for F
where
    F: Fn(Arc<InvocationContext>, Next) -> Result<ValueOrPromise<BoxedValue>> + Send + Sync + 'static,
{
    fn intercept(
        &self,
        invocation: Arc<InvocationContext>,
        next: Next,
    ) -> Result<ValueOrPromise<BoxedValue>> {
        self(invocation, next)
    }
}

/// Wrap a closure as a shareable interceptor
pub fn interceptor<F>(f: F) -> Arc<dyn Interceptor>
where
    F: Fn(Arc<InvocationContext>, Next) -> Result<ValueOrPromise<BoxedValue>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// An interceptor given inline or looked up by binding key
#[derive(Clone)]
pub enum InterceptorOrKey {
    Interceptor(Arc<dyn Interceptor>),
    /// Resolved in the invocation context on each invocation
    Key(BindingKey),
}

impl InterceptorOrKey {
    fn same_as(&self, other: &InterceptorOrKey) -> bool {
        match (self, other) {
            (InterceptorOrKey::Key(a), InterceptorOrKey::Key(b)) => a.to_string() == b.to_string(),
            (InterceptorOrKey::Interceptor(a), InterceptorOrKey::Interceptor(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for InterceptorOrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterceptorOrKey::Interceptor(_) => f.write_str("Interceptor(..)"),
            InterceptorOrKey::Key(key) => f.debug_tuple("Key").field(&key.to_string()).finish(),
        }
    }
}

impl From<Arc<dyn Interceptor>> for InterceptorOrKey {
    fn from(interceptor: Arc<dyn Interceptor>) -> Self {
        InterceptorOrKey::Interceptor(interceptor)
    }
}

impl<I: Interceptor> From<Arc<I>> for InterceptorOrKey {
    fn from(interceptor: Arc<I>) -> Self {
        InterceptorOrKey::Interceptor(interceptor)
    }
}

impl From<BindingKey> for InterceptorOrKey {
    fn from(key: BindingKey) -> Self {
        InterceptorOrKey::Key(key)
    }
}

impl From<&str> for InterceptorOrKey {
    fn from(key: &str) -> Self {
        InterceptorOrKey::Key(key.into())
    }
}

impl From<String> for InterceptorOrKey {
    fn from(key: String) -> Self {
        InterceptorOrKey::Key(key.into())
    }
}

/// Merge two interceptor lists.
///
/// Entries of `first` that also appear in `second` are dropped; the rest
/// come before `second`.
pub fn merge_interceptors(first: &[InterceptorOrKey], second: &[InterceptorOrKey]) -> Vec<InterceptorOrKey> {
    let mut merged: Vec<InterceptorOrKey> = first
        .iter()
        .filter(|i| !second.iter().any(|s| s.same_as(i)))
        .cloned()
        .collect();
    merged.extend(second.iter().cloned());
    merged
}

/// What triggered an invocation, used to select global interceptors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationSource {
    /// e.g. `proxy` or `route`
    pub kind: String,
    pub value: String,
}

impl InvocationSource {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    /// Invocation through a proxy resolved from `key`
    pub fn proxy(key: impl Into<String>) -> Self {
        Self::new("proxy", key)
    }
}

impl fmt::Display for InvocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Options for [`invoke_method_with_interceptors`] and
/// [`invoke_method`](crate::invoke_method)
#[derive(Debug, Clone, Default)]
pub struct InvocationOptions {
    /// Call the method directly
    pub skip_interceptors: bool,
    /// Pass caller arguments through without resolving injected parameters
    pub skip_parameter_injection: bool,
    pub source: Option<InvocationSource>,
    pub session: Option<ResolutionSession>,
}

/// State of one intercepted invocation.
///
/// Owns a child of the calling context that lives for the duration of the
/// invocation and is closed when it settles.
pub struct InvocationContext {
    context: Context,
    target: BoxedValue,
    class_name: String,
    method_name: String,
    args: Mutex<Vec<BoxedValue>>,
    source: Option<InvocationSource>,
}

impl InvocationContext {
    pub fn new(
        parent: &Context,
        target: BoxedValue,
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        args: Vec<BoxedValue>,
        source: Option<InvocationSource>,
    ) -> Self {
        let name = format!("InvocationContext-{}", BindingKey::generate(None).key());
        Self {
            context: Context::child(parent, name),
            target,
            class_name: class_name.into(),
            method_name: method_name.into(),
            args: Mutex::new(args),
            source,
        }
    }

    /// Per-invocation context; bind request-scoped values here
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn target(&self) -> &BoxedValue {
        &self.target
    }

    /// Target downcast to its concrete type
    pub fn target_as<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        downcast(Arc::clone(&self.target), &self.target_name())
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// Snapshot of the current arguments
    pub fn args(&self) -> Vec<BoxedValue> {
        self.args.lock().clone()
    }

    /// Argument `index` downcast to `T`
    pub fn arg<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>> {
        let name = format!("{}[{}]", self.target_name(), index);
        match self.args.lock().get(index) {
            Some(value) => downcast(Arc::clone(value), &name),
            None => Err(ContextError::resolution(name, "no argument at this index")),
        }
    }

    /// Replace argument `index`; seen by the rest of the chain
    pub fn set_arg(&self, index: usize, value: BoxedValue) -> Result<()> {
        let mut args = self.args.lock();
        match args.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ContextError::resolution(
                format!("{}[{}]", self.target_name(), index),
                "no argument at this index",
            )),
        }
    }

    /// Replace all arguments
    pub fn set_args(&self, args: Vec<BoxedValue>) {
        *self.args.lock() = args;
    }

    pub fn source(&self) -> Option<&InvocationSource> {
        self.source.as_ref()
    }

    /// e.g. `Greeter.prototype.greet`
    pub fn target_name(&self) -> String {
        format!("{}.prototype.{}", self.class_name, self.method_name)
    }

    /// e.g. `InvocationContext(InvocationContext-…): Greeter.prototype.greet`
    pub fn description(&self) -> String {
        format!("InvocationContext({}): {}", self.context.name(), self.target_name())
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("context", &self.context.name())
            .field("target", &self.target_name())
            .field("args", &self.args.lock().len())
            .field("source", &self.source)
            .finish()
    }
}

struct InterceptorChain {
    invocation: Arc<InvocationContext>,
    interceptors: Vec<InterceptorOrKey>,
    descriptor: Arc<ClassDescriptor>,
    options: InvocationOptions,
}

impl InterceptorChain {
    fn invoke_at(self: &Arc<Self>, index: usize) -> Result<ValueOrPromise<BoxedValue>> {
        let Some(entry) = self.interceptors.get(index) else {
            return self.invoke_target();
        };

        #[cfg(feature = "logging")]
        trace!(
            target: "contexify",
            invocation = %self.invocation.target_name(),
            index = index,
            interceptor = ?entry,
            "Invoking interceptor"
        );

        let next = Next {
            chain: Arc::clone(self),
            index: index + 1,
        };
        let invocation = Arc::clone(&self.invocation);
        match entry {
            InterceptorOrKey::Interceptor(interceptor) => interceptor.intercept(invocation, next),
            InterceptorOrKey::Key(key) => {
                let resolved = self.resolve_interceptor(key)?;
                resolved.and_then(move |interceptor| interceptor.intercept(invocation, next))
            }
        }
    }

    fn resolve_interceptor(&self, key: &BindingKey) -> Result<ValueOrPromise<Arc<dyn Interceptor>>> {
        let ctx = self.invocation.context();
        let options = ResolutionOptions {
            optional: false,
            session: Some(ResolutionSession::fork(self.options.session.as_ref())),
            as_proxy_with_interceptors: false,
        };
        let name = key.to_string();
        let context_name = ctx.name().to_string();
        ctx.get_value_or_promise(key, &options)?.transform(move |value| {
            let value = value.ok_or_else(|| ContextError::not_bound(name.clone(), context_name))?;
            let interceptor = downcast::<Arc<dyn Interceptor>>(value, &name)?;
            Ok(Arc::clone(&*interceptor))
        })
    }

    fn invoke_target(&self) -> Result<ValueOrPromise<BoxedValue>> {
        let invocation = &self.invocation;
        invoke_target_method(
            invocation.context(),
            invocation.target(),
            &self.descriptor,
            invocation.method_name(),
            invocation.args(),
            &self.options,
        )
    }
}

/// The rest of the chain after the current interceptor.
pub struct Next {
    chain: Arc<InterceptorChain>,
    index: usize,
}

impl Next {
    /// Run the remaining interceptors and the target method
    pub fn proceed(self) -> Result<ValueOrPromise<BoxedValue>> {
        self.chain.invoke_at(self.index)
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &(self.chain.interceptors.len().saturating_sub(self.index)))
            .finish()
    }
}

fn applies_to_source(binding: &Binding, source: Option<&InvocationSource>) -> bool {
    let Some(source) = source else {
        return true;
    };
    match binding.tag_value(ContextTags::GLOBAL_INTERCEPTOR_SOURCE) {
        None => true,
        Some(Value::String(allowed)) => allowed == source.kind,
        Some(Value::Array(allowed)) => allowed.iter().any(|v| v.as_str() == Some(source.kind.as_str())),
        Some(_) => false,
    }
}

/// Keys of global interceptors that apply to `source`, in invocation order
pub fn global_interceptor_keys(ctx: &Context, source: Option<&InvocationSource>) -> Result<Vec<BindingKey>> {
    let mut bindings: Vec<Arc<Binding>> = ctx
        .find_by_filter(&filter_by_tag(ContextTags::GLOBAL_INTERCEPTOR))
        .into_iter()
        .filter(|b| applies_to_source(b, source))
        .collect();

    let ordered_groups = ctx.get_sync_with::<Vec<String>>(
        ContextBindings::GLOBAL_INTERCEPTOR_ORDERED_GROUPS,
        ResolutionOptions::optional(),
    )?;
    let groups: Vec<Value> = ordered_groups
        .map(|groups| groups.iter().map(|g| Value::String(g.clone())).collect())
        .unwrap_or_default();
    sort_bindings_by_phase(&mut bindings, ContextTags::GLOBAL_INTERCEPTOR_GROUP, &groups);

    Ok(bindings.iter().map(|b| BindingKey::from(b.key())).collect())
}

/// Invoke `method` on `target` through its interceptor chain.
///
/// Returns a plain value when every interceptor and the method complete
/// synchronously.
pub fn invoke_method_with_interceptors(
    ctx: &Context,
    target: BoxedValue,
    descriptor: &Arc<ClassDescriptor>,
    method: &str,
    args: Vec<BoxedValue>,
    options: &InvocationOptions,
) -> Result<ValueOrPromise<BoxedValue>> {
    let method_interceptors = descriptor
        .method(method)
        .map(|m| m.interceptors.clone())
        .unwrap_or_default();
    let local = merge_interceptors(descriptor.interceptors(), &method_interceptors);
    let globals: Vec<InterceptorOrKey> = global_interceptor_keys(ctx, options.source.as_ref())?
        .into_iter()
        .map(InterceptorOrKey::Key)
        .collect();
    let interceptors = merge_interceptors(&globals, &local);

    let invocation = Arc::new(InvocationContext::new(
        ctx,
        target,
        descriptor.name(),
        method,
        args,
        options.source.clone(),
    ));

    #[cfg(feature = "logging")]
    debug!(
        target: "contexify",
        invocation = %invocation.description(),
        interceptors = interceptors.len(),
        "Invoking method with interceptors"
    );

    let chain = Arc::new(InterceptorChain {
        invocation: Arc::clone(&invocation),
        interceptors,
        descriptor: Arc::clone(descriptor),
        options: options.clone(),
    });
    try_with_finally(
        || chain.invoke_at(0),
        move || invocation.context().close(),
    )
}

/// Options for [`register_interceptor`]
#[derive(Debug, Clone, Default)]
pub struct RegisterInterceptorOptions {
    /// Apply to every invocation. Implied when `group` or `source` is set.
    pub global: Option<bool>,
    /// Global interceptor group used for ordering
    pub group: Option<String>,
    /// Invocation source kinds the interceptor applies to
    pub source: Vec<String>,
    pub key: Option<String>,
    /// Name part of a generated key
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub scope: Option<BindingScope>,
}

impl RegisterInterceptorOptions {
    /// Options for a global interceptor
    pub fn global() -> Self {
        Self {
            global: Some(true),
            ..Self::default()
        }
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source.push(source.into());
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn scope(mut self, scope: BindingScope) -> Self {
        self.scope = Some(scope);
        self
    }
}

fn interceptor_binding(ctx: &Context, options: &RegisterInterceptorOptions) -> Result<(Arc<Binding>, bool)> {
    let global = match options.global {
        Some(global) => global,
        None => options.group.is_some() || !options.source.is_empty(),
    };
    let key = match &options.key {
        Some(key) => key.clone(),
        None => {
            let namespace = options.namespace.clone().unwrap_or_else(|| {
                if global {
                    ContextTags::GLOBAL_INTERCEPTOR_NAMESPACE.to_string()
                } else {
                    LOCAL_INTERCEPTOR_NAMESPACE.to_string()
                }
            });
            match &options.name {
                Some(name) => format!("{namespace}.{name}"),
                None => BindingKey::generate(Some(namespace.as_str())).key().to_string(),
            }
        }
    };
    Ok((ctx.bind(key)?, global))
}

fn tag_interceptor(binding: &Binding, global: bool, options: &RegisterInterceptorOptions) {
    if global {
        binding.tag(ContextTags::GLOBAL_INTERCEPTOR);
    }
    if let Some(group) = &options.group {
        binding.tag((ContextTags::GLOBAL_INTERCEPTOR_GROUP, group.as_str()));
    }
    match options.source.as_slice() {
        [] => {}
        [one] => {
            binding.tag((ContextTags::GLOBAL_INTERCEPTOR_SOURCE, one.as_str()));
        }
        many => {
            binding.tag((ContextTags::GLOBAL_INTERCEPTOR_SOURCE, Value::from(many.to_vec())));
        }
    }
    if let Some(scope) = options.scope {
        binding.in_scope(scope);
    }
}

/// Bind an interceptor instance.
///
/// Without a key the binding lands under `globalInterceptors.` (global) or
/// `interceptors.` with a generated or given name.
pub fn register_interceptor(
    ctx: &Context,
    interceptor: Arc<dyn Interceptor>,
    options: RegisterInterceptorOptions,
) -> Result<Arc<Binding>> {
    let (binding, global) = interceptor_binding(ctx, &options)?;
    binding.to(interceptor)?;
    tag_interceptor(&binding, global, &options);

    #[cfg(feature = "logging")]
    debug!(
        target: "contexify",
        key = binding.key(),
        global = global,
        group = options.group.as_deref(),
        "Registered interceptor"
    );

    Ok(binding)
}

/// Bind an interceptor factory. With the default transient scope every
/// invocation gets a fresh interceptor.
pub fn register_interceptor_factory<F>(
    ctx: &Context,
    factory: F,
    options: RegisterInterceptorOptions,
) -> Result<Arc<Binding>>
where
    F: Fn() -> Arc<dyn Interceptor> + Send + Sync + 'static,
{
    let (binding, global) = interceptor_binding(ctx, &options)?;
    binding.to_dynamic_value(factory)?;
    tag_interceptor(&binding, global, &options);
    Ok(binding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injection::Param;
    use crate::metadata::{ClassMetadata, Injectable};
    use crate::{boxed, invoke_method};

    struct Greeter;

    impl Injectable for Greeter {
        fn metadata() -> ClassMetadata<Self> {
            ClassMetadata::new("Greeter")
                .constructor(vec![], |_| Ok(Greeter))
                .method("greet", vec![Param::Plain], |_: &Greeter, args| {
                    let name = args.get::<String>(0)?;
                    Ok(ValueOrPromise::Value(boxed(format!("Hello, {name}"))))
                })
        }
    }

    fn log_interceptor(log: Arc<Mutex<Vec<String>>>, label: &'static str) -> Arc<dyn Interceptor> {
        interceptor(move |_invocation, next| {
            log.lock().push(format!("before-{label}"));
            let log = Arc::clone(&log);
            next.proceed()?.transform(move |result| {
                log.lock().push(format!("after-{label}"));
                Ok(result)
            })
        })
    }

    fn greet(ctx: &Context, name: &str, options: &InvocationOptions) -> Result<String> {
        let target = Arc::new(Greeter);
        let result = invoke_method(ctx, &target, "greet", vec![boxed(name.to_string())], options)?
            .into_sync("greet")?;
        Ok(downcast::<String>(result, "greet")?.as_str().to_string())
    }

    #[test]
    fn test_global_interceptors_ordered_by_group() {
        let ctx = Context::new("app");
        let log = Arc::new(Mutex::new(Vec::new()));
        register_interceptor(
            &ctx,
            log_interceptor(Arc::clone(&log), "log"),
            RegisterInterceptorOptions::global().group("log"),
        )
        .unwrap();
        register_interceptor(
            &ctx,
            log_interceptor(Arc::clone(&log), "auth"),
            RegisterInterceptorOptions::global().group("auth"),
        )
        .unwrap();
        ctx.bind(ContextBindings::GLOBAL_INTERCEPTOR_ORDERED_GROUPS)
            .unwrap()
            .to(vec!["auth".to_string(), "log".to_string()])
            .unwrap();

        let out = greet(&ctx, "John", &InvocationOptions::default()).unwrap();
        assert_eq!(out, "Hello, John");
        assert_eq!(
            *log.lock(),
            vec!["before-auth", "before-log", "after-log", "after-auth"]
        );
    }

    #[test]
    fn test_source_filter() {
        let ctx = Context::new("app");
        let log = Arc::new(Mutex::new(Vec::new()));
        register_interceptor(
            &ctx,
            log_interceptor(Arc::clone(&log), "route"),
            RegisterInterceptorOptions::default().source("route"),
        )
        .unwrap();

        let options = InvocationOptions {
            source: Some(InvocationSource::proxy("greeter")),
            ..Default::default()
        };
        greet(&ctx, "John", &options).unwrap();
        assert!(log.lock().is_empty());

        let options = InvocationOptions {
            source: Some(InvocationSource::new("route", "/greet")),
            ..Default::default()
        };
        greet(&ctx, "John", &options).unwrap();
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_interceptor_rewrites_args_and_short_circuits() {
        let ctx = Context::new("app");
        register_interceptor(
            &ctx,
            interceptor(|invocation, next| {
                let name = invocation.arg::<String>(0)?;
                if name.as_str() == "blocked" {
                    return Ok(ValueOrPromise::Value(boxed("denied".to_string())));
                }
                invocation.set_arg(0, boxed(name.to_uppercase()))?;
                next.proceed()
            }),
            RegisterInterceptorOptions::global(),
        )
        .unwrap();

        assert_eq!(greet(&ctx, "john", &InvocationOptions::default()).unwrap(), "Hello, JOHN");
        assert_eq!(greet(&ctx, "blocked", &InvocationOptions::default()).unwrap(), "denied");

        let skip = InvocationOptions {
            skip_interceptors: true,
            ..Default::default()
        };
        assert_eq!(greet(&ctx, "john", &skip).unwrap(), "Hello, john");
    }

    #[test]
    fn test_invocation_context_closed_after_call() {
        let ctx = Context::new("app");
        let seen: Arc<Mutex<Option<Context>>> = Arc::new(Mutex::new(None));
        let captured = Arc::clone(&seen);
        register_interceptor(
            &ctx,
            interceptor(move |invocation, next| {
                assert_eq!(invocation.target_name(), "Greeter.prototype.greet");
                assert!(invocation.description().starts_with("InvocationContext("));
                *captured.lock() = Some(invocation.context().clone());
                next.proceed()
            }),
            RegisterInterceptorOptions::global(),
        )
        .unwrap();
        greet(&ctx, "john", &InvocationOptions::default()).unwrap();
        let invocation_ctx = seen.lock().clone().unwrap();
        assert!(invocation_ctx.is_closed());
        assert!(!ctx.is_closed());
    }

    #[test]
    fn test_merge_interceptors() {
        let a: Arc<dyn Interceptor> = interceptor(|_, next| next.proceed());
        let first = vec![InterceptorOrKey::from("k1"), InterceptorOrKey::from(Arc::clone(&a))];
        let second = vec![InterceptorOrKey::from("k2"), InterceptorOrKey::from(Arc::clone(&a))];
        let merged = merge_interceptors(&first, &second);
        assert_eq!(merged.len(), 3);
        assert!(merged[0].same_as(&InterceptorOrKey::from("k1")));
        assert!(merged[1].same_as(&InterceptorOrKey::from("k2")));
    }

    #[test]
    fn test_unbound_interceptor_key_fails() {
        struct Guarded;
        impl Injectable for Guarded {
            fn metadata() -> ClassMetadata<Self> {
                ClassMetadata::new("Guarded")
                    .constructor(vec![], |_| Ok(Guarded))
                    .intercept("interceptors.missing")
                    .method("run", vec![], |_: &Guarded, _| Ok(ValueOrPromise::Value(boxed(()))))
            }
        }
        let ctx = Context::new("app");
        let err = invoke_method(&ctx, &Arc::new(Guarded), "run", vec![], &InvocationOptions::default())
            .unwrap_err();
        assert!(err.is_not_bound());
    }
}
