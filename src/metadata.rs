//! Class metadata and the process-wide metadata registry
//!
//! Rust has no runtime reflection, so a class describes itself once through
//! [`Injectable::metadata`]: its constructor parameters, injected properties,
//! invokable methods, interceptors and binding templates. The registry
//! erases that builder into a [`ClassDescriptor`] the first time the type is
//! used and hands out the cached descriptor afterwards.

use crate::binding::{Binding, BindingTag, BindingTemplate};
use crate::injection::{Arguments, Injection, Param};
use crate::interceptor::{InterceptorOrKey, InvocationSource};
use crate::provider::Provider;
use crate::proxy::InterceptedProxy;
use crate::session::ResolutionSession;
use crate::{
    BindingScope, BoxedValue, Context, ContextError, ContextTags, Result, ValueOrPromise, boxed,
    downcast,
};
use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

type ConstructorFn = Arc<dyn Fn(Arguments) -> Result<BoxedValue> + Send + Sync>;

/// Type-erased method invoker: receives the instance and resolved arguments
pub type MethodInvoker =
    Arc<dyn Fn(&BoxedValue, Arguments) -> Result<ValueOrPromise<BoxedValue>> + Send + Sync>;

type ProviderFn = Arc<dyn Fn(&BoxedValue) -> Result<ValueOrPromise<BoxedValue>> + Send + Sync>;

type ProxyFn = Arc<
    dyn Fn(BoxedValue, Context, Option<ResolutionSession>, Option<InvocationSource>) -> Result<BoxedValue>
        + Send
        + Sync,
>;

/// A type that can be instantiated by a [`Context`].
///
/// # Examples
///
/// ```rust
/// use contexify::prelude::*;
///
/// struct Greeter {
///     user: Arc<String>,
/// }
///
/// impl Injectable for Greeter {
///     fn metadata() -> ClassMetadata<Self> {
///         ClassMetadata::new("Greeter")
///             .constructor(vec![Param::inject("user")], |args| {
///                 Ok(Greeter { user: args.get::<String>(0)? })
///             })
///     }
/// }
///
/// let ctx = Context::new("app");
/// ctx.bind("user").unwrap().to("John".to_string()).unwrap();
/// ctx.bind("greeter").unwrap().to_class::<Greeter>().unwrap();
///
/// let greeter = ctx.get_sync::<Greeter>("greeter").unwrap();
/// assert_eq!(greeter.user.as_str(), "John");
/// ```
pub trait Injectable: Send + Sync + Sized + 'static {
    /// Describe the class. Called once per process.
    fn metadata() -> ClassMetadata<Self>;
}

/// A method that can be invoked with injected parameters
#[derive(Clone)]
pub struct MethodDescriptor {
    pub name: String,
    pub params: Vec<Param>,
    /// Method-level interceptors
    pub interceptors: Vec<InterceptorOrKey>,
    pub invoke: MethodInvoker,
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("params", &self.params.len())
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

/// Builder describing how to construct and configure a class.
pub struct ClassMetadata<T> {
    name: String,
    constructor_params: Vec<Param>,
    constructor: Option<Arc<dyn Fn(Arguments) -> Result<T> + Send + Sync>>,
    properties: Vec<(String, Injection)>,
    methods: Vec<MethodDescriptor>,
    /// Method interceptors added before their method was declared
    queued_method_interceptors: Vec<(String, InterceptorOrKey)>,
    interceptors: Vec<InterceptorOrKey>,
    templates: Vec<BindingTemplate>,
    provider: Option<ProviderFn>,
}

impl<T: Injectable> ClassMetadata<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constructor_params: Vec::new(),
            constructor: None,
            properties: Vec::new(),
            methods: Vec::new(),
            queued_method_interceptors: Vec::new(),
            interceptors: Vec::new(),
            templates: Vec::new(),
            provider: None,
        }
    }

    /// Declare constructor parameters and the function building the instance
    pub fn constructor<F>(mut self, params: Vec<Param>, constructor: F) -> Self
    where
        F: Fn(Arguments) -> Result<T> + Send + Sync + 'static,
    {
        self.constructor_params = params;
        self.constructor = Some(Arc::new(constructor));
        self
    }

    /// Declare an injected property, readable through [`Arguments::property`]
    pub fn property(mut self, name: impl Into<String>, injection: Injection) -> Self {
        self.properties.push((name.into(), injection));
        self
    }

    /// Declare an invokable method
    pub fn method<F>(mut self, name: impl Into<String>, params: Vec<Param>, method: F) -> Self
    where
        F: Fn(&T, Arguments) -> Result<ValueOrPromise<BoxedValue>> + Send + Sync + 'static,
    {
        let name = name.into();
        let owner = self.name.clone();
        let invoke: MethodInvoker = Arc::new(move |target, args| {
            let Some(instance) = target.downcast_ref::<T>() else {
                return Err(ContextError::type_mismatch::<T>(&owner));
            };
            method(instance, args)
        });
        let (queued, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.queued_method_interceptors)
            .into_iter()
            .partition(|(target, _)| *target == name);
        self.queued_method_interceptors = rest;
        self.methods.push(MethodDescriptor {
            name,
            params,
            interceptors: queued.into_iter().map(|(_, i)| i).collect(),
            invoke,
        });
        self
    }

    /// Add a class-level interceptor (inline or by binding key)
    pub fn intercept(mut self, interceptor: impl Into<InterceptorOrKey>) -> Self {
        self.interceptors.push(interceptor.into());
        self
    }

    /// Add an interceptor to one method. If the method is not declared yet
    /// the interceptor is attached when it is.
    pub fn intercept_method(mut self, method: &str, interceptor: impl Into<InterceptorOrKey>) -> Self {
        match self.methods.iter_mut().find(|m| m.name == method) {
            Some(desc) => desc.interceptors.push(interceptor.into()),
            None => self
                .queued_method_interceptors
                .push((method.to_string(), interceptor.into())),
        }
        self
    }

    /// Add a binding template applied by [`create_binding_from_class`]
    pub fn template<F>(mut self, template: F) -> Self
    where
        F: Fn(&Binding) -> Result<()> + Send + Sync + 'static,
    {
        self.templates.push(Arc::new(template));
        self
    }

    /// Tag bindings created from this class
    pub fn tag(self, tag: impl Into<BindingTag>) -> Self {
        let tag = tag.into();
        self.template(move |binding| {
            binding.tag(tag.clone());
            Ok(())
        })
    }

    /// Scope bindings created from this class
    pub fn scope(self, scope: BindingScope) -> Self {
        self.template(move |binding| {
            binding.in_scope(scope);
            Ok(())
        })
    }
}

impl<T: Injectable + Provider> ClassMetadata<T> {
    /// Mark the class as a provider: bindings resolve to `value()`.
    pub fn provider(mut self) -> Self {
        self.provider = Some(provider_hook::<T>(self.name.clone()));
        self
    }
}

fn provider_hook<P: Injectable + Provider>(name: String) -> ProviderFn {
    Arc::new(move |instance| {
        let Some(provider) = instance.downcast_ref::<P>() else {
            return Err(ContextError::type_mismatch::<P>(&name));
        };
        provider.value()
    })
}

/// Type-erased, immutable description of a class.
#[derive(Clone)]
pub struct ClassDescriptor {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    constructor_params: Vec<Param>,
    constructor: Option<ConstructorFn>,
    properties: Vec<(String, Injection)>,
    methods: Vec<MethodDescriptor>,
    interceptors: Vec<InterceptorOrKey>,
    templates: Vec<BindingTemplate>,
    provider: Option<ProviderFn>,
    proxy: ProxyFn,
}

impl ClassDescriptor {
    fn from_metadata<T: Injectable>(metadata: ClassMetadata<T>) -> Self {
        let constructor: Option<ConstructorFn> = metadata.constructor.map(|ctor| {
            let erased: ConstructorFn = Arc::new(move |args| Ok(boxed(ctor(args)?)));
            erased
        });
        #[cfg(feature = "logging")]
        for (method, _) in &metadata.queued_method_interceptors {
            debug!(
                target: "contexify",
                class = %metadata.name,
                method = %method,
                "Dropping interceptor for undeclared method"
            );
        }

        let owner = metadata.name.clone();
        let proxy: ProxyFn = Arc::new(move |instance, ctx, session, source| {
            let target = downcast::<T>(instance, &owner)?;
            Ok(boxed(InterceptedProxy::new(target, ctx, session, source)))
        });
        Self {
            name: metadata.name,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            constructor_params: metadata.constructor_params,
            constructor,
            properties: metadata.properties,
            methods: metadata.methods,
            interceptors: metadata.interceptors,
            templates: metadata.templates,
            provider: metadata.provider,
            proxy,
        }
    }

    /// Descriptor of `T`, built on first use
    pub fn of<T: Injectable>() -> Arc<ClassDescriptor> {
        MetadataRegistry::global().descriptor::<T>()
    }

    /// Descriptor of provider class `P`, with its `value()` hook attached
    pub fn provider_of<P: Injectable + Provider>() -> Arc<ClassDescriptor> {
        MetadataRegistry::global().provider_descriptor::<P>()
    }

    /// Class name used in keys and diagnostics
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Rust type name
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn constructor_params(&self) -> &[Param] {
        &self.constructor_params
    }

    pub fn properties(&self) -> &[(String, Injection)] {
        &self.properties
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    /// Look up a declared method
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Class-level interceptors
    pub fn interceptors(&self) -> &[InterceptorOrKey] {
        &self.interceptors
    }

    pub fn templates(&self) -> &[BindingTemplate] {
        &self.templates
    }

    /// Whether the class produces its bound value through `value()`
    pub fn is_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Build an instance from resolved arguments
    pub fn construct(&self, args: Arguments) -> Result<BoxedValue> {
        match &self.constructor {
            Some(constructor) => constructor(args),
            None => Err(ContextError::resolution(
                format!("{}.constructor", self.name),
                "no constructor is declared in the class metadata",
            )),
        }
    }

    /// Ask a provider instance for its value
    pub fn provide(&self, instance: &BoxedValue) -> Result<ValueOrPromise<BoxedValue>> {
        match &self.provider {
            Some(provider) => provider(instance),
            None => Err(ContextError::NotAProvider {
                class: self.name.clone(),
            }),
        }
    }

    /// Wrap an instance of this class in an [`InterceptedProxy`]
    pub fn make_proxy(
        &self,
        instance: BoxedValue,
        ctx: Context,
        session: Option<ResolutionSession>,
        source: Option<InvocationSource>,
    ) -> Result<BoxedValue> {
        (self.proxy)(instance, ctx, session, source)
    }

    /// Binding metadata attached to the class
    pub fn binding_metadata(self: &Arc<Self>) -> BindingMetadata {
        BindingMetadata {
            target: Arc::clone(self),
            templates: self.templates.clone(),
        }
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("constructor_params", &self.constructor_params.len())
            .field("properties", &self.properties.len())
            .field("methods", &self.methods)
            .field("is_provider", &self.is_provider())
            .finish()
    }
}

/// Templates attached to a class together with the class itself
#[derive(Clone)]
pub struct BindingMetadata {
    pub target: Arc<ClassDescriptor>,
    pub templates: Vec<BindingTemplate>,
}

impl fmt::Debug for BindingMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingMetadata")
            .field("target", &self.target.name())
            .field("templates", &self.templates.len())
            .finish()
    }
}

static REGISTRY: Lazy<MetadataRegistry> = Lazy::new(MetadataRegistry::new);

/// Process-wide cache of class descriptors keyed by `TypeId`.
///
/// Entries are written once, on first use of a type, and never removed.
pub struct MetadataRegistry {
    descriptors: DashMap<TypeId, Arc<ClassDescriptor>, RandomState>,
}

impl MetadataRegistry {
    fn new() -> Self {
        Self {
            descriptors: DashMap::with_capacity_and_hasher_and_shard_amount(
                32,
                RandomState::new(),
                8,
            ),
        }
    }

    /// The shared registry
    pub fn global() -> &'static MetadataRegistry {
        &REGISTRY
    }

    /// Descriptor for `T`, registering it on first use
    pub fn descriptor<T: Injectable>(&self) -> Arc<ClassDescriptor> {
        let type_id = TypeId::of::<T>();
        if let Some(found) = self.descriptors.get(&type_id) {
            return Arc::clone(found.value());
        }

        // built outside any shard lock; metadata() may look up other types
        let descriptor = Arc::new(ClassDescriptor::from_metadata(T::metadata()));

        #[cfg(feature = "logging")]
        debug!(
            target: "contexify",
            class = descriptor.name(),
            type_name = descriptor.type_name(),
            "Registered class metadata"
        );

        Arc::clone(self.descriptors.entry(type_id).or_insert(descriptor).value())
    }

    /// Descriptor for provider `P`, attaching the provider hook if the
    /// class metadata did not declare it
    pub fn provider_descriptor<P: Injectable + Provider>(&self) -> Arc<ClassDescriptor> {
        let descriptor = self.descriptor::<P>();
        if descriptor.is_provider() {
            return descriptor;
        }
        let mut upgraded = (*descriptor).clone();
        upgraded.provider = Some(provider_hook::<P>(upgraded.name.clone()));
        let upgraded = Arc::new(upgraded);
        self.descriptors.insert(TypeId::of::<P>(), Arc::clone(&upgraded));
        upgraded
    }

    /// Whether `T` has been described already
    pub fn contains<T: Injectable>(&self) -> bool {
        self.descriptors.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Options for [`create_binding_from_class`]
#[derive(Debug, Clone, Default)]
pub struct BindingFromClassOptions {
    /// Explicit binding key; overrides namespace and name
    pub key: Option<String>,
    /// Key namespace
    pub namespace: Option<String>,
    /// Name part of the key (defaults to the class name)
    pub name: Option<String>,
    /// Semantic type used to pick a namespace (e.g. `controller`)
    pub type_: Option<String>,
    /// Scope applied when the class does not set one
    pub default_scope: Option<BindingScope>,
    /// Namespace used when neither options nor tags name one
    pub default_namespace: Option<String>,
    /// Extra `type -> namespace` entries
    pub type_namespace_mapping: HashMap<String, String>,
}

impl BindingFromClassOptions {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }
}

fn namespace_for(type_: &str, mapping: &HashMap<String, String>) -> String {
    if let Some(ns) = mapping.get(type_) {
        return ns.clone();
    }
    match type_ {
        "class" => "classes".to_string(),
        "provider" => "providers".to_string(),
        other => format!("{other}s"),
    }
}

fn tag_string(binding: &Binding, tag: &str) -> Option<String> {
    match binding.tag_value(tag) {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

fn class_or_provider(binding: &Binding, descriptor: &Arc<ClassDescriptor>) -> Result<()> {
    if descriptor.is_provider() {
        binding.to_provider_class(Arc::clone(descriptor))?;
        binding.tag((ContextTags::TYPE, ContextTags::PROVIDER));
        binding.tag(ContextTags::PROVIDER);
    } else {
        binding.to_class_descriptor(Arc::clone(descriptor))?;
        binding.tag((ContextTags::TYPE, ContextTags::CLASS));
    }
    Ok(())
}

/// Build a binding for class `T` from its metadata.
///
/// The key is `options.key`, or `<namespace>.<name>` where the namespace
/// comes from options, the `namespace` tag, `default_namespace`, or the
/// binding type (`classes`, `providers`, `<type>s`), and the name from
/// options, the `name` tag, or the class name.
pub fn create_binding_from_class<T: Injectable>(
    options: BindingFromClassOptions,
) -> Result<Arc<Binding>> {
    let descriptor = ClassDescriptor::of::<T>();
    create_binding_from_descriptor(&descriptor, options)
}

/// [`create_binding_from_class`] for an already erased class
pub fn create_binding_from_descriptor(
    descriptor: &Arc<ClassDescriptor>,
    options: BindingFromClassOptions,
) -> Result<Arc<Binding>> {
    let key = match options.key.clone() {
        Some(key) => key,
        None => {
            // draft binding to read the tags templates would apply
            let draft = Binding::new("template");
            class_or_provider(&draft, descriptor)?;
            draft.apply(descriptor.templates())?;

            let namespace = options
                .namespace
                .clone()
                .or_else(|| tag_string(&draft, ContextTags::NAMESPACE))
                .or_else(|| options.default_namespace.clone())
                .unwrap_or_else(|| {
                    let type_ = options
                        .type_
                        .clone()
                        .or_else(|| tag_string(&draft, ContextTags::TYPE))
                        .unwrap_or_else(|| ContextTags::CLASS.to_string());
                    namespace_for(&type_, &options.type_namespace_mapping)
                });
            let name = options
                .name
                .clone()
                .or_else(|| tag_string(&draft, ContextTags::NAME))
                .unwrap_or_else(|| descriptor.name().to_string());
            format!("{namespace}.{name}")
        }
    };

    let binding = Binding::bind(key);
    class_or_provider(&binding, descriptor)?;
    binding.apply(descriptor.templates())?;
    if let Some(type_) = &options.type_ {
        binding.tag((ContextTags::TYPE, type_.as_str()));
    }
    if let Some(scope) = options.default_scope {
        binding.apply_default_scope(scope);
    }

    #[cfg(feature = "logging")]
    debug!(
        target: "contexify",
        class = descriptor.name(),
        key = binding.key(),
        "Created binding from class"
    );

    Ok(binding)
}
