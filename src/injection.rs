//! Dependency injection into constructors, properties, methods and factories
//!
//! An [`Injection`] describes where a value comes from (a key, a filter or
//! the configuration of the binding being resolved) and how it is delivered
//! (the value itself, a [`Getter`], or a live [`ContextView`]).

use crate::binding::ResolutionOptions;
use crate::filter::{BindingComparator, BindingFilter, TagFilter, filter_by_key, filter_by_tag};
use crate::interceptor::{InvocationOptions, invoke_method_with_interceptors};
use crate::metadata::{ClassDescriptor, Injectable};
use crate::session::ResolutionSession;
use crate::view::ContextView;
use crate::{
    BindingKey, BoxedValue, Context, ContextError, Result, ValueOrPromise, boxed, downcast,
    resolve_list,
};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Custom resolver for an injection point
pub type ResolverFn = Arc<
    dyn Fn(&Context, &Injection, &ResolutionSession) -> Result<ValueOrPromise<Option<BoxedValue>>>
        + Send
        + Sync,
>;

/// Member of a class an injection belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InjectionMember {
    Constructor,
    Method(String),
    Property(String),
    /// A free-standing factory function
    Function,
}

/// Where an injected value goes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InjectionTarget {
    pub class: String,
    pub member: InjectionMember,
    pub index: Option<usize>,
}

impl InjectionTarget {
    pub fn constructor(class: impl Into<String>, index: usize) -> Self {
        Self {
            class: class.into(),
            member: InjectionMember::Constructor,
            index: Some(index),
        }
    }

    pub fn method(class: impl Into<String>, method: impl Into<String>, index: usize) -> Self {
        Self {
            class: class.into(),
            member: InjectionMember::Method(method.into()),
            index: Some(index),
        }
    }

    pub fn property(class: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            member: InjectionMember::Property(property.into()),
            index: None,
        }
    }

    pub fn function(name: impl Into<String>) -> Self {
        Self {
            class: name.into(),
            member: InjectionMember::Function,
            index: None,
        }
    }

    /// Same member, different parameter index
    pub fn with_index(&self, index: usize) -> Self {
        Self {
            index: Some(index),
            ..self.clone()
        }
    }

    /// Member name without the parameter index, e.g. `Greeter.prototype.greet`
    pub fn base_name(&self) -> String {
        match &self.member {
            InjectionMember::Constructor => format!("{}.constructor", self.class),
            InjectionMember::Method(m) | InjectionMember::Property(m) => {
                format!("{}.prototype.{}", self.class, m)
            }
            InjectionMember::Function => self.class.clone(),
        }
    }

    /// e.g. `Greeter.constructor[0]` or `Greeter.prototype.prop`
    pub fn describe(&self) -> String {
        match self.index {
            Some(index) => format!("{}[{}]", self.base_name(), index),
            None => self.base_name(),
        }
    }
}

impl Default for InjectionTarget {
    fn default() -> Self {
        Self::function("")
    }
}

impl fmt::Display for InjectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// What an injection resolves
#[derive(Clone)]
pub enum InjectionSelector {
    /// A single binding address
    Key(BindingKey),
    /// Every binding accepted by the filter
    Filter(BindingFilter),
    /// Configuration of the binding being resolved, optionally a sub-path
    Config(Option<String>),
}

/// How the resolved value is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InjectionStyle {
    #[default]
    Value,
    /// A [`Getter`] resolving on demand
    Getter,
    /// A live [`ContextView`]
    View,
}

/// An injection point descriptor.
#[derive(Clone)]
pub struct Injection {
    selector: InjectionSelector,
    style: InjectionStyle,
    optional: bool,
    as_proxy_with_interceptors: bool,
    resolver: Option<ResolverFn>,
    comparator: Option<BindingComparator>,
    target: InjectionTarget,
}

impl Injection {
    fn with_selector(selector: InjectionSelector) -> Self {
        Self {
            selector,
            style: InjectionStyle::Value,
            optional: false,
            as_proxy_with_interceptors: false,
            resolver: None,
            comparator: None,
            target: InjectionTarget::default(),
        }
    }

    /// Inject the value bound to `key` (which may carry a `#path`)
    pub fn key(key: impl Into<BindingKey>) -> Self {
        Self::with_selector(InjectionSelector::Key(key.into()))
    }

    /// Inject the values of all bindings accepted by `filter`
    pub fn filter(filter: BindingFilter) -> Self {
        Self::with_selector(InjectionSelector::Filter(filter))
    }

    /// Inject the values of all bindings with a matching tag
    pub fn tag(tag: impl Into<TagFilter>) -> Self {
        Self::filter(filter_by_tag(tag))
    }

    /// Inject a getter for `key`
    pub fn getter(key: impl Into<BindingKey>) -> Self {
        Self::key(key).styled(InjectionStyle::Getter)
    }

    /// Inject a live view of bindings accepted by `filter`
    pub fn view(filter: BindingFilter) -> Self {
        Self::filter(filter).styled(InjectionStyle::View)
    }

    /// Inject configuration of the binding being resolved
    pub fn config(property_path: Option<&str>) -> Self {
        let mut injection =
            Self::with_selector(InjectionSelector::Config(property_path.map(str::to_string)));
        injection.optional = true;
        injection
    }

    /// Change the delivery style
    pub fn styled(mut self, style: InjectionStyle) -> Self {
        self.style = style;
        self
    }

    /// Resolve to `None` instead of failing when unbound
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Inject an intercepting proxy of the resolved class instance
    pub fn as_proxy(mut self) -> Self {
        self.as_proxy_with_interceptors = true;
        self
    }

    /// Resolve with a custom function instead of the selector
    pub fn with_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&Context, &Injection, &ResolutionSession) -> Result<ValueOrPromise<Option<BoxedValue>>>
            + Send
            + Sync
            + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Order multi-value injections
    pub fn sorted_by(mut self, comparator: BindingComparator) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// Attach the injection to a target
    pub fn at(mut self, target: InjectionTarget) -> Self {
        self.target = target;
        self
    }

    pub fn selector(&self) -> &InjectionSelector {
        &self.selector
    }

    pub fn style(&self) -> InjectionStyle {
        self.style
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn target(&self) -> &InjectionTarget {
        &self.target
    }

    /// Bound key, if the injection resolves a single key
    pub fn binding_key(&self) -> Option<&BindingKey> {
        match &self.selector {
            InjectionSelector::Key(key) => Some(key),
            _ => None,
        }
    }
}

impl fmt::Debug for Injection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let selector = match &self.selector {
            InjectionSelector::Key(key) => key.to_string(),
            InjectionSelector::Filter(_) => "<filter>".to_string(),
            InjectionSelector::Config(path) => format!("<config {}>", path.as_deref().unwrap_or("")),
        };
        f.debug_struct("Injection")
            .field("selector", &selector)
            .field("style", &self.style)
            .field("optional", &self.optional)
            .field("target", &self.target.describe())
            .finish()
    }
}

/// One declared parameter of a constructor, method or factory
#[derive(Clone)]
pub enum Param {
    /// Resolved from the context
    Injected(Injection),
    /// Taken from caller-supplied arguments
    Plain,
    /// Caller-supplied if available, otherwise this value
    Default(BoxedValue),
}

impl Param {
    /// Shorthand for `Param::Injected(Injection::key(key))`
    pub fn inject(key: impl Into<BindingKey>) -> Self {
        Param::Injected(Injection::key(key))
    }

    pub fn default_value<T: Any + Send + Sync>(value: T) -> Self {
        Param::Default(boxed(value))
    }
}

impl From<Injection> for Param {
    fn from(injection: Injection) -> Self {
        Param::Injected(injection)
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Injected(injection) => f.debug_tuple("Injected").field(injection).finish(),
            Param::Plain => f.write_str("Plain"),
            Param::Default(_) => f.write_str("Default(..)"),
        }
    }
}

/// Resolved arguments and injected properties handed to constructors,
/// methods and factories.
#[derive(Clone)]
pub struct Arguments {
    target: InjectionTarget,
    values: Vec<Option<BoxedValue>>,
    properties: HashMap<String, Option<BoxedValue>>,
}

impl Arguments {
    pub fn new(target: InjectionTarget, values: Vec<Option<BoxedValue>>) -> Self {
        Self {
            target,
            values,
            properties: HashMap::new(),
        }
    }

    /// Arguments from plain values
    pub fn from_values(target: InjectionTarget, values: Vec<BoxedValue>) -> Self {
        Self::new(target, values.into_iter().map(Some).collect())
    }

    pub(crate) fn with_properties(mut self, properties: HashMap<String, Option<BoxedValue>>) -> Self {
        self.properties = properties;
        self
    }

    fn slot_name(&self, index: usize) -> String {
        self.target.with_index(index).describe()
    }

    /// Argument `index` downcast to `T`; fails if missing.
    pub fn get<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>> {
        match self.raw(index) {
            Some(value) => downcast(Arc::clone(value), &self.slot_name(index)),
            None => Err(ContextError::resolution(
                self.slot_name(index),
                "no value was resolved for this argument",
            )),
        }
    }

    /// Argument `index` downcast to `T`, `None` if missing
    pub fn optional<T: Any + Send + Sync>(&self, index: usize) -> Result<Option<Arc<T>>> {
        self.raw(index)
            .map(|value| downcast(Arc::clone(value), &self.slot_name(index)))
            .transpose()
    }

    /// Multi-value argument (from a filter injection) downcast element-wise
    pub fn list<T: Any + Send + Sync>(&self, index: usize) -> Result<Vec<Arc<T>>> {
        let name = self.slot_name(index);
        let items = self.get::<Vec<BoxedValue>>(index)?;
        items
            .iter()
            .map(|item| downcast(Arc::clone(item), &name))
            .collect()
    }

    /// Getter-style argument
    pub fn getter(&self, index: usize) -> Result<Arc<Getter>> {
        self.get::<Getter>(index)
    }

    /// View-style argument
    pub fn view(&self, index: usize) -> Result<Arc<ContextView>> {
        self.get::<ContextView>(index)
    }

    /// Injected property downcast to `T`; fails if missing
    pub fn property<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let target = InjectionTarget::property(&self.target.class, name).describe();
        match self.properties.get(name).and_then(Option::as_ref) {
            Some(value) => downcast(Arc::clone(value), &target),
            None => Err(ContextError::resolution(target, "no value was resolved for this property")),
        }
    }

    /// Injected property, `None` if missing
    pub fn optional_property<T: Any + Send + Sync>(&self, name: &str) -> Result<Option<Arc<T>>> {
        let target = InjectionTarget::property(&self.target.class, name).describe();
        self.properties
            .get(name)
            .and_then(Option::as_ref)
            .map(|value| downcast(Arc::clone(value), &target))
            .transpose()
    }

    /// Raw argument value
    pub fn raw(&self, index: usize) -> Option<&BoxedValue> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Replace argument `index`, padding with empty slots as needed
    pub fn set(&mut self, index: usize, value: BoxedValue) {
        if index >= self.values.len() {
            self.values.resize(index + 1, None);
        }
        self.values[index] = Some(value);
    }

    pub fn push(&mut self, value: BoxedValue) {
        self.values.push(Some(value));
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn target(&self) -> &InjectionTarget {
        &self.target
    }

    pub fn values(&self) -> &[Option<BoxedValue>] {
        &self.values
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arguments")
            .field("target", &self.target.describe())
            .field("len", &self.values.len())
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Clone)]
enum GetterSource {
    Key {
        context: Context,
        key: BindingKey,
        optional: bool,
    },
    View(ContextView),
}

/// Resolves a dependency on demand rather than at injection time.
#[derive(Clone)]
pub struct Getter {
    source: GetterSource,
}

impl Getter {
    /// Getter for one key
    pub fn key(context: Context, key: impl Into<BindingKey>, optional: bool) -> Self {
        Self {
            source: GetterSource::Key {
                context,
                key: key.into(),
                optional,
            },
        }
    }

    /// Getter over the current values of a view
    pub fn view(view: ContextView) -> Self {
        Self {
            source: GetterSource::View(view),
        }
    }

    /// Resolve now. A view getter yields a `Vec<BoxedValue>`.
    pub fn get_value(&self) -> Result<ValueOrPromise<Option<BoxedValue>>> {
        match &self.source {
            GetterSource::Key {
                context,
                key,
                optional,
            } => {
                let options = ResolutionOptions {
                    optional: *optional,
                    ..ResolutionOptions::default()
                };
                context.get_value_or_promise(key, &options)
            }
            GetterSource::View(view) => view.resolve(None)?.transform(|values| Ok(Some(boxed(values)))),
        }
    }

    fn name(&self) -> String {
        match &self.source {
            GetterSource::Key { key, .. } => key.to_string(),
            GetterSource::View(view) => format!("view of {}", view.context().name()),
        }
    }

    /// Resolve and downcast; fails when nothing is bound
    pub async fn get<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        let value = self.get_value()?.resolve().await?;
        self.required(value)
    }

    /// Synchronous [`get`](Self::get)
    pub fn get_sync<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        let value = self.get_value()?.into_sync(&self.name())?;
        self.required(value)
    }

    /// Resolve a view getter into typed values
    pub async fn values<T: Any + Send + Sync>(&self) -> Result<Vec<Arc<T>>> {
        let name = self.name();
        let items = self.get::<Vec<BoxedValue>>().await?;
        items.iter().map(|v| downcast(Arc::clone(v), &name)).collect()
    }

    fn required<T: Any + Send + Sync>(&self, value: Option<BoxedValue>) -> Result<Arc<T>> {
        match value {
            Some(v) => downcast(v, &self.name()),
            None => {
                let context = match &self.source {
                    GetterSource::Key { context, .. } => context.name().to_string(),
                    GetterSource::View(view) => view.context().name().to_string(),
                };
                Err(ContextError::not_bound(self.name(), context))
            }
        }
    }
}

impl fmt::Debug for Getter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Getter").field("source", &self.name()).finish()
    }
}

/// Resolve one injection point.
pub fn resolve_injection(
    ctx: &Context,
    injection: &Injection,
    session: Option<&ResolutionSession>,
) -> Result<ValueOrPromise<Option<BoxedValue>>> {
    let mut session = ResolutionSession::fork(session);
    session.push_injection(injection.clone());

    #[cfg(feature = "logging")]
    trace!(
        target: "contexify",
        context = ctx.name(),
        injection = %injection.target.describe(),
        path = %session.resolution_path(),
        "Resolving injection"
    );

    if let Some(resolver) = &injection.resolver {
        return resolver(ctx, injection, &session);
    }

    let comparator = injection.comparator.clone();
    match (&injection.selector, injection.style) {
        (InjectionSelector::Key(key), InjectionStyle::Value) => {
            let options = ResolutionOptions {
                optional: injection.optional,
                session: Some(session),
                as_proxy_with_interceptors: injection.as_proxy_with_interceptors,
            };
            ctx.get_value_or_promise(key, &options)
        }
        (InjectionSelector::Key(key), InjectionStyle::Getter) => Ok(ValueOrPromise::Value(Some(
            boxed(Getter::key(ctx.clone(), key.clone(), injection.optional)),
        ))),
        (InjectionSelector::Key(key), InjectionStyle::View) => {
            let view = ctx.create_view(filter_by_key(key.key()), comparator);
            Ok(ValueOrPromise::Value(Some(boxed(view))))
        }
        (InjectionSelector::Filter(filter), InjectionStyle::Value) => {
            let view = ContextView::new(ctx.clone(), Arc::clone(filter), comparator);
            view.resolve(Some(&session))?
                .transform(|values| Ok(Some(boxed(values))))
        }
        (InjectionSelector::Filter(filter), InjectionStyle::Getter) => {
            let view = ctx.create_view(Arc::clone(filter), comparator);
            Ok(ValueOrPromise::Value(Some(boxed(Getter::view(view)))))
        }
        (InjectionSelector::Filter(filter), InjectionStyle::View) => {
            let view = ctx.create_view(Arc::clone(filter), comparator);
            Ok(ValueOrPromise::Value(Some(boxed(view))))
        }
        (InjectionSelector::Config(path), _) => {
            let Some(binding) = session.current_binding() else {
                return Ok(ValueOrPromise::Value(None));
            };
            let key = binding.key().to_string();
            let options = ResolutionOptions {
                optional: injection.optional,
                session: Some(session.clone()),
                as_proxy_with_interceptors: false,
            };
            ctx.get_config_as_value_or_promise(&key, path.as_deref(), &options)
        }
    }
}

/// Resolve the declared parameters of `target`.
///
/// Non-injected parameters consume `non_injected` from left to right;
/// leftover caller values are appended.
pub fn resolve_injected_arguments(
    params: &[Param],
    target: &InjectionTarget,
    ctx: &Context,
    session: Option<&ResolutionSession>,
    non_injected: Vec<BoxedValue>,
) -> Result<ValueOrPromise<Arguments>> {
    let mut supplied = non_injected.into_iter();
    let mut slots = Vec::with_capacity(params.len());
    for (index, param) in params.iter().enumerate() {
        let slot = match param {
            Param::Injected(injection) => {
                let injection = injection.clone().at(target.with_index(index));
                resolve_injection(ctx, &injection, session)?
            }
            Param::Plain => match supplied.next() {
                Some(value) => ValueOrPromise::Value(Some(value)),
                None => {
                    return Err(ContextError::MissingInjection {
                        target: target.base_name(),
                        index,
                    });
                }
            },
            Param::Default(default) => {
                ValueOrPromise::Value(Some(supplied.next().unwrap_or_else(|| Arc::clone(default))))
            }
        };
        slots.push(slot);
    }
    slots.extend(supplied.map(|value| ValueOrPromise::Value(Some(value))));

    let target = target.clone();
    resolve_list(slots, |slot, _| Ok(slot))?
        .transform(move |values| Ok(Arguments::new(target, values)))
}

/// Resolve the injected properties of a class
pub fn resolve_injected_properties(
    descriptor: &ClassDescriptor,
    ctx: &Context,
    session: Option<&ResolutionSession>,
) -> Result<ValueOrPromise<HashMap<String, Option<BoxedValue>>>> {
    let properties = descriptor.properties();
    let names: Vec<String> = properties.iter().map(|(name, _)| name.clone()).collect();
    let resolved = resolve_list(properties, |(name, injection), _| {
        let injection = injection
            .clone()
            .at(InjectionTarget::property(descriptor.name(), name));
        resolve_injection(ctx, &injection, session)
    })?;
    resolved.transform(move |values| Ok(names.into_iter().zip(values).collect()))
}

/// Create an instance of a class with its dependencies injected.
pub fn instantiate_class(
    descriptor: &Arc<ClassDescriptor>,
    ctx: &Context,
    session: Option<&ResolutionSession>,
    non_injected: Vec<BoxedValue>,
) -> Result<ValueOrPromise<BoxedValue>> {
    #[cfg(feature = "logging")]
    debug!(
        target: "contexify",
        class = descriptor.name(),
        context = ctx.name(),
        "Instantiating class"
    );

    let args = resolve_injected_arguments(
        descriptor.constructor_params(),
        &InjectionTarget::constructor(descriptor.name(), 0),
        ctx,
        session,
        non_injected,
    )?;
    let properties = resolve_injected_properties(descriptor, ctx, session)?;
    let descriptor = Arc::clone(descriptor);
    args.and_then(move |args| {
        properties.transform(move |properties| descriptor.construct(args.with_properties(properties)))
    })
}

/// Invoke a method of `target` with its parameters injected.
///
/// Goes through the interceptor chain unless `options.skip_interceptors`.
pub fn invoke_method<T: Injectable>(
    ctx: &Context,
    target: &Arc<T>,
    method: &str,
    non_injected: Vec<BoxedValue>,
    options: &InvocationOptions,
) -> Result<ValueOrPromise<BoxedValue>> {
    let descriptor = ClassDescriptor::of::<T>();
    let target: BoxedValue = Arc::clone(target) as BoxedValue;
    if options.skip_interceptors {
        invoke_target_method(ctx, &target, &descriptor, method, non_injected, options)
    } else {
        invoke_method_with_interceptors(ctx, target, &descriptor, method, non_injected, options)
    }
}

/// Call the method itself, injecting parameters unless told not to.
pub(crate) fn invoke_target_method(
    ctx: &Context,
    target: &BoxedValue,
    descriptor: &ClassDescriptor,
    method: &str,
    args: Vec<BoxedValue>,
    options: &InvocationOptions,
) -> Result<ValueOrPromise<BoxedValue>> {
    let member = InjectionTarget::method(descriptor.name(), method, 0);
    let Some(method_desc) = descriptor.method(method) else {
        return Err(ContextError::resolution(
            member.base_name(),
            "the method is not declared in the class metadata",
        ));
    };

    if options.skip_parameter_injection {
        let invoke = Arc::clone(&method_desc.invoke);
        return invoke(target, Arguments::from_values(member, args));
    }

    let resolved = resolve_injected_arguments(
        &method_desc.params,
        &member,
        ctx,
        options.session.as_ref(),
        args,
    )?;
    let invoke = Arc::clone(&method_desc.invoke);
    let target = Arc::clone(target);
    resolved.and_then(move |args| invoke(&target, args))
}
