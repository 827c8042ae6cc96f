//! Intercepting proxies
//!
//! Rust cannot redirect arbitrary method calls at runtime, so a proxy
//! exposes the target's fields and plain methods through `Deref` and routes
//! declared methods through the interceptor chain via
//! [`InterceptedProxy::invoke`].

use crate::interceptor::{InvocationOptions, InvocationSource, invoke_method_with_interceptors};
use crate::metadata::{ClassDescriptor, Injectable};
use crate::session::ResolutionSession;
use crate::{BoxedValue, Context, Result, ValueOrPromise, downcast};
use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// An instance whose declared methods run through interceptors.
///
/// Resolve one with [`ResolutionOptions::as_proxy`](crate::ResolutionOptions::as_proxy)
/// or build it with [`create_proxy_with_interceptors`].
pub struct InterceptedProxy<T: Injectable> {
    target: Arc<T>,
    context: Context,
    session: Option<ResolutionSession>,
    source: Option<InvocationSource>,
    descriptor: Arc<ClassDescriptor>,
}

impl<T: Injectable> InterceptedProxy<T> {
    pub fn new(
        target: Arc<T>,
        context: Context,
        session: Option<ResolutionSession>,
        source: Option<InvocationSource>,
    ) -> Self {
        Self {
            target,
            context,
            session,
            source,
            descriptor: ClassDescriptor::of::<T>(),
        }
    }

    /// The wrapped instance
    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    /// Context interceptors and injected parameters are resolved from
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn source(&self) -> Option<&InvocationSource> {
        self.source.as_ref()
    }

    /// Invoke a declared method through the interceptor chain
    pub fn invoke(&self, method: &str, args: Vec<BoxedValue>) -> Result<ValueOrPromise<BoxedValue>> {
        let options = InvocationOptions {
            source: self.source.clone(),
            session: self.session.clone(),
            ..InvocationOptions::default()
        };
        let target: BoxedValue = Arc::clone(&self.target) as BoxedValue;
        invoke_method_with_interceptors(&self.context, target, &self.descriptor, method, args, &options)
    }

    /// Invoke and wait, downcasting the result to `R`
    pub async fn call<R: Any + Send + Sync>(&self, method: &str, args: Vec<BoxedValue>) -> Result<Arc<R>> {
        let value = self.invoke(method, args)?.resolve().await?;
        downcast(value, &format!("{}.prototype.{}", self.descriptor.name(), method))
    }

    /// Synchronous [`call`](Self::call)
    pub fn call_sync<R: Any + Send + Sync>(&self, method: &str, args: Vec<BoxedValue>) -> Result<Arc<R>> {
        let name = format!("{}.prototype.{}", self.descriptor.name(), method);
        let value = self.invoke(method, args)?.into_sync(&name)?;
        downcast(value, &name)
    }
}

impl<T: Injectable> Deref for InterceptedProxy<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.target
    }
}

impl<T: Injectable> Clone for InterceptedProxy<T> {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
            context: self.context.clone(),
            session: self.session.clone(),
            source: self.source.clone(),
            descriptor: Arc::clone(&self.descriptor),
        }
    }
}

impl<T: Injectable> fmt::Debug for InterceptedProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptedProxy")
            .field("class", &self.descriptor.name())
            .field("context", &self.context.name())
            .field("source", &self.source)
            .finish()
    }
}

/// Wrap `target` so its declared methods are intercepted
pub fn create_proxy_with_interceptors<T: Injectable>(
    target: Arc<T>,
    context: &Context,
    session: Option<ResolutionSession>,
    source: Option<InvocationSource>,
) -> InterceptedProxy<T> {
    InterceptedProxy::new(target, context.clone(), session, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::ResolutionOptions;
    use crate::injection::Param;
    use crate::interceptor::{RegisterInterceptorOptions, interceptor, register_interceptor};
    use crate::metadata::ClassMetadata;
    use crate::{BindingScope, boxed};
    use parking_lot::Mutex;

    struct Greeter {
        prefix: String,
    }

    impl Injectable for Greeter {
        fn metadata() -> ClassMetadata<Self> {
            ClassMetadata::new("Greeter")
                .constructor(vec![], |_| {
                    Ok(Greeter {
                        prefix: "Hello".to_string(),
                    })
                })
                .method("greet", vec![Param::Plain], |g: &Greeter, args| {
                    let name = args.get::<String>(0)?;
                    Ok(ValueOrPromise::Value(boxed(format!("{}, {name}", g.prefix))))
                })
        }
    }

    #[test]
    fn test_proxy_routes_through_interceptors() {
        let ctx = Context::new("app");
        let sources = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&sources);
        register_interceptor(
            &ctx,
            interceptor(move |invocation, next| {
                seen.lock().push(invocation.source().map(|s| s.to_string()));
                next.proceed()?.transform(|result| {
                    let text = downcast::<String>(result, "greet")?;
                    Ok(boxed(format!("[{text}]")))
                })
            }),
            RegisterInterceptorOptions::global(),
        )
        .unwrap();
        ctx.bind("greeter")
            .unwrap()
            .to_class::<Greeter>()
            .unwrap()
            .in_scope(BindingScope::Singleton);

        let proxy = ctx
            .get_sync_with::<InterceptedProxy<Greeter>>("greeter", ResolutionOptions::default().as_proxy())
            .unwrap()
            .unwrap();
        // plain field access is not intercepted
        assert_eq!(proxy.prefix, "Hello");

        let out = proxy.call_sync::<String>("greet", vec![boxed("John".to_string())]).unwrap();
        assert_eq!(out.as_str(), "[Hello, John]");
        assert_eq!(*sources.lock(), vec![Some("proxy:greeter".to_string())]);

        // the cached instance itself stays unwrapped
        let plain = ctx.get_sync::<Greeter>("greeter").unwrap();
        assert!(Arc::ptr_eq(&plain, proxy.target()));
    }

    #[test]
    fn test_create_proxy_directly() {
        let ctx = Context::new("app");
        let proxy = create_proxy_with_interceptors(
            Arc::new(Greeter {
                prefix: "Hi".to_string(),
            }),
            &ctx,
            None,
            None,
        );
        let out = proxy.call_sync::<String>("greet", vec![boxed("Jane".to_string())]).unwrap();
        assert_eq!(out.as_str(), "Hi, Jane");
        assert!(proxy.call_sync::<String>("missing", vec![]).is_err());
    }
}
