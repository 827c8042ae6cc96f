//! Provider classes
//!
//! A provider is a class whose instance is not the bound value itself: the
//! binding resolves to whatever [`Provider::value`] returns.

use crate::{BoxedValue, Result, ValueOrPromise};

/// A class that produces the value of its binding.
///
/// The provider instance is built like any other class (constructor
/// injection included); `value()` is called on every resolution that is not
/// served from the binding's cache.
///
/// # Examples
///
/// ```rust
/// use contexify::prelude::*;
///
/// struct DateProvider;
///
/// impl Provider for DateProvider {
///     fn value(&self) -> Result<ValueOrPromise<BoxedValue>> {
///         Ok(ValueOrPromise::Value(boxed("2026-01-01".to_string())))
///     }
/// }
///
/// impl Injectable for DateProvider {
///     fn metadata() -> ClassMetadata<Self> {
///         ClassMetadata::new("DateProvider")
///             .constructor(vec![], |_| Ok(DateProvider))
///             .provider()
///     }
/// }
///
/// let ctx = Context::new("app");
/// ctx.bind("today").unwrap().to_provider::<DateProvider>().unwrap();
/// assert_eq!(ctx.get_sync::<String>("today").unwrap().as_str(), "2026-01-01");
/// ```
pub trait Provider: Send + Sync + 'static {
    /// Produce the bound value, synchronously or as a pending value
    fn value(&self) -> Result<ValueOrPromise<BoxedValue>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injection::Param;
    use crate::metadata::{ClassMetadata, Injectable};
    use crate::{BindingScope, Context, boxed};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter {
        calls: AtomicU32,
        prefix: Arc<String>,
    }

    impl Provider for Counter {
        fn value(&self) -> Result<ValueOrPromise<BoxedValue>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ValueOrPromise::Value(boxed(format!("{}-{n}", self.prefix))))
        }
    }

    impl Injectable for Counter {
        fn metadata() -> ClassMetadata<Self> {
            ClassMetadata::new("Counter").constructor(vec![Param::inject("prefix")], |args| {
                Ok(Counter {
                    calls: AtomicU32::new(0),
                    prefix: args.get::<String>(0)?,
                })
            })
        }
    }

    struct AsyncProvider;

    impl Provider for AsyncProvider {
        fn value(&self) -> Result<ValueOrPromise<BoxedValue>> {
            Ok(ValueOrPromise::pending(async { Ok(boxed(42u32)) }))
        }
    }

    impl Injectable for AsyncProvider {
        fn metadata() -> ClassMetadata<Self> {
            ClassMetadata::new("AsyncProvider")
                .constructor(vec![], |_| Ok(AsyncProvider))
                .provider()
        }
    }

    #[test]
    fn test_provider_injected_and_called_per_resolution() {
        let ctx = Context::new("app");
        ctx.bind("prefix").unwrap().to("id".to_string()).unwrap();
        ctx.bind("id").unwrap().to_provider::<Counter>().unwrap();

        // a fresh provider instance per transient resolution
        assert_eq!(ctx.get_sync::<String>("id").unwrap().as_str(), "id-0");
        assert_eq!(ctx.get_sync::<String>("id").unwrap().as_str(), "id-0");
    }

    #[test]
    fn test_singleton_provider_value_cached() {
        let ctx = Context::new("app");
        ctx.bind("prefix").unwrap().to("id".to_string()).unwrap();
        ctx.bind("id")
            .unwrap()
            .to_provider::<Counter>()
            .unwrap()
            .in_scope(BindingScope::Singleton);
        let a = ctx.get_sync::<String>("id").unwrap();
        let b = ctx.get_sync::<String>("id").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_async_provider() {
        let ctx = Context::new("app");
        ctx.bind("answer").unwrap().to_provider::<AsyncProvider>().unwrap();
        assert_eq!(*ctx.get::<u32>("answer").await.unwrap(), 42);
        assert!(ctx.get_sync::<u32>("answer").is_err());
    }
}
