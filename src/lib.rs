//! # Contexify - Hierarchical Inversion-of-Control Contexts
//!
//! A context-based dependency injection container: values are registered
//! as bindings under string keys in a tree of contexts, resolved lazily
//! (synchronously when possible, asynchronously when a dependency is
//! pending), cached according to their scope, observed through live views,
//! and invoked through interceptor chains.
//!
//! ## Features
//!
//! - 🌳 **Hierarchical contexts** - Child bindings shadow parent bindings; lookups walk the chain
//! - ⚡ **Sync when possible** - Resolution only becomes async when a dependency is pending
//! - 🔒 **At-most-once singletons** - Concurrent callers share one in-flight instantiation
//! - 🔁 **Cycle detection** - Circular dependencies fail fast with the full path
//! - 🏷️ **Tags and filters** - Find bindings by key patterns, tag names, regexes or tag maps
//! - 👀 **Live views** - Filtered binding lists that refresh on bind/unbind
//! - 🧅 **Interceptors** - Global, class and method middleware around invocations
//! - 📊 **Observable** - Optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use contexify::prelude::*;
//!
//! let app = Context::new("app");
//! app.bind("greeting").unwrap().to("Hello".to_string()).unwrap();
//!
//! // Per-request context - inherits from app
//! let request = Context::child(&app, "request");
//! request.bind("user").unwrap().to("John".to_string()).unwrap();
//!
//! let greeting = request.get_sync::<String>("greeting").unwrap();
//! assert_eq!(greeting.as_str(), "Hello");
//!
//! // The parent cannot see child bindings
//! assert!(!app.is_bound("user"));
//! ```
//!
//! ## Scopes
//!
//! ```rust
//! use contexify::prelude::*;
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! static COUNTER: AtomicU64 = AtomicU64::new(0);
//!
//! let ctx = Context::new("app");
//!
//! // Transient (default) - new value on every resolution
//! ctx.bind("request-id").unwrap()
//!     .to_dynamic_value(|| COUNTER.fetch_add(1, Ordering::SeqCst)).unwrap();
//!
//! // Singleton - one value, cached in the owning context
//! ctx.bind("boot-id").unwrap()
//!     .to_dynamic_value(|| COUNTER.fetch_add(1, Ordering::SeqCst)).unwrap()
//!     .in_scope(BindingScope::Singleton);
//!
//! let a = ctx.get_sync::<u64>("request-id").unwrap();
//! let b = ctx.get_sync::<u64>("request-id").unwrap();
//! assert_ne!(a, b);
//!
//! let c = ctx.get_sync::<u64>("boot-id").unwrap();
//! let d = ctx.get_sync::<u64>("boot-id").unwrap();
//! assert!(Arc::ptr_eq(&c, &d));
//! ```
//!
//! ## Asynchronous values
//!
//! ```rust
//! use contexify::prelude::*;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let ctx = Context::new("app");
//! ctx.bind("config").unwrap()
//!     .to_async_value(|_| async { Ok(serde_json::json!({"port": 3000})) }).unwrap();
//!
//! // The sync accessor refuses pending values
//! assert!(ctx.get_sync::<serde_json::Value>("config").is_err());
//!
//! // Property paths address parts of a value
//! let port = ctx.get::<serde_json::Value>("config#port").await.unwrap();
//! assert_eq!(*port, 3000);
//! # });
//! ```

mod binding;
mod context;
mod error;
mod factory;
mod filter;
mod injection;
mod interceptor;
mod key;
#[cfg(feature = "logging")]
pub mod logging;
mod metadata;
mod provider;
mod proxy;
mod scope;
mod session;
mod storage;
mod subscription;
mod value_promise;
mod view;

pub use binding::*;
pub use context::*;
pub use error::*;
pub use factory::{BindingType, DynamicValueFn};
pub use filter::*;
pub use injection::*;
pub use interceptor::*;
pub use key::*;
pub use metadata::*;
pub use provider::*;
pub use proxy::*;
pub use scope::*;
pub use session::*;
pub use subscription::*;
pub use value_promise::*;
pub use view::*;

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Arguments, Binding, BindingKey, BindingScope, BoxedValue, ClassMetadata, Context,
        ContextError, ContextView, Injectable, Injection, InterceptedProxy, Interceptor,
        InvocationContext, Next, Param, Provider, ResolutionOptions, Result, ValueOrPromise,
        boxed, filter_by_key, filter_by_tag,
    };
    pub use std::sync::Arc;
}
