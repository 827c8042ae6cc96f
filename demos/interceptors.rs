//! Interceptor chains: global groups, caching, and proxies
//!
//! ```bash
//! cargo run --example interceptors
//! ```

use contexify::prelude::*;
use contexify::{
    BindingScope, ContextBindings, InvocationOptions, RegisterInterceptorOptions, downcast,
    interceptor, invoke_method, register_interceptor, register_interceptor_factory,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

static LOOKUPS: AtomicU32 = AtomicU32::new(0);

struct UserController;

impl Injectable for UserController {
    fn metadata() -> ClassMetadata<Self> {
        ClassMetadata::new("UserController")
            .constructor(vec![], |_| Ok(UserController))
            .method("find", vec![Param::Plain], |_: &UserController, args| {
                let id = args.get::<u32>(0)?;
                LOOKUPS.fetch_add(1, Ordering::SeqCst);
                Ok(ValueOrPromise::Value(boxed(format!("user-{id}"))))
            })
            .intercept("interceptors.cache")
    }
}

/// Remembers results by method and first argument
#[derive(Default)]
struct CachingInterceptor {
    cache: Mutex<HashMap<String, BoxedValue>>,
}

impl Interceptor for CachingInterceptor {
    fn intercept(&self, invocation: Arc<InvocationContext>, next: Next) -> Result<ValueOrPromise<BoxedValue>> {
        let id = invocation.arg::<u32>(0)?;
        let key = format!("{}:{id}", invocation.target_name());
        if let Some(hit) = self.cache.lock().get(&key) {
            return Ok(ValueOrPromise::Value(Arc::clone(hit)));
        }
        let result = next.proceed()?.into_sync(&key)?;
        self.cache.lock().insert(key, Arc::clone(&result));
        Ok(ValueOrPromise::Value(result))
    }
}

fn find(ctx: &Context, controller: &Arc<UserController>, id: u32) -> String {
    let result = invoke_method(ctx, controller, "find", vec![boxed(id)], &InvocationOptions::default())
        .unwrap()
        .into_sync("find")
        .unwrap();
    downcast::<String>(result, "find").unwrap().as_str().to_string()
}

fn main() {
    println!("=== Contexify Interceptors Demo ===\n");

    let app = Context::new("application");
    let log = Arc::new(Mutex::new(Vec::<String>::new()));

    // Global interceptors run in the order of their groups
    app.bind(ContextBindings::GLOBAL_INTERCEPTOR_ORDERED_GROUPS)
        .unwrap()
        .to(vec!["auth".to_string(), "log".to_string()])
        .unwrap();
    for group in ["log", "auth"] {
        let log = Arc::clone(&log);
        register_interceptor(
            &app,
            interceptor(move |invocation, next| {
                log.lock().push(format!("{group}: {}", invocation.target_name()));
                next.proceed()
            }),
            RegisterInterceptorOptions::global().group(group),
        )
        .unwrap();
    }

    // Transient factory: a fresh cache per invocation, so nothing is cached
    register_interceptor_factory(
        &app,
        || Arc::new(CachingInterceptor::default()) as Arc<dyn Interceptor>,
        RegisterInterceptorOptions::default().key("interceptors.cache"),
    )
    .unwrap();

    let controller = Arc::new(UserController);
    find(&app, &controller, 1);
    find(&app, &controller, 1);
    println!("Transient cache: {} lookups", LOOKUPS.load(Ordering::SeqCst));

    // Singleton factory: one cache shared by every invocation
    LOOKUPS.store(0, Ordering::SeqCst);
    register_interceptor_factory(
        &app,
        || Arc::new(CachingInterceptor::default()) as Arc<dyn Interceptor>,
        RegisterInterceptorOptions::default()
            .key("interceptors.cache")
            .scope(BindingScope::Singleton),
    )
    .unwrap();
    find(&app, &controller, 1);
    find(&app, &controller, 1);
    println!("Singleton cache: {} lookup", LOOKUPS.load(Ordering::SeqCst));

    println!("\nGlobal interceptor order:");
    for line in log.lock().iter().take(2) {
        println!("  {line}");
    }

    // Proxies route declared methods through the same chain
    app.bind("controllers.users")
        .unwrap()
        .to_class::<UserController>()
        .unwrap()
        .in_scope(BindingScope::Singleton);
    let proxy = app
        .get_sync_with::<InterceptedProxy<UserController>>(
            "controllers.users",
            ResolutionOptions::default().as_proxy(),
        )
        .unwrap()
        .unwrap();
    let user = proxy.call_sync::<String>("find", vec![boxed(7u32)]).unwrap();
    println!("\nProxy call via {:?}: {user}", proxy.source().map(|s| s.to_string()));

    println!("\n=== Demo Complete ===");
}
