//! Example demonstrating logging capabilities
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-json
//! ```
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example logging --features logging-pretty
//! ```

use contexify::prelude::*;

#[allow(dead_code)]
struct Database {
    url: String,
}

#[allow(dead_code)]
struct UserService {
    db: Arc<Database>,
}

impl Injectable for UserService {
    fn metadata() -> ClassMetadata<Self> {
        ClassMetadata::new("UserService").constructor(vec![Param::inject("db")], |args| {
            Ok(UserService {
                db: args.get::<Database>(0)?,
            })
        })
    }
}

fn main() {
    // Initialize logging - uses JSON if logging-json feature enabled,
    // pretty if logging-pretty enabled
    #[cfg(feature = "logging")]
    {
        contexify::logging::init();
    }

    println!("=== Contexify Logging Demo ===\n");

    // Create root context (logs: "Creating context")
    let app = Context::new("application");

    // Register bindings (logs: "Adding binding")
    app.bind("db")
        .unwrap()
        .to(Database {
            url: "postgres://localhost/mydb".into(),
        })
        .unwrap();
    app.bind("services.users")
        .unwrap()
        .to_class::<UserService>()
        .unwrap()
        .in_scope(BindingScope::Singleton);

    // A lazy value (logs on first resolution only)
    app.bind("request.id")
        .unwrap()
        .to_dynamic_value(|| {
            println!("  [App] Request id being created...");
            "default".to_string()
        })
        .unwrap();

    // Resolve (trace level: "Computing binding value", then cache hits)
    let _users = app.get_sync::<UserService>("services.users").unwrap();
    let _again = app.get_sync::<UserService>("services.users").unwrap();

    // A key that does not exist, resolved optionally
    let missing = app.get_sync_with::<i32>("missing", ResolutionOptions::optional()).unwrap();
    assert!(missing.is_none());

    // Child context (logs: "Creating context" with its parent)
    let request = Context::child(&app, "request");

    // Override in the child
    request.bind("request.id").unwrap().to("req-12345".to_string()).unwrap();

    // Local override
    let _id = request.get_sync::<String>("request.id").unwrap();

    // Falls back to the parent
    let _db = request.get_sync::<Database>("db").unwrap();

    // Locked bindings refuse to be replaced (logs: "Refusing to unbind locked binding")
    app.get_binding("db").unwrap().lock();
    assert!(!app.unbind("db").unwrap());

    // Tear down the request (logs: "Closing context")
    request.close();

    println!("\n=== Demo Complete ===");
    println!("Check the log output above to see structured logging in action!");
    println!("\nTip: Use --features logging-json for production (JSON output)");
    println!("     Use --features logging-pretty for development (colorful output)");
}
