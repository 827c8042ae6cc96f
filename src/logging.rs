//! Logging setup for contexify
//!
//! Every event the crate emits uses the `contexify` target: context
//! creation, binding registration, resolution and cache hits, observer
//! dispatch, and interceptor invocation.
//!
//! # Features
//!
//! - `logging` - Emit `tracing` events (default)
//! - `logging-json` - JSON subscriber output
//! - `logging-pretty` - Human-readable subscriber output
//!
//! # Example
//!
//! ```rust,ignore
//! use contexify::logging;
//!
//! // JSON if logging-json, pretty if logging-pretty
//! logging::init();
//!
//! // Only resolution events, with source locations
//! logging::builder()
//!     .trace()
//!     .contexify_only()
//!     .with_file()
//!     .with_line_number()
//!     .pretty()
//!     .init();
//! ```

#[cfg(feature = "logging")]
use tracing::Level;

/// Target used by every event this crate emits
pub const LOG_TARGET: &str = "contexify";

/// Subscriber output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON structured logging (production default)
    #[default]
    Json,
    /// Multi-line, human-readable output
    Pretty,
    /// Single-line output
    Compact,
}

/// Builder for the `tracing-subscriber` setup
#[cfg(feature = "logging")]
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    respect_env: bool,
    with_file: bool,
    with_line_number: bool,
    with_thread_ids: bool,
    with_thread_names: bool,
}

#[cfg(feature = "logging")]
impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Json,
            target: None,
            respect_env: false,
            with_file: false,
            with_line_number: false,
            with_thread_ids: false,
            with_thread_names: false,
        }
    }
}

#[cfg(feature = "logging")]
impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimum level
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Include per-resolution events (cache hits, injections, chain steps)
    pub fn trace(self) -> Self {
        self.with_level(Level::TRACE)
    }

    /// Context, binding and registration events
    pub fn debug(self) -> Self {
        self.with_level(Level::DEBUG)
    }

    pub fn info(self) -> Self {
        self.with_level(Level::INFO)
    }

    /// Cycle detection and failed observers only
    pub fn warn(self) -> Self {
        self.with_level(Level::WARN)
    }

    pub fn error(self) -> Self {
        self.with_level(Level::ERROR)
    }

    /// Only show events from `target`
    pub fn with_target_filter(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Only show contexify events
    pub fn contexify_only(self) -> Self {
        self.with_target_filter(LOG_TARGET)
    }

    /// Let `RUST_LOG` override the configured level and target
    pub fn from_env(mut self) -> Self {
        self.respect_env = true;
        self
    }

    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    pub fn with_thread_ids(mut self) -> Self {
        self.with_thread_ids = true;
        self
    }

    pub fn with_thread_names(mut self) -> Self {
        self.with_thread_names = true;
        self
    }

    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    /// Filter directive built from the level and target
    pub fn directive(&self) -> String {
        match self.target {
            Some(target) => format!("{}={}", target, self.level),
            None => self.level.to_string(),
        }
    }

    /// Install the subscriber. Panics if one is already set; use
    /// [`try_init`](Self::try_init) when that can happen.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn init(self) {
        if let Err(err) = self.try_init() {
            panic!("failed to install the contexify log subscriber: {err}");
        }
    }

    /// Install the subscriber, failing if one is already set
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn try_init(self) -> Result<(), tracing_subscriber::util::TryInitError> {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        let filter = if self.respect_env {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()))
        } else {
            EnvFilter::new(self.directive())
        };

        let layer = fmt::layer()
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
            .with_thread_ids(self.with_thread_ids)
            .with_thread_names(self.with_thread_names)
            .with_target(true);
        let registry = tracing_subscriber::registry().with(filter);

        match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => registry.with(layer.json()).try_init(),
            // without logging-json the default format degrades to compact
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => registry.with(layer.compact()).try_init(),
            LogFormat::Pretty => registry.with(layer.pretty()).try_init(),
            LogFormat::Compact => registry.with(layer.compact()).try_init(),
        }
    }

    /// No subscriber features enabled; events go to whatever subscriber
    /// the application installs.
    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn init(self) {}
}

/// Start configuring logging
#[cfg(feature = "logging")]
pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// Install a subscriber with defaults: JSON with `logging-json`, otherwise
/// pretty with `logging-pretty`, otherwise nothing.
#[cfg(feature = "logging")]
pub fn init() {
    #[cfg(feature = "logging-json")]
    builder().json().debug().init();
    #[cfg(all(feature = "logging-pretty", not(feature = "logging-json")))]
    builder().pretty().debug().init();
}

/// JSON output at debug level
///
/// ```json
/// {"timestamp":"…","level":"DEBUG","fields":{"message":"Binding registered","key":"greeting","context":"app"},"target":"contexify"}
/// ```
#[cfg(feature = "logging")]
pub fn init_json() {
    builder().json().debug().init();
}

/// Pretty output at debug level
///
/// ```text
///   2026-01-01T00:00:00.000Z DEBUG contexify: Binding registered, key: greeting, context: app
/// ```
#[cfg(feature = "logging")]
pub fn init_pretty() {
    builder().pretty().debug().init();
}

/// Debug output restricted to contexify events
#[cfg(feature = "logging")]
pub fn init_contexify_only() {
    builder().contexify_only().debug().init();
}

#[cfg(all(test, feature = "logging"))]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = LoggingBuilder::default();
        assert_eq!(builder.level, Level::DEBUG);
        assert_eq!(builder.format, LogFormat::Json);
        assert!(builder.target.is_none());
        assert_eq!(builder.directive(), "DEBUG");
    }

    #[test]
    fn test_builder_chain() {
        let builder = LoggingBuilder::new()
            .trace()
            .pretty()
            .with_file()
            .with_line_number()
            .from_env()
            .contexify_only();

        assert_eq!(builder.level, Level::TRACE);
        assert_eq!(builder.format, LogFormat::Pretty);
        assert!(builder.with_file);
        assert!(builder.with_line_number);
        assert!(builder.respect_env);
        assert_eq!(builder.directive(), "contexify=TRACE");
    }
}
