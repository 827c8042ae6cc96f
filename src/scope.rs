//! Binding scopes and context identity
//!
//! A scope decides how long a resolved value is cached and which context it
//! is cached against.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache lifetime of a binding's resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum BindingScope {
    /// New value on every resolution
    #[default]
    Transient,

    /// One value per resolving context in the chain
    Context,

    /// One value for the life of the context owning the binding
    Singleton,

    /// One value per application context (nearest ancestor whose own scope
    /// is `Application`), falling back to the owner context
    Application,
}

impl BindingScope {
    /// Whether values in this scope are cached at all
    #[inline]
    pub fn is_cached(&self) -> bool {
        !matches!(self, BindingScope::Transient)
    }

    /// Lower-case name used in logs and inspection output
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingScope::Transient => "transient",
            BindingScope::Context => "context",
            BindingScope::Singleton => "singleton",
            BindingScope::Application => "application",
        }
    }
}

impl std::fmt::Display for BindingScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique context identifier.
///
/// Scoped caches are keyed by the id of the context they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Generate a new unique context id.
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "context-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_ids_unique() {
        let a = ContextId::new();
        let b = ContextId::new();
        let c = ContextId::new();

        assert_ne!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn test_context_id_display() {
        let id = ContextId::new();
        assert!(id.to_string().starts_with("context-"));
    }

    #[test]
    fn test_default_scope_is_transient() {
        assert_eq!(BindingScope::default(), BindingScope::Transient);
        assert!(!BindingScope::Transient.is_cached());
        assert!(BindingScope::Singleton.is_cached());
    }
}
