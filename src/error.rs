//! Error types for context resolution

use thiserror::Error;

/// Errors that can occur while binding or resolving values in a context
#[derive(Error, Debug, Clone)]
pub enum ContextError {
    /// No binding exists for the key anywhere in the context chain
    #[error("The key '{key}' is not bound to any value in context {context}")]
    NotBound { key: String, context: String },

    /// A binding key reappeared in its own resolution stack
    #[error("Circular dependency detected: {path}")]
    CircularDependency { path: String },

    /// Rebinding a key whose existing binding is locked
    #[error("Cannot rebind key \"{key}\" to a locked binding")]
    LockedBinding { key: String },

    /// A synchronous accessor hit a pending asynchronous value
    #[error(
        "Cannot get {key} synchronously: the value is a pending asynchronous computation, use the asynchronous accessor instead"
    )]
    SyncResolution { key: String },

    /// A method or constructor parameter has no injection and no supplied value
    #[error(
        "The argument '{target}[{index}]' is not decorated for dependency injection but no value was supplied"
    )]
    MissingInjection { target: String, index: usize },

    /// Malformed binding key
    #[error("Invalid binding key '{key}': {reason}")]
    InvalidBindingKey { key: String, reason: String },

    /// A class registered as a provider has no `value()` method
    #[error("The class {class} does not implement the Provider contract (missing value())")]
    NotAProvider { class: String },

    /// Operation attempted on a closed context
    #[error("Context {context} is closed")]
    ContextClosed { context: String },

    /// The resolved value is not of the requested type
    #[error("The value bound to '{key}' is not of type {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    /// The binding has no value source configured
    #[error("Binding '{key}' is not configured with a value")]
    BindingNotConfigured { key: String },

    /// A single value was requested but several bindings matched
    #[error("Multiple bindings found: {keys}")]
    MultipleBindings { keys: String },

    /// A factory, provider, resolver or interceptor failed
    #[error("Failed to resolve {key}: {reason}")]
    Resolution { key: String, reason: String },

    /// Internal error
    #[error("Internal context error: {0}")]
    Internal(String),
}

impl ContextError {
    /// Create a NotBound error for a key
    #[inline]
    pub fn not_bound(key: impl Into<String>, context: impl Into<String>) -> Self {
        Self::NotBound {
            key: key.into(),
            context: context.into(),
        }
    }

    /// Create a CircularDependency error from the keys on the stack
    pub fn circular<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let path = keys
            .into_iter()
            .map(|k| k.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(" --> ");
        Self::CircularDependency { path }
    }

    /// Create a LockedBinding error
    #[inline]
    pub fn locked(key: impl Into<String>) -> Self {
        Self::LockedBinding { key: key.into() }
    }

    /// Create a SyncResolution error
    #[inline]
    pub fn sync_resolution(key: impl Into<String>) -> Self {
        Self::SyncResolution { key: key.into() }
    }

    /// Create a TypeMismatch error for type T
    #[inline]
    pub fn type_mismatch<T: ?Sized + 'static>(key: impl Into<String>) -> Self {
        Self::TypeMismatch {
            key: key.into(),
            expected: std::any::type_name::<T>(),
        }
    }

    /// Create a Resolution error
    #[inline]
    pub fn resolution(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Resolution {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an InvalidBindingKey error
    #[inline]
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidBindingKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a ContextClosed error
    #[inline]
    pub fn closed(context: impl Into<String>) -> Self {
        Self::ContextClosed {
            context: context.into(),
        }
    }

    /// Whether this error reports a missing binding
    #[inline]
    pub fn is_not_bound(&self) -> bool {
        matches!(self, Self::NotBound { .. })
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::LockedBinding { .. })
    }
}

/// Result type alias for context operations
pub type Result<T> = std::result::Result<T, ContextError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locked_message_names_key() {
        let err = ContextError::locked("foo");
        assert_eq!(err.to_string(), "Cannot rebind key \"foo\" to a locked binding");
    }

    #[test]
    fn test_circular_path() {
        let err = ContextError::circular(["a", "b", "a"]);
        assert_eq!(err.to_string(), "Circular dependency detected: a --> b --> a");
    }

    #[test]
    fn test_clone_preserves_variant() {
        let err = ContextError::not_bound("foo", "app");
        assert!(err.clone().is_not_bound());
    }
}
