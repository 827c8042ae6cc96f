//! Resolution session: the stack of bindings and injections being resolved
//!
//! Each nested resolution forks the session of its caller, so concurrent
//! branches never observe each other's frames. A binding key that reappears
//! on its own stack is a circular dependency.

use crate::binding::Binding;
use crate::injection::Injection;
use crate::{ContextError, Result};
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{trace, warn};

/// One frame of a resolution session
#[derive(Clone)]
pub enum ResolutionElement {
    Binding(Arc<Binding>),
    Injection(Injection),
}

impl ResolutionElement {
    fn describe(&self) -> String {
        match self {
            ResolutionElement::Binding(binding) => binding.key().to_string(),
            ResolutionElement::Injection(injection) => {
                format!("@{}", ResolutionSession::describe_injection(injection))
            }
        }
    }
}

/// Tracks the chain of bindings and injections for one resolution.
#[derive(Clone, Default)]
pub struct ResolutionSession {
    stack: Vec<ResolutionElement>,
}

impl ResolutionSession {
    /// Start an empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue `session` (copying its frames) or start a fresh one
    pub fn fork(session: Option<&Self>) -> Self {
        session.cloned().unwrap_or_default()
    }

    /// Push a binding, failing if its key is already being resolved.
    pub fn push_binding(&mut self, binding: &Arc<Binding>) -> Result<()> {
        let key = binding.key();
        if self.binding_stack().iter().any(|b| b.key() == key) {
            let mut path: Vec<String> = self
                .binding_stack()
                .iter()
                .map(|b| b.key().to_string())
                .collect();
            path.push(key.to_string());

            #[cfg(feature = "logging")]
            warn!(
                target: "contexify",
                key = key,
                path = %path.join(" --> "),
                "Circular dependency detected"
            );

            return Err(ContextError::circular(path));
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "contexify",
            key = key,
            depth = self.stack.len(),
            "Enter binding"
        );

        self.stack.push(ResolutionElement::Binding(Arc::clone(binding)));
        Ok(())
    }

    /// Pop the top frame, which must be a binding
    pub fn pop_binding(&mut self) -> Result<Arc<Binding>> {
        match self.stack.pop() {
            Some(ResolutionElement::Binding(binding)) => Ok(binding),
            Some(other) => {
                let described = other.describe();
                self.stack.push(other);
                Err(ContextError::Internal(format!(
                    "the top element must be a binding, found {described}"
                )))
            }
            None => Err(ContextError::Internal("the resolution stack is empty".into())),
        }
    }

    /// Push an injection frame
    pub fn push_injection(&mut self, injection: Injection) {
        #[cfg(feature = "logging")]
        trace!(
            target: "contexify",
            injection = %Self::describe_injection(&injection),
            depth = self.stack.len(),
            "Enter injection"
        );

        self.stack.push(ResolutionElement::Injection(injection));
    }

    /// Pop the top frame, which must be an injection
    pub fn pop_injection(&mut self) -> Result<Injection> {
        match self.stack.pop() {
            Some(ResolutionElement::Injection(injection)) => Ok(injection),
            Some(other) => {
                let described = other.describe();
                self.stack.push(other);
                Err(ContextError::Internal(format!(
                    "the top element must be an injection, found {described}"
                )))
            }
            None => Err(ContextError::Internal("the resolution stack is empty".into())),
        }
    }

    /// Innermost binding being resolved
    pub fn current_binding(&self) -> Option<&Arc<Binding>> {
        self.stack.iter().rev().find_map(|e| match e {
            ResolutionElement::Binding(b) => Some(b),
            ResolutionElement::Injection(_) => None,
        })
    }

    /// Innermost injection being resolved
    pub fn current_injection(&self) -> Option<&Injection> {
        self.stack.iter().rev().find_map(|e| match e {
            ResolutionElement::Injection(i) => Some(i),
            ResolutionElement::Binding(_) => None,
        })
    }

    /// Bindings on the stack, outermost first
    pub fn binding_stack(&self) -> Vec<&Arc<Binding>> {
        self.stack
            .iter()
            .filter_map(|e| match e {
                ResolutionElement::Binding(b) => Some(b),
                ResolutionElement::Injection(_) => None,
            })
            .collect()
    }

    /// Injections on the stack, outermost first
    pub fn injection_stack(&self) -> Vec<&Injection> {
        self.stack
            .iter()
            .filter_map(|e| match e {
                ResolutionElement::Injection(i) => Some(i),
                ResolutionElement::Binding(_) => None,
            })
            .collect()
    }

    /// All frames, outermost first
    pub fn stack(&self) -> &[ResolutionElement] {
        &self.stack
    }

    /// `a --> b --> c`
    pub fn binding_path(&self) -> String {
        self.binding_stack()
            .iter()
            .map(|b| b.key())
            .collect::<Vec<_>>()
            .join(" --> ")
    }

    /// `Greeter.constructor[0] --> Service.prototype.dep`
    pub fn injection_path(&self) -> String {
        self.injection_stack()
            .iter()
            .map(|i| Self::describe_injection(i))
            .collect::<Vec<_>>()
            .join(" --> ")
    }

    /// `a --> @Greeter.constructor[0] --> b`
    pub fn resolution_path(&self) -> String {
        self.stack
            .iter()
            .map(ResolutionElement::describe)
            .collect::<Vec<_>>()
            .join(" --> ")
    }

    /// Name an injection point: `Greeter.constructor[0]`,
    /// `Greeter.prototype.greet[1]` or `Greeter.prototype.prop`.
    pub fn describe_injection(injection: &Injection) -> String {
        injection.target().describe()
    }

    /// Run `action` with `binding` pushed onto a fork of `session`
    pub fn run_with_binding<T, F>(
        binding: &Arc<Binding>,
        session: Option<&Self>,
        action: F,
    ) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        let mut forked = Self::fork(session);
        forked.push_binding(binding)?;
        action(&forked)
    }

    /// Run `action` with `injection` pushed onto a fork of `session`
    pub fn run_with_injection<T, F>(injection: Injection, session: Option<&Self>, action: F) -> T
    where
        F: FnOnce(&Self) -> T,
    {
        let mut forked = Self::fork(session);
        forked.push_injection(injection);
        action(&forked)
    }
}

impl fmt::Debug for ResolutionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionSession")
            .field("path", &self.resolution_path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injection::InjectionTarget;

    #[test]
    fn test_push_detects_cycle() {
        let a = Binding::bind("a");
        let b = Binding::bind("b");
        let mut session = ResolutionSession::new();
        session.push_binding(&a).unwrap();
        session.push_binding(&b).unwrap();

        let err = session.push_binding(&Binding::bind("a")).unwrap_err();
        assert_eq!(err.to_string(), "Circular dependency detected: a --> b --> a");
    }

    #[test]
    fn test_fork_is_independent() {
        let mut session = ResolutionSession::new();
        session.push_binding(&Binding::bind("a")).unwrap();

        let mut forked = ResolutionSession::fork(Some(&session));
        forked.push_binding(&Binding::bind("b")).unwrap();

        assert_eq!(session.binding_path(), "a");
        assert_eq!(forked.binding_path(), "a --> b");
    }

    #[test]
    fn test_resolution_path_mixes_frames() {
        let mut session = ResolutionSession::new();
        session.push_binding(&Binding::bind("a")).unwrap();
        session.push_injection(Injection::key("b").at(InjectionTarget::constructor("Greeter", 0)));
        session.push_binding(&Binding::bind("b")).unwrap();

        assert_eq!(session.resolution_path(), "a --> @Greeter.constructor[0] --> b");
        assert_eq!(session.injection_path(), "Greeter.constructor[0]");
        assert_eq!(session.current_binding().unwrap().key(), "b");
    }

    #[test]
    fn test_pop_checks_frame_kind() {
        let mut session = ResolutionSession::new();
        session.push_binding(&Binding::bind("a")).unwrap();
        assert!(session.pop_injection().is_err());
        assert_eq!(session.pop_binding().unwrap().key(), "a");
        assert!(session.pop_binding().is_err());
    }

    #[test]
    fn test_describe_injection_targets() {
        let method = Injection::key("x").at(InjectionTarget::method("Greeter", "greet", 1));
        let property = Injection::key("x").at(InjectionTarget::property("Greeter", "prop"));
        assert_eq!(
            ResolutionSession::describe_injection(&method),
            "Greeter.prototype.greet[1]"
        );
        assert_eq!(
            ResolutionSession::describe_injection(&property),
            "Greeter.prototype.prop"
        );
    }
}
