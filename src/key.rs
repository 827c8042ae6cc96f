//! Binding keys and addresses
//!
//! A binding address is a string key, optionally followed by `#` and a
//! deep-property path into the resolved value (`config#db.host`).

use crate::{ContextError, Result};
use std::fmt;

/// A parsed binding key with an optional property path.
///
/// # Examples
///
/// ```rust
/// use contexify::BindingKey;
///
/// let key = BindingKey::create("application.config", Some("rest.port")).unwrap();
/// assert_eq!(key.to_string(), "application.config#rest.port");
///
/// let parsed = BindingKey::parse("application.config#rest.port");
/// assert_eq!(parsed.key(), "application.config");
/// assert_eq!(parsed.property_path(), Some("rest.port"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingKey {
    key: String,
    property_path: Option<String>,
}

impl BindingKey {
    /// Separator between the key and the property path
    pub const PROPERTY_SEPARATOR: &'static str = "#";

    /// Namespace reserved for configuration bindings
    pub const CONFIG_NAMESPACE: &'static str = "$config";

    /// Create a key, optionally with an explicit property path.
    ///
    /// Fails when the key already encodes a path and a path is also supplied.
    pub fn create(key: impl Into<String>, property_path: Option<&str>) -> Result<Self> {
        let key = key.into();
        match property_path {
            Some(path) => {
                if key.contains(Self::PROPERTY_SEPARATOR) {
                    return Err(ContextError::invalid_key(
                        key,
                        "binding key must not include a property path when one is supplied separately",
                    ));
                }
                Ok(Self {
                    key,
                    property_path: Some(path.to_string()),
                })
            }
            None => Ok(Self::parse(&key)),
        }
    }

    /// Split a raw address into key and optional property path.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(Self::PROPERTY_SEPARATOR) {
            Some((key, path)) => Self {
                key: key.to_string(),
                property_path: if path.is_empty() {
                    None
                } else {
                    Some(path.to_string())
                },
            },
            None => Self {
                key: raw.to_string(),
                property_path: None,
            },
        }
    }

    /// Reject empty keys.
    pub fn validate(key: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(ContextError::invalid_key(key, "binding key must not be empty"));
        }
        Ok(())
    }

    /// Generate a unique key, optionally prefixed with a namespace.
    pub fn generate(namespace: Option<&str>) -> Self {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let key = match namespace {
            Some(ns) if !ns.is_empty() => format!("{ns}.{token}"),
            _ => token,
        };
        Self {
            key,
            property_path: None,
        }
    }

    /// Key of the configuration binding for `key`.
    pub fn build_key_for_config(key: &str) -> Self {
        let key = if key.is_empty() {
            Self::CONFIG_NAMESPACE.to_string()
        } else {
            format!("{}:{}", Self::CONFIG_NAMESPACE, key)
        };
        Self {
            key,
            property_path: None,
        }
    }

    /// Address of a deep property of the value bound to this key.
    pub fn deep_property(&self, path: &str) -> Self {
        let property_path = match &self.property_path {
            Some(existing) => format!("{existing}.{path}"),
            None => path.to_string(),
        };
        Self {
            key: self.key.clone(),
            property_path: Some(property_path),
        }
    }

    /// The bare key
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The property path, if any
    #[inline]
    pub fn property_path(&self) -> Option<&str> {
        self.property_path.as_deref()
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property_path {
            Some(path) => write!(f, "{}{}{}", self.key, Self::PROPERTY_SEPARATOR, path),
            None => f.write_str(&self.key),
        }
    }
}

impl From<&str> for BindingKey {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for BindingKey {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<&String> for BindingKey {
    fn from(raw: &String) -> Self {
        Self::parse(raw)
    }
}

impl From<&BindingKey> for BindingKey {
    fn from(key: &BindingKey) -> Self {
        key.clone()
    }
}
