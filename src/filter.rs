//! Binding filters and comparators
//!
//! Filters select bindings by key or tag; comparators order them, e.g. by a
//! phase tag with an explicit list of known phases.

use crate::binding::Binding;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

/// Predicate over bindings
pub type BindingFilter = Arc<dyn Fn(&Binding) -> bool + Send + Sync>;

/// Total order over bindings
pub type BindingComparator = Arc<dyn Fn(&Binding, &Binding) -> Ordering + Send + Sync>;

/// How a tag value is matched inside a [`TagFilter::Map`]
#[derive(Debug, Clone)]
pub enum TagValueMatch {
    /// Tag must be present with any value
    Any,
    /// Tag value must equal this value, or contain it when the tag value is an array
    Equals(Value),
}

/// Matches any value of a tag
pub const ANY_TAG_VALUE: TagValueMatch = TagValueMatch::Any;

macro_rules! tag_value_match_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for TagValueMatch {
                fn from(value: $ty) -> Self {
                    TagValueMatch::Equals(Value::from(value))
                }
            }
        )*
    };
}

tag_value_match_from!(&str, String, Value, bool, i32, i64, u32, u64, f64);

impl TagValueMatch {
    fn matches(&self, actual: &Value) -> bool {
        match self {
            TagValueMatch::Any => true,
            TagValueMatch::Equals(expected) => match actual {
                Value::Array(items) if !expected.is_array() => items.contains(expected),
                _ => actual == expected,
            },
        }
    }
}

/// Tag selector for [`filter_by_tag`].
#[derive(Debug, Clone)]
pub enum TagFilter {
    /// A tag name; `*` and `?` act as wildcards
    Name(String),
    /// Any tag name matching the expression
    Regex(Regex),
    /// Every entry must be present and match
    Map(Vec<(String, TagValueMatch)>),
}

impl TagFilter {
    /// Build a map filter from name/value pairs
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<TagValueMatch>,
    {
        TagFilter::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<&str> for TagFilter {
    fn from(name: &str) -> Self {
        TagFilter::Name(name.to_string())
    }
}

impl From<String> for TagFilter {
    fn from(name: String) -> Self {
        TagFilter::Name(name)
    }
}

impl From<Regex> for TagFilter {
    fn from(re: Regex) -> Self {
        TagFilter::Regex(re)
    }
}

/// Key selector for [`filter_by_key`]
#[derive(Clone)]
pub enum KeyFilter {
    /// A key; `*` and `?` act as wildcards
    Key(String),
    Regex(Regex),
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl From<&str> for KeyFilter {
    fn from(key: &str) -> Self {
        KeyFilter::Key(key.to_string())
    }
}

impl From<String> for KeyFilter {
    fn from(key: String) -> Self {
        KeyFilter::Key(key)
    }
}

impl From<Regex> for KeyFilter {
    fn from(re: Regex) -> Self {
        KeyFilter::Regex(re)
    }
}

#[inline]
fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// Whether `value` names a single binding rather than a key pattern
pub fn is_binding_address(value: &str) -> bool {
    !value.is_empty() && !has_wildcard(value)
}

/// Compile a wildcard pattern: `*` matches `[^.:]*`, `?` matches `[^.:]`.
pub fn wildcard_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str("[^.:]*"),
            '?' => source.push_str("[^.:]"),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source)
}

fn name_matcher(pattern: String) -> Arc<dyn Fn(&str) -> bool + Send + Sync> {
    if !has_wildcard(&pattern) {
        return Arc::new(move |name| name == pattern);
    }
    match wildcard_to_regex(&pattern) {
        Ok(re) => Arc::new(move |name| re.is_match(name)),
        Err(_err) => {
            #[cfg(feature = "logging")]
            debug!(
                target: "contexify",
                pattern = %pattern,
                error = %_err,
                "Wildcard pattern did not compile, matching literally"
            );
            Arc::new(move |name| name == pattern)
        }
    }
}

/// Select bindings by tag
pub fn filter_by_tag(filter: impl Into<TagFilter>) -> BindingFilter {
    match filter.into() {
        TagFilter::Name(name) => {
            let matches = name_matcher(name);
            Arc::new(move |binding| binding.tag_names().iter().any(|tag| matches(tag)))
        }
        TagFilter::Regex(re) => {
            Arc::new(move |binding| binding.tag_names().iter().any(|tag| re.is_match(tag)))
        }
        TagFilter::Map(entries) => Arc::new(move |binding| {
            let tags = binding.tag_map();
            entries.iter().all(|(name, expected)| {
                tags.get(name)
                    .is_some_and(|actual| expected.matches(actual))
            })
        }),
    }
}

/// Select bindings by key
pub fn filter_by_key(filter: impl Into<KeyFilter>) -> BindingFilter {
    match filter.into() {
        KeyFilter::Key(key) => {
            let matches = name_matcher(key);
            Arc::new(move |binding| matches(binding.key()))
        }
        KeyFilter::Regex(re) => Arc::new(move |binding| re.is_match(binding.key())),
        KeyFilter::Predicate(pred) => Arc::new(move |binding| pred(binding.key())),
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Order two optional values against a list of known values.
///
/// Known values sort by their position in `order` and before unknown ones;
/// unknown values sort by value with missing values first.
pub fn compare_by_order(a: Option<&Value>, b: Option<&Value>, order: &[Value]) -> Ordering {
    let pos = |v: Option<&Value>| v.and_then(|v| order.iter().position(|o| o == v));
    match (pos(a), pos(b)) {
        (Some(i), Some(j)) => i.cmp(&j),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => compare_values(x, y),
        },
    }
}

/// Compare bindings by the value of `tag`, using `order` for known values
pub fn compare_bindings_by_tag(tag: impl Into<String>, order: Vec<Value>) -> BindingComparator {
    let tag = tag.into();
    Arc::new(move |a, b| {
        compare_by_order(a.tag_value(&tag).as_ref(), b.tag_value(&tag).as_ref(), &order)
    })
}

/// Stable sort of bindings by a phase tag
pub fn sort_bindings_by_phase(
    bindings: &mut [Arc<Binding>],
    phase_tag: &str,
    ordered_phases: &[Value],
) {
    bindings.sort_by(|a, b| {
        compare_by_order(
            a.tag_value(phase_tag).as_ref(),
            b.tag_value(phase_tag).as_ref(),
            ordered_phases,
        )
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tagged(key: &str, tags: &[(&str, Value)]) -> Arc<Binding> {
        let binding = Binding::bind(key);
        for (name, value) in tags {
            binding.tag((*name, value.clone()));
        }
        binding
    }

    #[test]
    fn test_filter_by_tag_name() {
        let b = tagged("a", &[("controller", json!("controller"))]);
        assert!(filter_by_tag("controller")(&b));
        assert!(!filter_by_tag("service")(&b));
    }

    #[test]
    fn test_filter_by_tag_wildcard() {
        let b = tagged("a", &[("extension:rest", json!(true))]);
        assert!(!filter_by_tag("ext*")(&b));
        assert!(filter_by_tag("extension:*")(&b));
        assert!(filter_by_tag("extension:res?")(&b));
    }

    #[test]
    fn test_filter_by_tag_map() {
        let b = tagged(
            "a",
            &[("name", json!("rest")), ("extensionFor", json!(["x", "y"]))],
        );
        assert!(filter_by_tag(TagFilter::map([("name", "rest")]))(&b));
        assert!(!filter_by_tag(TagFilter::map([("name", "grpc")]))(&b));
        assert!(filter_by_tag(TagFilter::map([("extensionFor", "y")]))(&b));
        assert!(filter_by_tag(TagFilter::Map(vec![("name".into(), ANY_TAG_VALUE)]))(&b));
        assert!(!filter_by_tag(TagFilter::Map(vec![("missing".into(), ANY_TAG_VALUE)]))(&b));
    }

    #[test]
    fn test_filter_by_key_patterns() {
        let b = Binding::bind("controllers.user");
        assert!(filter_by_key("controllers.user")(&b));
        assert!(filter_by_key("controllers.*")(&b));
        assert!(!filter_by_key("*")(&b));
        assert!(filter_by_key(Regex::new("^controllers\\.").unwrap())(&b));
        assert!(filter_by_key(KeyFilter::Predicate(Arc::new(|k| k.ends_with("user"))))(&b));
    }

    #[test]
    fn test_compare_by_order() {
        let order = vec![json!("init"), json!("run")];
        let init = json!("init");
        let run = json!("run");
        let other = json!("aaa");

        assert_eq!(compare_by_order(Some(&init), Some(&run), &order), Ordering::Less);
        assert_eq!(compare_by_order(Some(&other), Some(&run), &order), Ordering::Greater);
        assert_eq!(compare_by_order(None, Some(&other), &order), Ordering::Less);
        assert_eq!(
            compare_by_order(Some(&json!(10)), Some(&json!(9)), &order),
            Ordering::Greater
        );
    }

    #[test]
    fn test_sort_by_phase_is_stable() {
        let mut bindings = vec![
            tagged("x1", &[("phase", json!("final"))]),
            tagged("x2", &[("phase", json!("log"))]),
            tagged("x3", &[]),
            tagged("x4", &[("phase", json!("log"))]),
        ];
        sort_bindings_by_phase(&mut bindings, "phase", &[json!("log"), json!("final")]);
        let keys: Vec<_> = bindings.iter().map(|b| b.key().to_string()).collect();
        assert_eq!(keys, vec!["x2", "x4", "x1", "x3"]);
    }

    #[test]
    fn test_is_binding_address() {
        assert!(is_binding_address("foo.bar"));
        assert!(!is_binding_address("foo.*"));
        assert!(!is_binding_address(""));
    }
}
