#![no_main]

//! Fuzz target for binding key parsing and pattern matching
//!
//! Checks the key/path round trip and that wildcard patterns never panic.

use arbitrary::Arbitrary;
use contexify::{BindingKey, Context, filter_by_key, filter_by_tag, wildcard_to_regex};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct KeyInput {
    key: String,
    path: Option<String>,
    pattern: String,
    tag: String,
}

fuzz_target!(|input: KeyInput| {
    // create + Display + parse reproduces key and non-empty path
    if let Ok(key) = BindingKey::create(input.key.clone(), input.path.as_deref()) {
        let parsed = BindingKey::parse(&key.to_string());
        if let Some(path) = input.path.as_deref().filter(|p| !p.is_empty()) {
            assert_eq!(parsed.key(), input.key);
            assert_eq!(parsed.property_path(), Some(path));
        }
    } else {
        assert!(input.key.contains('#') && input.path.is_some());
    }

    // parse never loses the key part
    let parsed = BindingKey::parse(&input.key);
    assert!(input.key.starts_with(parsed.key()));

    let _ = wildcard_to_regex(&input.pattern);

    let ctx = Context::new("fuzz");
    if let Ok(binding) = ctx.bind(input.key.clone()) {
        let _ = binding.to(1u8);
        binding.tag(input.tag.as_str());
        let _ = ctx.find(input.pattern.as_str());
        let _ = ctx.find_by_tag(input.pattern.as_str());
        let _ = filter_by_key(input.pattern.as_str())(&binding);
        assert!(filter_by_tag(input.tag.as_str())(&binding) || input.tag.contains(['*', '?']));
        assert!(ctx.contains(&input.key));
    }
});
