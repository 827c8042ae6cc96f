#![no_main]

//! Fuzz target for registry operations on a single context
//!
//! Keeps a model of what is bound and checks the context agrees with it.

use arbitrary::Arbitrary;
use contexify::{BindingScope, Context};
use libfuzzer_sys::fuzz_target;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Scope {
    Transient,
    Context,
    Singleton,
}

impl From<Scope> for BindingScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Transient => BindingScope::Transient,
            Scope::Context => BindingScope::Context,
            Scope::Singleton => BindingScope::Singleton,
        }
    }
}

#[derive(Debug, Arbitrary)]
enum ContextOp {
    BindConstant { key: u8, value: u32 },
    BindDynamic { key: u8, scope: Scope },
    BindAlias { key: u8, target: u8 },
    Tag { key: u8, tag: u8 },
    Lock(u8),
    Unlock(u8),
    Unbind(u8),
    Get(u8),
    FindByTag(u8),
    FindAll,
}

fn key(k: u8) -> String {
    format!("k{}", k % 16)
}

fuzz_target!(|ops: Vec<ContextOp>| {
    let ctx = Context::new("fuzz");
    // key -> locked
    let mut model: HashMap<String, bool> = HashMap::new();

    for op in ops {
        match op {
            ContextOp::BindConstant { key: k, value } => {
                let k = key(k);
                match ctx.bind(k.clone()) {
                    Ok(binding) => {
                        assert!(!model.get(&k).copied().unwrap_or(false));
                        binding.to(value).unwrap();
                        model.insert(k, false);
                    }
                    Err(err) => {
                        assert!(err.is_locked());
                        assert!(model[&k]);
                    }
                }
            }
            ContextOp::BindDynamic { key: k, scope } => {
                let k = key(k);
                if let Ok(binding) = ctx.bind(k.clone()) {
                    binding.to_dynamic_value(|| 7u32).unwrap().in_scope(scope.into());
                    model.insert(k, false);
                }
            }
            ContextOp::BindAlias { key: k, target } => {
                let k = key(k);
                if let Ok(binding) = ctx.bind(k.clone()) {
                    binding.to_alias(key(target)).unwrap();
                    model.insert(k, false);
                }
            }
            ContextOp::Tag { key: k, tag } => {
                if let Some(binding) = ctx.get_binding_optional(&key(k)) {
                    binding.tag(format!("t{}", tag % 4));
                }
            }
            ContextOp::Lock(k) => {
                let k = key(k);
                if let Some(binding) = ctx.get_binding_optional(&k) {
                    binding.lock();
                    model.insert(k, true);
                }
            }
            ContextOp::Unlock(k) => {
                let k = key(k);
                if let Some(binding) = ctx.get_binding_optional(&k) {
                    binding.unlock();
                    model.insert(k, false);
                }
            }
            ContextOp::Unbind(k) => {
                let k = key(k);
                let removed = ctx.unbind(&k).unwrap();
                match model.get(&k).copied() {
                    Some(false) => {
                        assert!(removed);
                        model.remove(&k);
                    }
                    _ => assert!(!removed),
                }
            }
            ContextOp::Get(k) => {
                // aliases may form cycles or dangle; both must fail cleanly
                let _ = ctx.get_sync::<u32>(key(k));
            }
            ContextOp::FindByTag(tag) => {
                let found = ctx.find_by_tag(format!("t{}", tag % 4).as_str());
                assert!(found.len() <= model.len());
            }
            ContextOp::FindAll => {
                assert_eq!(ctx.find_all().len(), model.len());
            }
        }
        for k in model.keys() {
            assert!(ctx.contains(k));
        }
    }
});
