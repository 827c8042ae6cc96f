#![no_main]

//! Fuzz target for context chains
//!
//! Binds and unbinds across a root and nested children and checks that the
//! nearest binding always wins.

use arbitrary::Arbitrary;
use contexify::Context;
use libfuzzer_sys::fuzz_target;
use std::collections::HashMap;

const DEPTH: usize = 4;

#[derive(Debug, Arbitrary)]
enum HierarchyOp {
    Bind { level: u8, key: u8, value: u32 },
    Unbind { level: u8, key: u8 },
    Get { level: u8, key: u8 },
    CloseLeaf,
}

fuzz_target!(|ops: Vec<HierarchyOp>| {
    let mut chain = vec![Context::new("level-0")];
    for i in 1..DEPTH {
        let child = Context::child(&chain[i - 1], format!("level-{i}"));
        chain.push(child);
    }
    // (level, key) -> value
    let mut model: HashMap<(usize, u8), u32> = HashMap::new();

    for op in ops {
        match op {
            HierarchyOp::Bind { level, key, value } => {
                let level = level as usize % chain.len();
                let key = key % 8;
                chain[level]
                    .bind(format!("k{key}"))
                    .unwrap()
                    .to(value)
                    .unwrap();
                model.insert((level, key), value);
            }
            HierarchyOp::Unbind { level, key } => {
                let level = level as usize % chain.len();
                let key = key % 8;
                let removed = chain[level].unbind(&format!("k{key}")).unwrap();
                assert_eq!(removed, model.remove(&(level, key)).is_some());
            }
            HierarchyOp::Get { level, key } => {
                let level = level as usize % chain.len();
                let key = key % 8;
                let expected = (0..=level).rev().find_map(|l| model.get(&(l, key)).copied());
                let actual = chain[level].get_sync::<u32>(format!("k{key}")).ok().map(|v| *v);
                assert_eq!(actual, expected);
            }
            HierarchyOp::CloseLeaf => {
                if chain.len() > 1 {
                    let leaf = chain.len() - 1;
                    if let Some(ctx) = chain.pop() {
                        ctx.close();
                        assert!(ctx.is_closed());
                    }
                    model.retain(|(level, _), _| *level != leaf);
                }
            }
        }
    }
});
