#![no_main]

//! Fuzz target for concurrent resolution
//!
//! Singleton bindings must be instantiated at most once no matter how
//! many threads race on the first resolution.

use arbitrary::Arbitrary;
use contexify::{BindingScope, Context};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

#[derive(Debug, Arbitrary)]
struct Workload {
    threads: u8,
    keys: u8,
    reads_per_thread: u8,
    child_contexts: bool,
}

fuzz_target!(|work: Workload| {
    let threads = (work.threads % 8 + 1) as usize;
    let keys = (work.keys % 8 + 1) as usize;
    let reads = (work.reads_per_thread % 16 + 1) as usize;

    let root = Context::new("root");
    let counters: Vec<Arc<AtomicU32>> = (0..keys).map(|_| Arc::new(AtomicU32::new(0))).collect();
    for (i, counter) in counters.iter().enumerate() {
        let counter = Arc::clone(counter);
        root.bind(format!("s{i}"))
            .unwrap()
            .to_dynamic_value(move || counter.fetch_add(1, Ordering::SeqCst))
            .unwrap()
            .in_scope(BindingScope::Singleton);
    }

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let ctx = if work.child_contexts {
                Context::child(&root, format!("worker-{t}"))
            } else {
                root.clone()
            };
            thread::spawn(move || {
                for r in 0..reads {
                    let key = format!("s{}", (t + r) % keys);
                    let value = ctx.get_sync::<u32>(key).unwrap();
                    assert_eq!(*value, 0);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    for counter in &counters {
        assert!(counter.load(Ordering::SeqCst) <= 1);
    }
});
