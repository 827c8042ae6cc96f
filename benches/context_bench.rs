//! Benchmarks for context registration, resolution and lookup

use contexify::{
    BindingScope, ClassMetadata, Context, Injectable, InvocationOptions, Param, ValueOrPromise,
    boxed, filter_by_tag, invoke_method,
};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;

#[allow(dead_code)]
struct SmallService {
    value: i32,
}

#[allow(dead_code)]
struct MediumService {
    name: String,
    values: Vec<i32>,
}

struct Repository {
    url: Arc<String>,
}

impl Injectable for Repository {
    fn metadata() -> ClassMetadata<Self> {
        ClassMetadata::new("Repository").constructor(vec![Param::inject("db.url")], |args| {
            Ok(Repository {
                url: args.get::<String>(0)?,
            })
        })
    }
}

struct Controller {
    repo: Arc<Repository>,
}

impl Injectable for Controller {
    fn metadata() -> ClassMetadata<Self> {
        ClassMetadata::new("Controller")
            .constructor(vec![Param::inject("repositories.main")], |args| {
                Ok(Controller {
                    repo: args.get::<Repository>(0)?,
                })
            })
            .method("find", vec![Param::Plain], |c: &Controller, args| {
                let id = args.get::<u32>(0)?;
                Ok(ValueOrPromise::Value(boxed(format!("{}/{id}", c.repo.url))))
            })
    }
}

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");

    group.bench_function("constant_small", |b| {
        b.iter(|| {
            let ctx = Context::new("bench");
            ctx.bind("small").unwrap().to(SmallService { value: 42 }).unwrap();
            black_box(ctx)
        })
    });

    group.bench_function("constant_medium", |b| {
        b.iter(|| {
            let ctx = Context::new("bench");
            ctx.bind("medium")
                .unwrap()
                .to(MediumService {
                    name: "test".to_string(),
                    values: vec![1, 2, 3, 4, 5],
                })
                .unwrap();
            black_box(ctx)
        })
    });

    group.bench_function("dynamic_singleton", |b| {
        b.iter(|| {
            let ctx = Context::new("bench");
            ctx.bind("small")
                .unwrap()
                .to_dynamic_value(|| SmallService { value: 42 })
                .unwrap()
                .in_scope(BindingScope::Singleton);
            black_box(ctx)
        })
    });

    group.bench_function("tagged_4_bindings", |b| {
        b.iter(|| {
            let ctx = Context::new("bench");
            for key in ["a", "b", "c", "d"] {
                ctx.bind(key).unwrap().to(SmallService { value: 1 }).unwrap().tag("service");
            }
            black_box(ctx)
        })
    });

    group.finish();
}

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");
    group.throughput(Throughput::Elements(1));

    let ctx = Context::new("bench");
    ctx.bind("small").unwrap().to(SmallService { value: 42 }).unwrap();
    ctx.bind("singleton")
        .unwrap()
        .to_dynamic_value(|| SmallService { value: 42 })
        .unwrap()
        .in_scope(BindingScope::Singleton);
    ctx.bind("db.url").unwrap().to("postgres://localhost".to_string()).unwrap();
    ctx.bind("repositories.main")
        .unwrap()
        .to_class::<Repository>()
        .unwrap()
        .in_scope(BindingScope::Singleton);
    ctx.bind("controllers.main").unwrap().to_class::<Controller>().unwrap();
    ctx.bind("alias").unwrap().to_alias("small").unwrap();

    group.bench_function("get_constant", |b| {
        b.iter(|| black_box(ctx.get_sync::<SmallService>("small").unwrap()))
    });

    group.bench_function("get_cached_singleton", |b| {
        b.iter(|| black_box(ctx.get_sync::<SmallService>("singleton").unwrap()))
    });

    group.bench_function("get_alias", |b| {
        b.iter(|| black_box(ctx.get_sync::<SmallService>("alias").unwrap()))
    });

    group.bench_function("get_transient_class_graph", |b| {
        b.iter(|| black_box(ctx.get_sync::<Controller>("controllers.main").unwrap()))
    });

    group.bench_function("is_bound", |b| b.iter(|| black_box(ctx.is_bound("small"))));

    group.bench_function("get_not_bound", |b| {
        b.iter(|| black_box(ctx.get_sync::<SmallService>("missing").is_err()))
    });

    group.finish();
}

fn bench_hierarchy(c: &mut Criterion) {
    let mut group = c.benchmark_group("hierarchy");

    group.bench_function("create_child", |b| {
        let root = Context::new("root");
        root.bind("small").unwrap().to(SmallService { value: 42 }).unwrap();

        b.iter(|| black_box(Context::child(&root, "request")))
    });

    group.bench_function("resolve_from_parent", |b| {
        let root = Context::new("root");
        root.bind("small").unwrap().to(SmallService { value: 42 }).unwrap();
        let child = Context::child(&root, "request");

        b.iter(|| black_box(child.get_sync::<SmallService>("small").unwrap()))
    });

    group.bench_function("resolve_override", |b| {
        let root = Context::new("root");
        root.bind("small").unwrap().to(SmallService { value: 42 }).unwrap();
        let child = Context::child(&root, "request");
        child.bind("small").unwrap().to(SmallService { value: 100 }).unwrap();

        b.iter(|| black_box(child.get_sync::<SmallService>("small").unwrap()))
    });

    group.bench_function("request_context_lifecycle", |b| {
        let root = Context::new("root");
        root.bind("small").unwrap().to(SmallService { value: 42 }).unwrap();

        b.iter(|| {
            let request = Context::child(&root, "request");
            request
                .bind("request.id")
                .unwrap()
                .to(7u64)
                .unwrap();
            let _ = request.get_sync::<SmallService>("small").unwrap();
            request.close();
            black_box(request)
        })
    });

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");

    let root = Context::new("root");
    for i in 0..50 {
        let binding = root.bind(format!("services.s{i}")).unwrap();
        binding.to(SmallService { value: i }).unwrap();
        if i % 5 == 0 {
            binding.tag("hot");
        }
    }
    let child = Context::child(&root, "child");

    group.bench_function("find_by_tag_50", |b| {
        b.iter(|| black_box(child.find_by_tag("hot")))
    });

    group.bench_function("find_by_pattern_50", |b| {
        b.iter(|| black_box(child.find("services.s1*")))
    });

    let view = child.create_view(filter_by_tag("hot"), None);
    group.bench_function("view_bindings_cached", |b| {
        b.iter(|| black_box(view.bindings()))
    });

    group.finish();
}

fn bench_invocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("invocation");

    let ctx = Context::new("bench");
    ctx.bind("db.url").unwrap().to("postgres://localhost".to_string()).unwrap();
    ctx.bind("repositories.main").unwrap().to_class::<Repository>().unwrap();
    ctx.bind("controllers.main").unwrap().to_class::<Controller>().unwrap();
    let controller = ctx.get_sync::<Controller>("controllers.main").unwrap();

    group.bench_function("invoke_direct", |b| {
        let options = InvocationOptions {
            skip_interceptors: true,
            ..Default::default()
        };
        b.iter(|| {
            black_box(
                invoke_method(&ctx, &controller, "find", vec![boxed(1u32)], &options)
                    .unwrap()
                    .into_sync("find")
                    .unwrap(),
            )
        })
    });

    group.bench_function("invoke_with_chain", |b| {
        let options = InvocationOptions::default();
        b.iter(|| {
            black_box(
                invoke_method(&ctx, &controller, "find", vec![boxed(1u32)], &options)
                    .unwrap()
                    .into_sync("find")
                    .unwrap(),
            )
        })
    });

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");

    group.bench_function("concurrent_reads_4", |b| {
        let ctx = Context::new("bench");
        ctx.bind("singleton")
            .unwrap()
            .to_dynamic_value(|| SmallService { value: 42 })
            .unwrap()
            .in_scope(BindingScope::Singleton);

        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let ctx = ctx.clone();
                    thread::spawn(move || {
                        for _ in 0..100 {
                            let _ = ctx.get_sync::<SmallService>("singleton").unwrap();
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_registration,
    bench_resolution,
    bench_hierarchy,
    bench_lookup,
    bench_invocation,
    bench_concurrent,
);

criterion_main!(benches);
