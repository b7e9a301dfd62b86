// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use gantry::{factory, Exchange, Handler, Router};

struct Nop;

impl Handler for Nop {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        ex.write_string("ok");
    }
}

fn router(enable_cache: bool, dynamic_routes: usize) -> Router {
    let router = Router::new(enable_cache, 1024);
    router.add_route("/", factory(|| Nop), None).unwrap();
    router.add_route("/about", factory(|| Nop), None).unwrap();
    for i in 0..dynamic_routes {
        let pattern = format!("/r{}/{{name([a-z]+)}}-{{page([0-9]+)}}", i);
        router.add_route(&pattern, factory(|| Nop), None).unwrap();
    }
    router
}

fn static_resolve_benchmark(c: &mut Criterion) {
    let router = router(false, 50);
    c.bench_function("resolve_static", |b| {
        b.iter(|| router.resolve(black_box("/about/"), "http").unwrap());
    });
}

fn dynamic_resolve_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_dynamic");

    for count in [1, 10, 100].iter() {
        // 命中列表中的最后一条路由
        let path = format!("/r{}/post-7", count - 1);

        let uncached = router(false, *count);
        group.bench_with_input(BenchmarkId::new("uncached", count), &path, |b, path| {
            b.iter(|| uncached.resolve(black_box(path), "http").unwrap());
        });

        let cached = router(true, *count);
        group.bench_with_input(BenchmarkId::new("cached", count), &path, |b, path| {
            b.iter(|| cached.resolve(black_box(path), "http").unwrap());
        });
    }

    group.finish();
}

fn miss_benchmark(c: &mut Criterion) {
    let router = router(true, 100);
    c.bench_function("resolve_miss", |b| {
        b.iter(|| router.resolve(black_box("/nowhere/at/all"), "http"));
    });
}

criterion_group!(
    benches,
    static_resolve_benchmark,
    dynamic_resolve_benchmark,
    miss_benchmark
);
criterion_main!(benches);
