// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use gantry::{App, Config, Exchange, Handler, Request};

fn simple_request_parse_benchmark(c: &mut Criterion) {
    let request = b"GET / HTTP/1.1\r\nHost: localhost:7878\r\nUser-Agent: Test\r\n\r\n";

    c.bench_function("simple_request_parse", |b| {
        b.iter(|| Request::try_from(black_box(&request[..]), 0).unwrap());
    });
}

fn complex_request_parse_benchmark(c: &mut Criterion) {
    let request = b"GET /path/to/resource?id=123&name=test HTTP/1.1\r\n\
                    Host: localhost:7878\r\n\
                    User-Agent: Mozilla/5.0 (Windows NT 10.0; Win64; x64)\r\n\
                    Accept: text/html,application/xhtml+xml\r\n\
                    Accept-Language: en-US,en;q=0.9\r\n\
                    Accept-Encoding: gzip, deflate, br\r\n\
                    Cookie: theme=dark; GANTRYSESSID=abc\r\n\
                    \r\n";

    c.bench_function("complex_request_parse", |b| {
        b.iter(|| Request::try_from(black_box(&request[..]), 0).unwrap());
    });
}

struct Post;

impl Handler for Post {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        let body = format!("Post_Get_{}_{}", ex.path_var("name"), ex.path_var("page"));
        ex.write_string(&body.repeat(64));
    }
}

fn dispatch_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    for gzip in [false, true].iter() {
        let app = App::new(Config::new().with_gzip(*gzip, 256));
        app.add_route("/post/{name([a-zA-Z0-9]+)}-{page([0-9]+)}", || Post)
            .unwrap();
        let raw = b"GET /post/asdf-1 HTTP/1.1\r\nAccept-Encoding: gzip\r\n\r\n";

        group.bench_with_input(BenchmarkId::new("gzip", gzip), &raw[..], |b, raw| {
            b.iter(|| {
                let request = Request::try_from(raw, 0).unwrap();
                let mut out = Vec::with_capacity(4096);
                app.dispatch(request, &mut out);
                black_box(out)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    simple_request_parse_benchmark,
    complex_request_parse_benchmark,
    dispatch_benchmark
);
criterion_main!(benches);
