//! Throughput benchmarks for resp-dispatch
//!
//! Measures the three hot paths of a request: decoding the frame, running
//! the handler through the registry, and encoding the reply.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use resp_dispatch::commands::CommandError;
use resp_dispatch::{RespParser, RespValue, Request, Server};

/// Benchmark request decoding
fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Elements(1));

    let ping = b"*1\r\n$4\r\nPING\r\n".to_vec();
    group.bench_function("ping", |b| {
        let mut parser = RespParser::new();
        b.iter(|| {
            let (frame, _) = parser.parse(black_box(&ping)).unwrap().unwrap();
            black_box(Request::try_from(frame).unwrap());
        });
    });

    let mut set = b"*3\r\n$3\r\nSET\r\n$8\r\nkey:1234\r\n$1024\r\n".to_vec();
    set.extend(std::iter::repeat(b'x').take(1024));
    set.extend_from_slice(b"\r\n");
    group.bench_function("set_1kb", |b| {
        let mut parser = RespParser::new();
        b.iter(|| {
            let (frame, _) = parser.parse(black_box(&set)).unwrap().unwrap();
            black_box(Request::try_from(frame).unwrap());
        });
    });

    group.bench_function("inline", |b| {
        let mut parser = RespParser::new();
        b.iter(|| black_box(parser.parse(black_box(b"SET key value\r\n")).unwrap()));
    });

    group.finish();
}

/// Benchmark reply encoding
fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize");
    group.throughput(Throughput::Elements(1));

    let ok = RespValue::ok();
    group.bench_function("ok", |b| b.iter(|| black_box(ok.serialize())));

    let bulk = RespValue::bulk_string(Bytes::from("x".repeat(1024)));
    group.bench_function("bulk_1kb", |b| b.iter(|| black_box(bulk.serialize())));

    // A typical EXEC reply.
    let batch = RespValue::array(
        (0..16)
            .map(|i| match i % 3 {
                0 => RespValue::ok(),
                1 => RespValue::integer(i),
                _ => RespValue::null(),
            })
            .collect(),
    );
    group.bench_function("exec_16", |b| {
        let mut buf = Vec::with_capacity(256);
        b.iter(|| {
            buf.clear();
            batch.serialize_into(&mut buf);
            black_box(buf.len());
        });
    });

    group.finish();
}

/// Benchmark standalone command execution through the registry
fn bench_execute(c: &mut Criterion) {
    let mut server = Server::new();
    server.handle("ping", |_: &Request| Ok(RespValue::simple_string("PONG")));
    server.handle("fail", |_: &Request| Err(CommandError::msg("boom\r\nline")));
    for i in 0..64 {
        server.handle(&format!("cmd{}", i), |_: &Request| Ok(RespValue::null()));
    }

    let mut group = c.benchmark_group("execute");
    group.throughput(Throughput::Elements(1));

    let ping = Request::new("PING", Vec::<Bytes>::new());
    group.bench_function("registered", |b| {
        b.iter(|| black_box(server.execute(black_box(&ping))))
    });

    let unknown = Request::new("nosuchcommand", Vec::<Bytes>::new());
    group.bench_function("unknown", |b| {
        b.iter(|| black_box(server.execute(black_box(&unknown))))
    });

    let fail = Request::new("fail", Vec::<Bytes>::new());
    group.bench_function("error_reply", |b| {
        b.iter(|| black_box(server.execute(black_box(&fail))))
    });

    group.finish();
}

criterion_group!(benches, bench_parse, bench_serialize, bench_execute);
criterion_main!(benches);
