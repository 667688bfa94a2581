//! Codec benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use greenhouse_core::message::encode_request;
use greenhouse_core::{decode_value, encode_value, Fnsm, Fnst, Registry, Request, RequestMessage, Value};
use std::collections::BTreeMap;

fn sample_registration() -> RequestMessage {
    let mut fnst = Fnst::new();
    let mut fnsm = Fnsm::new();
    for address in 0..16 {
        fnst.insert(address, format!("A{}", address % 4));
        if address % 3 == 0 {
            fnsm.insert(address, 0);
        }
    }
    RequestMessage::new(
        1,
        Request::RegisterFieldNode {
            fnst,
            fnsm,
            name: "benchmark bed".to_string(),
        },
    )
}

fn value_benchmark(c: &mut Criterion) {
    let value = Value::Map(
        (0..32)
            .map(|i| (Value::Integer(i), Value::Double(i as f64 * 0.5)))
            .collect::<BTreeMap<_, _>>(),
    );
    let tlv = encode_value(&value).unwrap();

    c.bench_function("encode_value_map", |b| {
        b.iter(|| black_box(encode_value(&value).unwrap()))
    });

    c.bench_function("decode_value_map", |b| {
        b.iter(|| black_box(decode_value(&tlv).unwrap()))
    });
}

fn message_benchmark(c: &mut Criterion) {
    let msg = sample_registration();
    let tlv = encode_request(&msg).unwrap();
    let registry = Registry::server();

    c.bench_function("encode_registration", |b| {
        b.iter(|| black_box(encode_request(&msg).unwrap()))
    });

    c.bench_function("decode_registration", |b| {
        b.iter(|| black_box(registry.decode_message(&tlv).unwrap()))
    });
}

criterion_group!(benches, value_benchmark, message_benchmark);
criterion_main!(benches);
