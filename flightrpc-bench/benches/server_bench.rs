//! Reassembly and duplicate filter benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flightrpc_protocol::{frame, Packet, RequestId};
use flightrpc_server::{DedupConfig, DuplicateFilter, ReassemblyConfig, RequestBuffer};
use std::net::SocketAddr;

fn peer() -> SocketAddr {
    "127.0.0.1:9000".parse().unwrap()
}

fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly");

    for size in [100, 10000, 100000] {
        let payload = vec![7u8; size];
        let packets: Vec<Packet> = frame::frame(7, RequestId::generate(), &payload)
            .into_iter()
            .map(|raw| Packet::parse(raw).unwrap())
            .collect();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &packets, |b, packets| {
            let buffer = RequestBuffer::new(ReassemblyConfig::default());
            b.iter(|| {
                let mut assembled = None;
                // Reverse order exercises out-of-order slot filling.
                for packet in packets.iter().rev() {
                    assembled = buffer.process_fragment(peer(), packet.clone()).unwrap();
                }
                black_box(assembled.unwrap())
            });
        });
    }

    group.finish();
}

fn bench_dedup_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedup_check");
    group.throughput(Throughput::Elements(1));

    group.bench_function("fresh", |b| {
        let filter = DuplicateFilter::new(DedupConfig::default());
        b.iter(|| black_box(filter.is_allowed(RequestId::generate())));
    });

    group.bench_function("duplicate", |b| {
        let filter = DuplicateFilter::new(DedupConfig::default());
        let id = RequestId::generate();
        filter.is_allowed(id);
        b.iter(|| black_box(filter.is_allowed(id)));
    });

    group.finish();
}

criterion_group!(benches, bench_reassembly, bench_dedup_check);

criterion_main!(benches);
