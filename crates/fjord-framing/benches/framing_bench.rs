//! Benchmarks for fjord framing
//!
//! Measures performance of:
//! - Building packets from mixed fixed-width and string fields
//! - Reading the same fields back
//! - Snapshotting a builder into a packet

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fjord_framing::{PacketBuilder, PacketFlags, PacketReader};

fn message_builder(fields: usize) -> PacketBuilder {
    let mut builder = PacketBuilder::with_capacity(fields * 16);
    for i in 0..fields {
        builder
            .write_u32(i as u32)
            .write_u64(u64::MAX - i as u64)
            .write_string("player-state");
    }
    builder
}

/// Benchmark writing a message with `fields` records
fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");

    for &fields in &[1usize, 16, 256] {
        group.throughput(Throughput::Elements(fields as u64));
        group.bench_with_input(BenchmarkId::from_parameter(fields), &fields, |b, &n| {
            b.iter(|| message_builder(black_box(n)))
        });
    }
    group.finish();
}

/// Benchmark reading every record back
fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");

    for &fields in &[1usize, 16, 256] {
        let packet = message_builder(fields).build(PacketFlags::RELIABLE);
        group.throughput(Throughput::Bytes(packet.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(fields), &packet, |b, packet| {
            b.iter(|| {
                let mut reader = PacketReader::from_packet(packet);
                while !reader.is_at_end() {
                    black_box(reader.read_u32().ok());
                    black_box(reader.read_u64().ok());
                    black_box(reader.read_prefixed_string().ok());
                }
            })
        });
    }
    group.finish();
}

/// Benchmark builder snapshots
fn bench_build(c: &mut Criterion) {
    let builder = message_builder(64);
    c.bench_function("build_64", |b| b.iter(|| black_box(&builder).build_reliable()));
}

criterion_group!(benches, bench_write, bench_read, bench_build);
criterion_main!(benches);
