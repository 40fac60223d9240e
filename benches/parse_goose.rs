use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pbus_probe::decode_basics::classify;
use pbus_probe::decode_goose::parse_goose;
use pbus_probe::encode_basics::VlanTag;
use pbus_probe::encode_goose::{encode_goose, GooseFrame};
use pbus_probe::pipeline::{FramePipeline, PipelineContext, BURST_SIZE};
use pbus_probe::pool::BufferPool;
use pbus_probe::registry::{goose_registry, GooseSource, SourceRegistry};
use pbus_probe::stats::PipelineStats;
use std::sync::Arc;

/// GOOSE frame of publisher `index` with `entries` BOOLEANs, VLAN tagged.
fn create_goose_packet(index: u16, entries: u32) -> Vec<u8> {
    let mut source = GooseSource::synthetic(index);
    source.num_entries = entries;
    let mut frame = GooseFrame::for_source(&source);
    frame.header.vlan = Some(VlanTag {
        priority: 4,
        vlan_id: 1,
    });
    frame.st_num = 42;
    frame.sq_num = 7;
    encode_goose(&frame).unwrap()
}

fn benchmark_classify(c: &mut Criterion) {
    let packet = create_goose_packet(0, 16);
    c.bench_function("classify_goose", |b| {
        b.iter(|| classify(black_box(&packet)));
    });
}

fn benchmark_parse_goose(c: &mut Criterion) {
    let packet = create_goose_packet(0, 16);
    println!("\nGOOSE benchmark packet: {} bytes", packet.len());

    c.bench_function("parse_goose", |b| {
        b.iter(|| parse_goose(black_box(&packet)));
    });
}

fn benchmark_parse_and_lookup(c: &mut Criterion) {
    let mut registry = goose_registry(1000).unwrap();
    let packet = create_goose_packet(499, 16);

    c.bench_function("parse_goose_lookup", |b| {
        b.iter(|| {
            let (passport, _) = parse_goose(black_box(&packet)).unwrap();
            registry.lookup(&passport).is_some()
        });
    });
}

fn benchmark_goose_with_different_data_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("goose_data_size");

    // allData is skipped, so the parse cost should not grow with it
    for entries in [10u32, 50, 100, 200, 400].iter() {
        let packet = create_goose_packet(0, *entries);
        group.throughput(Throughput::Bytes(packet.len() as u64));
        group.bench_with_input(BenchmarkId::new("parse", entries), entries, |b, _| {
            b.iter(|| parse_goose(black_box(&packet)));
        });
    }

    group.finish();
}

fn benchmark_pipeline_burst(c: &mut Criterion) {
    let packets: Vec<Vec<u8>> = (0..BURST_SIZE as u16).map(|i| create_goose_packet(i, 16)).collect();
    let pool = BufferPool::new(BURST_SIZE, 2048).unwrap();
    let mut pipeline = FramePipeline::standard();
    let mut context = PipelineContext::new(
        goose_registry(BURST_SIZE).unwrap(),
        SourceRegistry::new(),
        Arc::new(PipelineStats::default()),
    );

    let mut group = c.benchmark_group("goose_pipeline");
    group.throughput(Throughput::Elements(BURST_SIZE as u64));
    group.bench_function("burst", |b| {
        b.iter(|| {
            let frames = packets.iter().filter_map(|packet| pool.alloc_from(packet));
            pipeline.process(frames, &mut context)
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_classify,
    benchmark_parse_goose,
    benchmark_parse_and_lookup,
    benchmark_goose_with_different_data_sizes,
    benchmark_pipeline_burst
);
criterion_main!(benches);
