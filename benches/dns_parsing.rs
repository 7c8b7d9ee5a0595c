use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use tunnel_dns::{
    DNSPacket, ReplyAssembler, ZoneResolver,
    config::ZoneConfig,
    dns::enums::DNSResourceType,
    store::MemoryStore,
};

fn assembler() -> ReplyAssembler {
    let store = Arc::new(MemoryStore::new());
    store.insert_a("www.example.com.", "203.0.113.5");
    let zone = ZoneConfig::new("example.com.", "ns1.example.com.", "hostmaster@example.com");
    ReplyAssembler::new(ZoneResolver::new(Arc::new(zone), store))
}

fn bench_packet_parsing(c: &mut Criterion) {
    let query = DNSPacket::query(1, "www.example.com.", DNSResourceType::A)
        .serialize()
        .unwrap();

    c.bench_function("parse dns query", |b| {
        b.iter(|| DNSPacket::parse(black_box(&query)).unwrap());
    });
}

fn bench_reply(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let assembler = assembler();
    let hit = DNSPacket::query(1, "www.example.com.", DNSResourceType::A);
    let miss = DNSPacket::query(2, "missing.example.com.", DNSResourceType::A);

    c.bench_function("build positive reply", |b| {
        b.iter(|| runtime.block_on(assembler.build_reply(black_box(&hit))));
    });
    c.bench_function("build and serialize negative reply", |b| {
        b.iter(|| {
            let reply = runtime.block_on(assembler.build_reply(black_box(&miss)));
            reply.serialize().unwrap()
        });
    });
}

criterion_group!(benches, bench_packet_parsing, bench_reply);
criterion_main!(benches);
