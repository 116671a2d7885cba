use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relaychain_core::ledger::{Block, LedgerStore, MessageRecord, Tail};
use relaychain_core::registry::MembershipRegistry;
use std::time::Duration;
use tempfile::tempdir;

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_append");
    group.measurement_time(Duration::from_secs(10));

    for size in [64usize, 512, 2048] {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(dir.path().join("ledger.jsonl")).unwrap();
        let ciphertext = vec![0xA5u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &ciphertext, |b, ciphertext| {
            b.iter(|| {
                let record = MessageRecord::new(b"sender-key", b"receiver-key", ciphertext);
                black_box(store.append(record).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_scan");

    for blocks in [100u64, 1_000, 10_000] {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(dir.path().join("ledger.jsonl")).unwrap();
        for i in 0..blocks {
            let receiver: &[u8] = if i % 10 == 0 { b"bob" } else { b"carol" };
            let record = MessageRecord::new(b"alice", receiver, &i.to_be_bytes());
            store.append(record).unwrap();
        }

        group.throughput(Throughput::Elements(blocks));
        group.bench_with_input(BenchmarkId::new("messages_for", blocks), &store, |b, store| {
            b.iter(|| black_box(store.messages_for(b"bob").unwrap().len()));
        });
        group.bench_with_input(BenchmarkId::new("verify_chain", blocks), &store, |b, store| {
            b.iter(|| black_box(store.verify_chain().unwrap().blocks));
        });
    }

    group.finish();
}

fn bench_digest(c: &mut Criterion) {
    let tail = Tail {
        index: 41,
        hash: "ab".repeat(32),
    };
    let record = MessageRecord::new(&[1u8; 32], &[2u8; 32], &[3u8; 1024]);

    c.bench_function("block_next", |b| {
        b.iter(|| {
            let block = Block::next(&tail, 1_700_000_000, record.clone());
            black_box(block.unwrap())
        });
    });
}

fn bench_registry(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let registry = MembershipRegistry::open(dir.path().join("members.txt")).unwrap();
    for i in 0..1_000u32 {
        registry.store(&format!("user{}", i), &i.to_be_bytes()).unwrap();
    }

    let known_key = 500u32.to_be_bytes();
    c.bench_function("registry_store_known", |b| {
        b.iter(|| black_box(registry.store("user500", &known_key).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_append,
    bench_scan,
    bench_digest,
    bench_registry
);
criterion_main!(benches);
