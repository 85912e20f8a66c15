// Storage benchmarks - codecs, core operations, optimistic writes and cached reads

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use handinhand_store::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BenchPlayer {
    nickname: String,
    level: i64,
    gold: i64,
    items: Vec<(String, i64)>,
    version: u64,
}

impl Versioned for BenchPlayer {
    fn version(&self) -> u64 {
        self.version
    }

    fn with_version(self, version: u64) -> Self {
        Self { version, ..self }
    }
}

fn bench_player(id: &str) -> BenchPlayer {
    BenchPlayer {
        nickname: id.to_string(),
        level: 12,
        gold: 1000,
        items: (0..16).map(|i| (format!("item-{i}"), i)).collect(),
        version: 0,
    }
}

fn add_gold(player: BenchPlayer, _: &str) -> BenchPlayer {
    BenchPlayer {
        gold: player.gold + 1,
        ..player
    }
}

fn bench_codecs(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let player = bench_player("bench");

    for kind in [CodecKind::Json, CodecKind::MessagePack, CodecKind::Bincode] {
        let encoded = kind.encode(&player).unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", format!("{kind:?}")), &kind, |b, k| {
            b.iter(|| black_box(k.encode(black_box(&player)).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("decode", format!("{kind:?}")), &kind, |b, k| {
            b.iter(|| {
                let decoded: BenchPlayer = k.decode(black_box(&encoded)).unwrap();
                black_box(decoded)
            })
        });
    }
    group.finish();
}

fn bench_upserts(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("upsert");

    let backend = Arc::new(MemoryBackend::new());
    let plain: KeyValueStore<BenchPlayer, _> = KeyValueStore::new(Arc::clone(&backend), "user");
    let optimistic = OptimisticStore::new(plain.clone());

    group.bench_function("plain", |b| {
        b.iter(|| {
            rt.block_on(plain.find_one_and_upsert("plain", &bench_player, &add_gold))
                .unwrap()
        })
    });
    group.bench_function("optimistic", |b| {
        b.iter(|| {
            rt.block_on(optimistic.find_one_and_upsert("optimistic", &bench_player, &add_gold))
                .unwrap()
        })
    });
    group.finish();
}

fn bench_contended_optimistic_writers(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("contended_optimistic");
    group.sample_size(10);

    for &writers in &[2usize, 8] {
        group.throughput(Throughput::Elements(writers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(writers), &writers, |b, &writers| {
            let backend = Arc::new(MemoryBackend::new());
            let store = Arc::new(
                OptimisticStore::new(KeyValueStore::<BenchPlayer, _>::new(backend, "user"))
                    .with_max_attempts(100)
                    .with_backoff(Duration::from_micros(100), Duration::from_millis(1)),
            );

            b.iter(|| {
                rt.block_on(async {
                    let handles: Vec<_> = (0..writers)
                        .map(|_| {
                            let store = Arc::clone(&store);
                            tokio::spawn(async move {
                                store
                                    .find_one_and_upsert("shared", &bench_player, &add_gold)
                                    .await
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.await.unwrap().unwrap();
                    }
                })
            })
        });
    }
    group.finish();
}

fn bench_cached_reads(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("find");

    let backend = Arc::new(MemoryBackend::new());
    let plain: KeyValueStore<BenchPlayer, _> = KeyValueStore::new(Arc::clone(&backend), "user");
    rt.block_on(plain.insert_one("abc", &bench_player)).unwrap();

    let cached: CachedStore<_, BenchPlayer> = CachedStore::new(
        plain.clone(),
        Arc::new(EntityCache::default()),
        Duration::from_secs(3600),
    );

    group.bench_function("uncached", |b| {
        b.iter(|| black_box(rt.block_on(plain.find_one("abc")).unwrap()))
    });
    group.bench_function("cached", |b| {
        b.iter(|| black_box(rt.block_on(cached.find_one("abc")).unwrap()))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_codecs,
    bench_upserts,
    bench_contended_optimistic_writers,
    bench_cached_reads
);
criterion_main!(benches);
