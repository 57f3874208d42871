use chrono::Utc;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use lockyard::config::{CoordinatorConfig, KeyedStoreConfig};
use lockyard::coordinator::{CoordinatorLockRegistry, LruCache, MemoryEnsemble};
use lockyard::keyed::{KeyedStoreLockRegistry, LockRecord, MemoryKeyedStore};
use lockyard::locking::{DistributedLock, LocalLockRegistry, LockRegistry};
use std::sync::Arc;

fn bench_obtain(c: &mut Criterion) {
    let mut group = c.benchmark_group("obtain");

    let local = LocalLockRegistry::new();
    group.bench_function("local", |b| {
        b.iter(|| black_box(local.obtain(black_box("orders/42"))))
    });

    let ensemble = MemoryEnsemble::new();
    let coordinator =
        CoordinatorLockRegistry::new(Arc::new(ensemble.connect()), &CoordinatorConfig::default())
            .unwrap();
    group.bench_function("coordinator_cached", |b| {
        b.iter(|| black_box(coordinator.obtain(black_box("orders/42"))))
    });

    let keyed = KeyedStoreLockRegistry::new(
        Arc::new(MemoryKeyedStore::new()),
        &KeyedStoreConfig::default(),
    );
    group.bench_function("keyed_store", |b| {
        b.iter(|| black_box(keyed.obtain(black_box("orders/42"))))
    });

    group.finish();
}

fn bench_lock_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_unlock");

    let local = LocalLockRegistry::new();
    let local_lock = local.obtain("cycle");
    group.bench_function("local", |b| {
        b.iter(|| {
            local_lock.lock().unwrap();
            local_lock.unlock().unwrap();
        })
    });

    let keyed = KeyedStoreLockRegistry::new(
        Arc::new(MemoryKeyedStore::new()),
        &KeyedStoreConfig::default(),
    );
    let keyed_lock = keyed.obtain("cycle");
    group.bench_function("keyed_store", |b| {
        b.iter(|| {
            assert!(keyed_lock.try_lock().unwrap());
            keyed_lock.unlock().unwrap();
        })
    });

    group.finish();
}

fn bench_record_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_record");
    let record = LockRecord::new("build-agent-07", "orders/42", "worker-3", Utc::now());
    let encoded = record.encode().unwrap();

    group.bench_function("encode", |b| b.iter(|| black_box(record.encode().unwrap())));
    group.bench_function("decode", |b| {
        b.iter(|| black_box(LockRecord::decode(black_box(&encoded)).unwrap()))
    });

    group.finish();
}

fn bench_lru_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("lru_insert");

    for capacity in [64usize, 1_024, 30_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                let mut cache = LruCache::new(capacity);
                let mut next = 0usize;
                b.iter(|| {
                    next += 1;
                    black_box(cache.insert(next, next, |_| false));
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_obtain,
    bench_lock_cycle,
    bench_record_codec,
    bench_lru_churn
);
criterion_main!(benches);
