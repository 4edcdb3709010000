//! Store write and load benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use itemdb_bench::{bench_store, random_ranks, ranked_store};
use itemdb_core::{Item, Value};
use itemdb_testkit::{Contact, Counter};

/// Benchmark single inserts, one transaction each.
fn bench_single_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_insert");
    group.throughput(Throughput::Elements(1));
    group.bench_function("contact", |b| {
        let store = bench_store();
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let item = store
                .insert(Contact::new(format!("name_{n}"), n.to_string()))
                .unwrap();
            black_box(item.store_id());
        });
    });
    group.finish();
}

/// Benchmark many inserts in one transaction, with and without items.
fn bench_batch_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_insert");

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("items", batch_size),
            batch_size,
            |b, &batch_size| {
                let store = bench_store();
                b.iter(|| {
                    store
                        .transact(|| {
                            for i in 0..batch_size {
                                store.insert(Counter::new("c", Some(i)))?;
                            }
                            Ok(())
                        })
                        .unwrap();
                });
            },
        );
        group.bench_with_input(
            BenchmarkId::new("rows", batch_size),
            batch_size,
            |b, &batch_size| {
                let store = bench_store();
                let rows: Vec<Vec<Value>> = (0..batch_size)
                    .map(|i| vec![Value::from("c"), Value::from(i)])
                    .collect();
                b.iter(|| {
                    let ids = store
                        .batch_insert::<Counter>(&["label", "rank"], black_box(rows.clone()))
                        .unwrap();
                    black_box(ids);
                });
            },
        );
    }
    group.finish();
}

/// Benchmark loads that hit and miss the object cache.
fn bench_get_item(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_item");
    let ranks = random_ranks(1000, 100);
    let store = ranked_store(&ranks);
    let ids: Vec<_> = store
        .batch_insert::<Counter>(&["label"], (0..1000).map(|_| vec![Value::from("x")]))
        .unwrap();

    group.bench_function("cache_miss", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % ids.len();
            let item: Item<Counter> = store.get_item(ids[i]).unwrap();
            black_box(item.get());
        });
    });

    let held: Vec<Item<Counter>> = ids.iter().map(|id| store.get_item(*id).unwrap()).collect();
    group.bench_function("cache_hit", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % ids.len();
            let item: Item<Counter> = store.get_item(ids[i]).unwrap();
            black_box(item.store_id());
        });
    });
    drop(held);
    group.finish();
}

/// Benchmark commits of dirty items.
fn bench_modify_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("modify_commit");
    for dirty in [1usize, 10, 100].iter() {
        group.throughput(Throughput::Elements(*dirty as u64));
        group.bench_with_input(BenchmarkId::from_parameter(dirty), dirty, |b, &dirty| {
            let store = bench_store();
            let items: Vec<_> = (0..dirty)
                .map(|i| store.insert(Counter::new("c", Some(i as i64))).unwrap())
                .collect();
            b.iter(|| {
                store
                    .transact(|| {
                        for item in &items {
                            item.modify(|c| c.count += 1)?;
                        }
                        Ok(())
                    })
                    .unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_single_insert,
    bench_batch_insert,
    bench_get_item,
    bench_modify_commit,
);

criterion_main!(benches);
