//! Benchmark utilities.

use itemdb_core::{Config, Location, Registry, Store, UpgradeMode};
use itemdb_testkit::Counter;
use rand::Rng;

/// Generate `count` ranks drawn from `0..distinct`.
pub fn random_ranks(count: usize, distinct: i64) -> Vec<i64> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(0..distinct)).collect()
}

/// Open an in-memory store that never upgrades in the background.
pub fn bench_store() -> Store {
    let config = Config::default().upgrade_mode(UpgradeMode::Manual);
    Store::open_with(Location::InMemory, config, Registry::new()).expect("Failed to open store")
}

/// A store holding one counter per rank.
pub fn ranked_store(ranks: &[i64]) -> Store {
    let store = bench_store();
    store
        .transact(|| {
            for (i, rank) in ranks.iter().enumerate() {
                store.insert(Counter::new(format!("c{i}"), Some(*rank)))?;
            }
            Ok(())
        })
        .expect("Failed to populate store");
    store
}
