//! Store statistics.
//!
//! Counters are atomic and can be read while operations are in progress.
//!
//! ```rust,ignore
//! let store = Store::open_in_memory()?;
//! // ...
//! let stats = store.stats();
//! println!("commits: {}, cache misses: {}", stats.commits, stats.cache_misses);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters owned by one store.
#[derive(Debug, Default)]
pub struct StoreStats {
    queries: AtomicU64,
    statements: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    checkpoints: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    tables_created: AtomicU64,
    items_upgraded: AtomicU64,
}

/// Point-in-time copy of [`StoreStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Row-returning statements run.
    pub queries: u64,
    /// Non-row statements run.
    pub statements: u64,
    /// Transactions committed.
    pub commits: u64,
    /// Transactions rolled back.
    pub rollbacks: u64,
    /// Checkpoints that flushed at least one item.
    pub checkpoints: u64,
    /// Loads answered by the object cache.
    pub cache_hits: u64,
    /// Loads that built a new item.
    pub cache_misses: u64,
    /// Item tables created by this store.
    pub tables_created: u64,
    /// Rows brought to their current version.
    pub items_upgraded: u64,
}

impl StoreStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_statement(&self) {
        self.statements.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_table_created(&self) {
        self.tables_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_item_upgraded(&self) {
        self.items_upgraded.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            statements: self.statements.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            tables_created: self.tables_created.load(Ordering::Relaxed),
            items_upgraded: self.items_upgraded.load(Ordering::Relaxed),
        }
    }
}
