//! Identity map from store id to live item.
//!
//! Entries hold weak references: the cache never keeps an item alive. Once
//! application code drops its last handle the entry is dead and the next
//! load rebuilds the item from its row. Dead entries are purged in sweeps
//! triggered by growth, so the map stays proportional to the live set.

use crate::types::StoreId;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

struct CacheEntry {
    item: Weak<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// Outcome of a cache lookup.
pub(crate) enum Lookup<V> {
    /// A live item of the requested type.
    Hit(Arc<V>),
    /// Nothing live under that id.
    Miss,
    /// A live item of another type.
    WrongType(&'static str),
}

/// Weak identity map scoped to one store.
pub(crate) struct ObjectCache {
    entries: HashMap<StoreId, CacheEntry>,
    sweep_threshold: usize,
    inserts_since_sweep: usize,
}

impl ObjectCache {
    pub(crate) fn new(sweep_threshold: usize) -> Self {
        Self {
            entries: HashMap::new(),
            sweep_threshold: sweep_threshold.max(1),
            inserts_since_sweep: 0,
        }
    }

    /// Returns the live item for `id`, if it is still referenced elsewhere.
    pub(crate) fn get<V: Any + Send + Sync>(&self, id: StoreId) -> Lookup<V> {
        let Some(entry) = self.entries.get(&id) else {
            return Lookup::Miss;
        };
        let Some(item) = entry.item.upgrade() else {
            return Lookup::Miss;
        };
        match item.downcast::<V>() {
            Ok(item) => Lookup::Hit(item),
            Err(_) => Lookup::WrongType(entry.type_name),
        }
    }

    /// Caches `item` under `id`, replacing any dead entry.
    pub(crate) fn insert<V: Any + Send + Sync>(
        &mut self,
        id: StoreId,
        item: &Arc<V>,
        type_name: &'static str,
    ) {
        let weak: Weak<V> = Arc::downgrade(item);
        self.entries.insert(
            id,
            CacheEntry {
                item: weak,
                type_name,
            },
        );
        self.inserts_since_sweep += 1;
        if self.inserts_since_sweep >= self.sweep_threshold {
            self.sweep();
        }
    }

    /// Drops the entry for `id`.
    pub(crate) fn remove(&mut self, id: StoreId) {
        self.entries.remove(&id);
    }

    /// Purges dead entries; returns how many were removed.
    pub(crate) fn sweep(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.item.strong_count() > 0);
        self.inserts_since_sweep = 0;
        before - self.entries.len()
    }

    /// Number of entries, dead or alive.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of entries whose item is still alive.
    pub(crate) fn live(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.item.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_returns_same_allocation() {
        let mut cache = ObjectCache::new(16);
        let item = Arc::new(41_u32);
        cache.insert(StoreId::new(1), &item, "u32");
        match cache.get::<u32>(StoreId::new(1)) {
            Lookup::Hit(found) => assert!(Arc::ptr_eq(&found, &item)),
            _ => panic!("expected hit"),
        }
    }

    #[test]
    fn dropped_items_miss() {
        let mut cache = ObjectCache::new(16);
        let item = Arc::new(String::from("x"));
        cache.insert(StoreId::new(1), &item, "String");
        drop(item);
        assert!(matches!(cache.get::<String>(StoreId::new(1)), Lookup::Miss));
        assert_eq!(cache.live(), 0);
    }

    #[test]
    fn wrong_type_is_reported() {
        let mut cache = ObjectCache::new(16);
        let item = Arc::new(1_u64);
        cache.insert(StoreId::new(1), &item, "u64");
        assert!(matches!(
            cache.get::<String>(StoreId::new(1)),
            Lookup::WrongType("u64")
        ));
    }

    #[test]
    fn growth_sweeps_dead_entries() {
        let mut cache = ObjectCache::new(4);
        let keep = Arc::new(0_i32);
        cache.insert(StoreId::new(0), &keep, "i32");
        for n in 1..4 {
            let temp = Arc::new(n);
            cache.insert(StoreId::new(i64::from(n)), &temp, "i32");
        }
        // The fourth insert swept the two entries already dropped; the
        // third died after the sweep.
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.live(), 1);
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_purges() {
        let mut cache = ObjectCache::new(16);
        let item = Arc::new(1_u8);
        cache.insert(StoreId::new(9), &item, "u8");
        cache.remove(StoreId::new(9));
        assert!(matches!(cache.get::<u8>(StoreId::new(9)), Lookup::Miss));
    }
}
