//! Failed transactions leave no trace, in memory or on disk.

use itemdb_core::{ItemStatus, Query, Record, StoreError, StoreResult, Value};
use itemdb_testkit::prelude::*;

fn counters(test_store: &TestStore, n: usize) -> Vec<itemdb_core::Item<Counter>> {
    test_store
        .transact(|| {
            (0..n)
                .map(|i| test_store.insert(Counter::new(format!("c{i}"), Some(i as i64))))
                .collect()
        })
        .unwrap()
}

fn abort() -> StoreError {
    StoreError::invalid_operation("forced failure")
}

#[test]
fn rollback_restores_every_item() {
    let test_store = TestStore::file();
    let items = counters(&test_store, 5);
    let before: Vec<Counter> = items.iter().map(|item| item.get()).collect();

    let result: StoreResult<()> = test_store.transact(|| {
        for item in &items {
            item.modify(|c| {
                c.count += 10;
                c.label.push('!');
            })?;
        }
        // Push the changes into the database before failing.
        test_store.checkpoint()?;
        assert_eq!(
            test_store
                .query::<Counter>()
                .column("count")?
                .sum()?,
            Value::Integer(50)
        );
        Err(abort())
    });
    assert!(result.is_err());

    let after: Vec<Counter> = items.iter().map(|item| item.get()).collect();
    assert_eq!(after, before);
    let on_disk = test_store.query::<Counter>().column("count").unwrap().sum().unwrap();
    assert_eq!(on_disk, Value::Integer(0));
    assert_eq!(test_store.stats().rollbacks, 1);
}

#[test]
fn rollback_detaches_new_items_and_restores_deleted_ones() {
    let test_store = TestStore::memory();
    let kept = counters(&test_store, 1).remove(0);

    let mut created = None;
    let result: StoreResult<()> = test_store.transact(|| {
        created = Some(test_store.insert(Counter::new("new", None))?);
        kept.delete_from_store()?;
        assert!(kept.is_deleted());
        Err(abort())
    });
    assert!(result.is_err());

    let created = created.unwrap();
    assert_eq!(created.status(), ItemStatus::Detached);
    assert!(test_store.try_get_item::<Counter>(created.store_id()).unwrap().is_none());
    assert_eq!(kept.status(), ItemStatus::Stored);
    assert_eq!(test_store.get_item::<Counter>(kept.store_id()).unwrap(), kept);
    assert_eq!(test_store.count::<Counter>().unwrap(), 1);
}

#[test]
fn store_stays_usable_after_rollback() {
    let test_store = TestStore::memory();
    let item = counters(&test_store, 1).remove(0);
    let _ = test_store.transact(|| -> StoreResult<()> {
        item.modify(|c| c.count = 99)?;
        Err(abort())
    });
    item.modify(|c| c.count = 1).unwrap();
    assert_eq!(item.get().count, 1);
    let reread = test_store
        .query::<Counter>()
        .filter(Counter::column("count").eq(1))
        .count()
        .unwrap();
    assert_eq!(reread, 1);
}

#[test]
fn a_panicking_body_rolls_back() {
    let test_store = TestStore::memory();
    let item = counters(&test_store, 1).remove(0);
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = test_store.transact(|| -> StoreResult<()> {
            item.modify(|c| c.count = 7)?;
            panic!("boom");
        });
    }));
    assert!(outcome.is_err());
    assert!(!test_store.in_transaction());
    assert_eq!(item.get().count, 0);
}

#[test]
fn changes_are_rejected_during_hooks() {
    use itemdb_core::{Attribute, Fields, Schema};
    use std::sync::atomic::{AtomicBool, Ordering};

    static REJECTED: AtomicBool = AtomicBool::new(false);

    #[derive(Debug, Clone)]
    struct Touchy {
        n: i64,
    }

    impl Record for Touchy {
        const TYPE_NAME: &'static str = "touchy";

        fn schema() -> Schema {
            Schema::new(Self::TYPE_NAME, 1).attribute(Attribute::integer("n"))
        }

        fn encode(&self) -> Vec<Value> {
            vec![self.n.into()]
        }

        fn decode(values: &[Value]) -> StoreResult<Self> {
            Ok(Self {
                n: Fields::new(values).integer()?,
            })
        }

        fn committed(item: &itemdb_core::Item<Self>) {
            let result = item.modify(|t| t.n += 1);
            REJECTED.store(
                matches!(result, Err(StoreError::ChangeRejected)),
                Ordering::SeqCst,
            );
        }
    }

    let test_store = TestStore::memory();
    let item = test_store.insert(Touchy { n: 1 }).unwrap();
    assert!(REJECTED.load(Ordering::SeqCst));
    assert_eq!(item.get().n, 1);
}
