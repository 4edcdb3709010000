//! Paginated traversal equals the sorted query, ties and nulls included.

use itemdb_core::{Item, Query, Record, SortKey, StoreResult};
use itemdb_testkit::prelude::*;
use proptest::prelude::*;

fn ids(items: &[Item<Counter>]) -> Vec<i64> {
    items.iter().map(|item| item.store_id().as_i64()).collect()
}

fn paged(test_store: &TestStore, key: SortKey, page_size: usize) -> Vec<Item<Counter>> {
    test_store
        .query::<Counter>()
        .sort(key)
        .paginate(page_size)
        .unwrap()
        .collect::<StoreResult<Vec<_>>>()
        .unwrap()
}

fn sorted(test_store: &TestStore, key: SortKey) -> Vec<Item<Counter>> {
    test_store
        .query::<Counter>()
        .sort(key)
        .sort(Counter::store_id_column().ascending())
        .all()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn pages_match_sorted_query(ranks in ranks_strategy(40), page_size in 1usize..12, descending in any::<bool>()) {
        let test_store = scenarios::ranked_store(&ranks);
        let column = Counter::column("rank");
        let key = if descending { column.descending() } else { column.ascending() };
        let expected = sorted(&test_store, key.clone());
        let actual = paged(&test_store, key, page_size);
        prop_assert_eq!(ids(&actual), ids(&expected));
        prop_assert_eq!(actual.len(), ranks.len());
    }
}

#[test]
fn one_value_everywhere() {
    let test_store = scenarios::ranked_store(&[Some(1); 25]);
    let key = Counter::column("rank").ascending();
    for page_size in [1, 2, 7, 24, 25, 26] {
        assert_eq!(
            ids(&paged(&test_store, key.clone(), page_size)),
            ids(&sorted(&test_store, key.clone())),
            "page size {page_size}"
        );
    }
}

#[test]
fn filters_apply_to_every_page() {
    let ranks: Vec<_> = (0..30).map(|i| Some(i % 5)).collect();
    let test_store = scenarios::ranked_store(&ranks);
    let items = test_store
        .query::<Counter>()
        .filter(Counter::column("rank").ge(3))
        .sort(Counter::column("rank").descending())
        .paginate(4)
        .unwrap()
        .collect::<StoreResult<Vec<_>>>()
        .unwrap();
    assert_eq!(items.len(), 12);
    assert!(items[..6].iter().all(|item| item.get().rank == Some(4)));
    assert!(items[6..].iter().all(|item| item.get().rank == Some(3)));
}

#[test]
fn rows_inserted_behind_the_cursor_are_not_repeated() {
    let ranks: Vec<_> = (0..10).map(Some).collect();
    let test_store = scenarios::ranked_store(&ranks);
    let mut pages = test_store
        .query::<Counter>()
        .sort(Counter::column("rank").ascending())
        .paginate(3)
        .unwrap();
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(pages.next().unwrap().unwrap().get().rank);
    }
    test_store.insert(Counter::new("early", Some(0))).unwrap();
    test_store.insert(Counter::new("late", Some(100))).unwrap();
    for item in pages {
        seen.push(item.unwrap().get().rank);
    }
    let mut expected: Vec<_> = (0..10).map(Some).collect();
    expected.push(Some(100));
    assert_eq!(seen, expected);
}
