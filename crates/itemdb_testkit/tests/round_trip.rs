//! Every attribute value survives a save and a load from the row.

use itemdb_core::{Query, Record, Value};
use itemdb_testkit::prelude::*;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn samples_load_as_saved(sample in sample_strategy()) {
        let test_store = TestStore::memory();
        let id = test_store.insert(sample.clone()).unwrap().store_id();
        // The insert's item is gone, so this decodes the stored row.
        let loaded = test_store.get_item::<Sample>(id).unwrap().get();
        prop_assert_eq!(loaded, sample);
    }

    #[test]
    fn projections_return_stored_values(samples in prop::collection::vec(sample_strategy(), 1..8)) {
        let test_store = TestStore::memory();
        test_store
            .transact(|| {
                for sample in &samples {
                    test_store.insert(sample.clone())?;
                }
                Ok(())
            })
            .unwrap();
        let flags = test_store
            .query::<Sample>()
            .sort(Sample::store_id_column().ascending())
            .column("flag")
            .unwrap()
            .all()
            .unwrap();
        let expected: Vec<Value> = samples.iter().map(|s| Value::Bool(s.flag)).collect();
        prop_assert_eq!(flags, expected);
    }
}

#[test]
fn updates_are_written_back() {
    let test_store = TestStore::file();
    let item = test_store.insert(Contact::new("Ann", "1")).unwrap();
    item.set(Contact::new("Ann", "2")).unwrap();
    let id = item.store_id();
    drop(item);
    assert_eq!(
        test_store.get_item::<Contact>(id).unwrap().get(),
        Contact::new("Ann", "2")
    );
}

#[test]
fn values_outside_the_schema_are_refused() {
    let test_store = TestStore::memory();
    let err = test_store
        .batch_insert::<Contact>(&["name", "number"], vec![vec![Value::Null, Value::from("1")]])
        .unwrap_err();
    assert!(matches!(err, itemdb_core::StoreError::InvalidValue { .. }), "{err:?}");
    assert_eq!(test_store.count::<Contact>().unwrap(), 0);
}
