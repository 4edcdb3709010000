//! `find_unique` and friends.

use itemdb_core::{Query, Record, StoreError, Value};
use itemdb_testkit::prelude::*;
use proptest::prelude::*;

#[test]
fn exactly_one_match_is_returned() {
    let test_store = scenarios::populated_store(5);
    let found = test_store
        .find_unique::<Contact>(Contact::column("name").eq("contact_3"))
        .unwrap();
    assert_eq!(found.get().number, "0003");
}

#[test]
fn zero_matches_are_not_found() {
    let test_store = scenarios::populated_store(5);
    let err = test_store
        .find_unique::<Contact>(Contact::column("name").eq("nobody"))
        .unwrap_err();
    assert!(matches!(err, StoreError::ItemNotFound { .. }));
    assert!(test_store
        .find_unique_opt::<Contact>(Contact::column("name").eq("nobody"))
        .unwrap()
        .is_none());
    assert!(test_store
        .find_first::<Contact>(Contact::column("name").eq("nobody"))
        .unwrap()
        .is_none());
}

#[test]
fn two_matches_are_duplicates() {
    let test_store = TestStore::memory();
    let a = test_store.insert(Contact::new("Ann", "1")).unwrap();
    let b = test_store.insert(Contact::new("Ann", "2")).unwrap();
    let err = test_store
        .find_unique::<Contact>(Contact::column("name").eq("Ann"))
        .unwrap_err();
    match err {
        StoreError::DuplicateUniqueItem { store_ids, .. } => {
            assert!(store_ids.contains(&a.store_id()));
            assert!(store_ids.contains(&b.store_id()));
        }
        other => panic!("unexpected {other:?}"),
    }
    let first = test_store
        .find_first::<Contact>(Contact::column("name").eq("Ann"))
        .unwrap();
    assert!(first.is_some());
}

#[test]
fn other_types_do_not_match() {
    let test_store = TestStore::memory();
    test_store.insert(Person::new("Ann", None)).unwrap();
    assert!(test_store
        .find_unique_opt::<Contact>(Contact::column("name").eq("Ann"))
        .unwrap()
        .is_none());
}

#[test]
fn comparison_must_mention_the_target() {
    let test_store = TestStore::memory();
    test_store.insert(Contact::new("Ann", "1")).unwrap();
    test_store.insert(Person::new("Ann", None)).unwrap();
    let err = test_store
        .find_unique::<Contact>(Person::column("name").eq("Ann"))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidQuery { .. }), "{err:?}");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn outcome_follows_match_count(contacts in prop::collection::vec(contact_strategy(), 0..12), name in name_strategy()) {
        let test_store = TestStore::memory();
        test_store
            .transact(|| {
                for contact in &contacts {
                    test_store.insert(contact.clone())?;
                }
                Ok(())
            })
            .unwrap();
        let matching = contacts.iter().filter(|c| c.name == name).count();
        let result = test_store.find_unique::<Contact>(Contact::column("name").eq(Value::from(name.clone())));
        match matching {
            0 => {
                let not_found = matches!(result, Err(StoreError::ItemNotFound { .. }));
                prop_assert!(not_found, "expected ItemNotFound, got {:?}", result);
            }
            1 => prop_assert_eq!(result.unwrap().get().name, name.clone()),
            _ => {
                let duplicate = matches!(result, Err(StoreError::DuplicateUniqueItem { .. }));
                prop_assert!(duplicate, "expected DuplicateUniqueItem, got {:?}", result);
            }
        }
        let counted = test_store
            .query::<Contact>()
            .filter(Contact::column("name").eq(name))
            .count()
            .unwrap();
        prop_assert_eq!(counted, matching as u64);
    }
}
