//! Reference policies when items are deleted.

use itemdb_core::{Query, Record, StoreError};
use itemdb_testkit::prelude::*;

#[test]
fn cascade_nullify_and_disallow() {
    let test_store = TestStore::memory();
    test_store.register::<Pet>().unwrap();
    test_store.register::<Note>().unwrap();

    let ann = test_store.insert(Person::new("Ann", None)).unwrap();
    let doc = test_store.insert(Document { title: "plan".into() }).unwrap();
    let rex = test_store
        .insert(Pet {
            name: "Rex".into(),
            owner: Some(ann.store_id()),
        })
        .unwrap();
    let note = test_store
        .insert(Note {
            body: "hi".into(),
            document: Some(doc.store_id()),
            author: Some(ann.store_id()),
        })
        .unwrap();

    let err = doc.delete_from_store().unwrap_err();
    assert!(matches!(err, StoreError::DeletionDisallowed { .. }));
    assert_eq!(test_store.count::<Document>().unwrap(), 1);

    ann.delete_from_store().unwrap();
    assert!(ann.is_deleted());
    assert!(rex.is_deleted());
    assert_eq!(test_store.count::<Pet>().unwrap(), 0);
    assert_eq!(note.get().author, None);
    assert_eq!(note.get().document, Some(doc.store_id()));

    note.delete_from_store().unwrap();
    doc.delete_from_store().unwrap();
    assert_eq!(test_store.count::<Document>().unwrap(), 0);
}

#[test]
fn bulk_deletes_apply_policies() {
    let test_store = TestStore::memory();
    test_store.register::<Pet>().unwrap();
    test_store
        .transact(|| {
            for i in 0..6 {
                let person = test_store.insert(Person::new(format!("p{i}"), Some(i)))?;
                test_store.insert(Pet {
                    name: format!("pet{i}"),
                    owner: Some(person.store_id()),
                })?;
            }
            Ok(())
        })
        .unwrap();

    let removed = test_store
        .query::<Person>()
        .filter(Person::column("age").lt(4))
        .delete_from_store()
        .unwrap();
    assert_eq!(removed, 4);
    assert_eq!(test_store.count::<Person>().unwrap(), 2);
    assert_eq!(test_store.count::<Pet>().unwrap(), 2);
}

#[test]
fn deleted_items_cannot_change() {
    let test_store = TestStore::memory();
    let item = test_store.insert(Contact::new("Ann", "1")).unwrap();
    let id = item.store_id();
    item.delete_from_store().unwrap();
    assert!(matches!(
        item.modify(|c| c.number = "2".into()),
        Err(StoreError::InvalidOperation { .. })
    ));
    assert!(test_store.try_get_item::<Contact>(id).unwrap().is_none());
    // Deleting twice is harmless.
    item.delete_from_store().unwrap();
}
