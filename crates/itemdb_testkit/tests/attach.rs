//! Child stores attached to a parent's connection.

use itemdb_core::{Query, Record, Registry, StoreError, StoreResult};
use itemdb_testkit::prelude::*;

#[test]
fn child_writes_land_in_the_child_file() {
    let parent = TestStore::memory();
    let child = TestStore::file();
    child.insert(Contact::new("before", "0")).unwrap();

    let name = parent.attach_child(&child).unwrap();
    assert_eq!(name, "child_db_1");
    assert_eq!(child.database_name(), "child_db_1");

    child.insert(Contact::new("after", "1")).unwrap();
    assert_eq!(child.count::<Contact>().unwrap(), 2);
    assert_eq!(parent.count::<Contact>().unwrap(), 0);
    child.close().unwrap();

    let reopened = child.reopen(test_config(), Registry::new());
    let names = reopened
        .query::<Contact>()
        .sort(Contact::column("name").ascending())
        .column("name")
        .unwrap()
        .all()
        .unwrap();
    assert_eq!(names, vec!["after".into(), "before".into()]);
}

#[test]
fn parent_and_child_share_transactions() {
    let parent = TestStore::file();
    let child = TestStore::file();
    parent.attach_child(&child).unwrap();

    let result: StoreResult<()> = parent.transact(|| {
        parent.insert(Person::new("p", None))?;
        assert!(child.in_transaction());
        child.insert(Person::new("c", None))?;
        Err(StoreError::invalid_operation("abort both"))
    });
    assert!(result.is_err());
    assert_eq!(parent.count::<Person>().unwrap(), 0);
    assert_eq!(child.count::<Person>().unwrap(), 0);

    parent
        .transact(|| {
            parent.insert(Person::new("p", None))?;
            child.insert(Person::new("c", None))?;
            Ok(())
        })
        .unwrap();
    assert_eq!(parent.count::<Person>().unwrap(), 1);
    assert_eq!(child.count::<Person>().unwrap(), 1);
}

#[test]
fn attaching_has_preconditions() {
    let parent = TestStore::memory();
    let child = TestStore::file();
    let second = TestStore::file();

    let inside = parent.transact(|| parent.attach_child(&child));
    assert!(matches!(inside, Err(StoreError::InvalidOperation { .. })));

    parent.attach_child(&child).unwrap();
    assert!(parent.attach_child(&child).is_err());
    assert_eq!(parent.attach_child(&second).unwrap(), "child_db_2");
    assert!(parent.attach_child(&TestStore::memory()).is_err());
}
