//! Files written next to the database appear atomically.

use itemdb_core::{Config, Location, Registry, Store, StoreError, UpgradeMode};
use itemdb_testkit::prelude::*;
use std::io::Write;

#[test]
fn closed_files_appear_under_files() {
    let test_store = TestStore::file();
    let root = test_store.path().unwrap();

    let mut file = test_store.new_file(&["photos", "a.jpg"]).unwrap();
    file.write_all(b"jpeg bytes").unwrap();
    let temp = file.temp_path().to_path_buf();
    assert!(temp.starts_with(root.join("temp")));
    assert!(!root.join("files/photos/a.jpg").exists());

    let path = file.close().unwrap();
    assert_eq!(path, root.join("files").join("photos").join("a.jpg"));
    assert_eq!(std::fs::read(&path).unwrap(), b"jpeg bytes");
    assert!(!temp.exists());
}

#[test]
fn aborted_and_dropped_files_vanish() {
    let test_store = TestStore::file();
    let aborted = test_store.new_file(&["x"]).unwrap();
    let aborted_temp = aborted.temp_path().to_path_buf();
    aborted.abort().unwrap();
    assert!(!aborted_temp.exists());

    let dropped_temp = {
        let mut dropped = test_store.new_file(&["y"]).unwrap();
        dropped.write_all(b"partial").unwrap();
        dropped.temp_path().to_path_buf()
    };
    assert!(!dropped_temp.exists());
    assert!(!test_store.new_file_path(&["x"]).unwrap().exists());
    assert!(!test_store.new_file_path(&["y"]).unwrap().exists());
}

#[test]
fn temporary_paths_are_unique() {
    let test_store = TestStore::file();
    let a = test_store.new_temporary_file_path().unwrap();
    let b = test_store.new_temporary_file_path().unwrap();
    assert_ne!(a, b);
    let dir = test_store.new_directory(&["albums", "2024"]).unwrap();
    assert!(dir.is_dir());
}

#[test]
fn bad_segments_are_refused() {
    let test_store = TestStore::file();
    for segments in [&[][..], &[".."][..], &["a/b"][..], &[""][..]] {
        assert!(matches!(
            test_store.new_file(segments),
            Err(StoreError::InvalidOperation { .. })
        ));
    }
}

#[test]
fn in_memory_stores_need_a_files_dir() {
    let test_store = TestStore::memory();
    assert!(test_store.new_file(&["a"]).is_err());

    let dir = tempfile::tempdir().unwrap();
    let config = Config::default()
        .upgrade_mode(UpgradeMode::Manual)
        .files_dir(dir.path());
    let store = Store::open_with(Location::InMemory, config, Registry::new()).unwrap();
    let path = store.new_file(&["a"]).unwrap().close().unwrap();
    assert_eq!(path, dir.path().join("files").join("a"));
}
