//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores
//! and common test scenarios.

use crate::records::{Contact, Counter};
use itemdb_core::{Config, Location, Registry, Store, UpgradeMode};
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call has an effect.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        // Another harness may have installed one already.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Configuration used by the fixtures: upgrades are driven by the test.
#[must_use]
pub fn test_config() -> Config {
    Config::default().upgrade_mode(UpgradeMode::Manual)
}

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Store,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        init_tracing();
        Self {
            store: Store::open_with(Location::InMemory, test_config(), Registry::new())
                .expect("Failed to open in-memory store"),
            temp_dir: None,
        }
    }

    /// Creates a new on-disk test store in a fresh temporary directory.
    pub fn file() -> Self {
        Self::file_with(test_config(), Registry::new())
    }

    /// Creates a new on-disk test store with the given configuration.
    pub fn file_with(config: Config, registry: Registry) -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = store_path(temp_dir.path());
        let store = Store::open_with(Location::Directory(path), config, registry)
            .expect("Failed to open file store");
        Self {
            store,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| store_path(d.path()))
    }

    /// Opens another handle on the same directory.
    ///
    /// # Panics
    ///
    /// Panics for in-memory stores.
    pub fn reopen(&self, config: Config, registry: Registry) -> Store {
        let path = self.path().expect("Only file stores can be reopened");
        Store::open_with(Location::Directory(path), config, registry)
            .expect("Failed to reopen store")
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

fn store_path(root: &Path) -> PathBuf {
    root.join("store")
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust,ignore
/// use itemdb_testkit::with_temp_store;
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|store| {
///         assert_eq!(store.count::<Contact>().unwrap(), 0);
///     });
/// }
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Runs a test with a temporary on-disk store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store, &Path) -> R,
{
    let test_store = TestStore::file();
    let path = test_store.path().expect("File store should have a path");
    f(&test_store.store, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A store holding `count` contacts named `contact_<i>`.
    pub fn populated_store(count: usize) -> TestStore {
        let test_store = TestStore::memory();
        test_store
            .transact(|| {
                for i in 0..count {
                    test_store.insert(Contact::new(format!("contact_{i}"), format!("{i:04}")))?;
                }
                Ok(())
            })
            .expect("Failed to insert contacts");
        test_store
    }

    /// A store holding one counter per rank, in the given order.
    pub fn ranked_store(ranks: &[Option<i64>]) -> TestStore {
        let test_store = TestStore::memory();
        test_store
            .transact(|| {
                for (i, rank) in ranks.iter().enumerate() {
                    test_store.insert(Counter::new(format!("c{i}"), *rank))?;
                }
                Ok(())
            })
            .expect("Failed to insert counters");
        test_store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let test_store = TestStore::memory();
        assert!(test_store.path().is_none());
        assert!(test_store.is_open());
    }

    #[test]
    fn test_file_store() {
        let test_store = TestStore::file();
        let path = test_store.path().unwrap();
        assert!(path.join("db.sqlite").exists());
        assert!(path.join("files").is_dir());
    }

    #[test]
    fn test_populated_scenario() {
        let test_store = scenarios::populated_store(10);
        assert_eq!(test_store.count::<Contact>().unwrap(), 10);
    }

    #[test]
    fn test_with_temp_store() {
        with_temp_store(|store| {
            assert_eq!(store.count::<Counter>().unwrap(), 0);
        });
    }
}
