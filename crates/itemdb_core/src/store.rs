//! Store facade.

use crate::cache::{Lookup, ObjectCache};
use crate::catalog::{self, quote, Catalog, CREATE_OBJECT, DATABASE, DELETE_OBJECT, TYPEOF_QUERY};
use crate::config::{Config, Location};
use crate::dir::{FileArea, StoreDir};
use crate::error::{StoreError, StoreResult};
use crate::item::{Item, ItemInner};
use crate::query::{Comparison, ItemQuery, JoinQuery, Query, RecordSet};
use crate::registry::Registry;
use crate::schema::{DeletePolicy, Record, Schema, TypeKey};
use crate::stats::{StatsSnapshot, StoreStats};
use crate::transaction::{ItemKey, Tracked, TransactionManager};
use crate::types::StoreId;
use crate::upgrade::UpgradeQueue;
use itemdb_storage::{BackendError, Row, SqliteBackend, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Largest `IN (...)` list sent in one statement.
const IN_CHUNK: usize = 500;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// State shared by every handle to one store.
pub(crate) struct StoreShared {
    /// Distinguishes this store's items from those of stores sharing its
    /// transaction.
    pub(crate) serial: u64,
    pub(crate) location: Location,
    pub(crate) config: Config,
    pub(crate) dir: Option<StoreDir>,
    /// `main`, or `child_db_<n>` once attached to a parent.
    pub(crate) database: RwLock<String>,
    pub(crate) transactions: RwLock<Arc<TransactionManager>>,
    pub(crate) catalog: Mutex<Catalog>,
    pub(crate) registry: RwLock<Registry>,
    pub(crate) cache: Mutex<ObjectCache>,
    pub(crate) stats: StoreStats,
    pub(crate) upgrades: Mutex<UpgradeQueue>,
    pub(crate) files: FileArea,
    pub(crate) children: AtomicU64,
    pub(crate) open: AtomicBool,
    pub(crate) attached: AtomicBool,
}

/// A typed object store.
///
/// `Store` is a cheap handle; clones refer to the same store. All access to
/// the backend connection is serialized: one thread at a time runs a
/// transaction, and [`transact`](Self::transact) calls nest by joining the
/// outer transaction.
///
/// # Opening a Store
///
/// ```rust,ignore
/// use itemdb_core::{Config, Location, Registry, Store};
///
/// let mut registry = Registry::new();
/// registry.register::<Contact>()?;
/// let store = Store::open_with(Location::Directory("contacts".into()), Config::default(), registry)?;
///
/// let ann = store.insert(Contact { name: "Ann".into(), number: "123".into() })?;
/// store.transact(|| ann.modify(|c| c.number = "456".into()))?;
/// ```
///
/// # In-Memory Stores
///
/// For testing, use `Store::open_in_memory()`. Record types are registered
/// implicitly on first use.
#[derive(Clone)]
pub struct Store {
    pub(crate) shared: Arc<StoreShared>,
}

impl Store {
    /// Opens (or creates) a store directory with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `StoreCorrupt` if the path exists but is not a store.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with(
            Location::Directory(path.as_ref().to_path_buf()),
            Config::default(),
            Registry::new(),
        )
    }

    /// Opens a private in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be created.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open_with(Location::InMemory, Config::default(), Registry::new())
    }

    /// Opens a store with custom configuration and no pre-registered types.
    ///
    /// # Errors
    ///
    /// See [`open_with`](Self::open_with).
    pub fn open_with_config(location: Location, config: Config) -> StoreResult<Self> {
        Self::open_with(location, config, Registry::new())
    }

    /// Opens a store.
    ///
    /// Checks every registered type against the catalog: columns must
    /// match, the database may not hold a newer version, and every older
    /// version with rows needs a complete upgrader chain. Rows of older
    /// versions are then upgraded according to `config.upgrade_mode`.
    ///
    /// # Errors
    ///
    /// Returns `StoreCorrupt`, `SchemaMismatch` or `NoUpgradePathAvailable`
    /// when those checks fail.
    pub fn open_with(location: Location, config: Config, registry: Registry) -> StoreResult<Self> {
        let (backend, dir, files) = match &location {
            Location::InMemory => {
                let backend = SqliteBackend::open_in_memory()?;
                let files = config
                    .files_dir
                    .as_deref()
                    .map_or_else(FileArea::none, FileArea::rooted_at);
                (backend, None, files)
            }
            Location::Directory(path) => {
                let dir = StoreDir::open(path, config.create_if_missing)?;
                let backend =
                    SqliteBackend::open_existing(&dir.database_path()).map_err(corrupt_if_not_database)?;
                let files = FileArea::for_dir(&dir);
                (backend, Some(dir), files)
            }
        };
        let mut backend = backend
            .with_busy_timeout(config.busy_timeout)
            .map_err(corrupt_if_not_database)?
            .with_slow_statement_threshold(config.slow_statement_threshold);
        catalog::initialize(&mut backend, "main").map_err(|err| match err {
            StoreError::Backend(inner) => corrupt_if_not_database(inner),
            other => other,
        })?;

        let shared = StoreShared {
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            location,
            cache: Mutex::new(ObjectCache::new(config.cache_sweep_threshold)),
            config,
            dir,
            database: RwLock::new("main".to_string()),
            transactions: RwLock::new(Arc::new(TransactionManager::new(Box::new(backend)))),
            catalog: Mutex::new(Catalog::default()),
            registry: RwLock::new(registry),
            stats: StoreStats::new(),
            upgrades: Mutex::new(UpgradeQueue::default()),
            files,
            children: AtomicU64::new(0),
            open: AtomicBool::new(true),
            attached: AtomicBool::new(false),
        };
        let store = Self {
            shared: Arc::new(shared),
        };
        store.startup()?;
        store.start_upgrades();
        info!(
            location = ?store.shared.location,
            types = store.shared.catalog.lock().len(),
            "store opened"
        );
        Ok(store)
    }

    /// Directory of an on-disk store.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.shared.dir.as_ref().map(StoreDir::path)
    }

    /// Where the store keeps its data.
    #[must_use]
    pub fn location(&self) -> &Location {
        &self.shared.location
    }

    /// Configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Backend database name: `main`, or `child_db_<n>` once attached.
    #[must_use]
    pub fn database_name(&self) -> String {
        self.shared.database.read().clone()
    }

    /// Snapshot of the store's counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Closes the store; every later operation fails with `StoreClosed`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` inside a transaction.
    pub fn close(&self) -> StoreResult<()> {
        let manager = self.transactions();
        let _lock = manager.enter();
        if manager.is_active() {
            return Err(StoreError::invalid_operation("cannot close inside a transaction"));
        }
        if self.shared.open.swap(false, Ordering::SeqCst) {
            self.shared.cache.lock().sweep();
            info!(location = ?self.shared.location, "store closed");
        }
        Ok(())
    }

    /// Returns true until [`close`](Self::close).
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> StoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(StoreError::StoreClosed)
        }
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Runs `f` in a transaction.
    ///
    /// If a transaction is already active, `f` joins it. Otherwise one is
    /// begun; on success touched items are flushed and the transaction
    /// commits, and every changed item gets its `committed` hook. On error
    /// or panic the transaction rolls back and every changed item is
    /// restored to its committed value.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, of the final checkpoint, or of the commit.
    pub fn transact<R>(&self, f: impl FnOnce() -> StoreResult<R>) -> StoreResult<R> {
        self.ensure_open()?;
        let manager = self.transactions();
        let _lock = manager.enter();
        if manager.is_active() {
            return f();
        }

        manager.begin()?;
        let guard = RollbackOnDrop {
            store: self,
            manager: &manager,
            armed: true,
        };
        let value = f()?;
        self.checkpoint()?;
        let items = manager.commit()?;
        guard.disarm();
        self.shared.stats.record_commit();

        let _reject = manager.reject_changes();
        for item in &items {
            item.committed();
        }
        Ok(value)
    }

    fn roll_back(&self, manager: &TransactionManager) {
        let state = manager.rollback();
        self.shared.stats.record_rollback();
        {
            let _reject = manager.reject_changes();
            for item in state.transaction.values() {
                item.reverted();
            }
        }
        for undo in state.undo.into_iter().rev() {
            undo();
        }
    }

    /// Writes every touched item to the backend without ending the
    /// transaction. A no-op outside a transaction or with nothing touched.
    ///
    /// # Errors
    ///
    /// Returns the first failing write; unflushed items stay touched.
    pub fn checkpoint(&self) -> StoreResult<()> {
        let manager = self.transactions();
        let _lock = manager.enter();
        if !manager.is_active() {
            return Ok(());
        }
        let touched = manager.take_touched();
        if touched.is_empty() {
            return Ok(());
        }
        let count = touched.len();
        let _reject = manager.reject_changes();
        let items: Vec<(ItemKey, Arc<dyn Tracked>)> = touched.into_iter().collect();
        for (index, (_, item)) in items.iter().enumerate() {
            if let Err(err) = item.checkpoint() {
                let unflushed: BTreeMap<ItemKey, Arc<dyn Tracked>> = items[index..]
                    .iter()
                    .map(|(key, item)| (*key, Arc::clone(item)))
                    .collect();
                manager.restore_touched(unflushed);
                return Err(err);
            }
        }
        self.shared.stats.record_checkpoint();
        debug!(items = count, "checkpoint");
        Ok(())
    }

    /// Returns true while a transaction is active on this store's
    /// connection.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.transactions().is_active()
    }

    pub(crate) fn transactions(&self) -> Arc<TransactionManager> {
        self.shared.transactions.read().clone()
    }

    pub(crate) fn serial(&self) -> u64 {
        self.shared.serial
    }

    pub(crate) fn changed(&self, key: ItemKey, item: Arc<dyn Tracked>) -> StoreResult<()> {
        self.transactions().changed(key, item)
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    /// Stores a new item.
    ///
    /// The store id is allocated immediately; the row is written at the
    /// next checkpoint (at the latest when the transaction commits).
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if the value does not fit the schema.
    pub fn insert<T: Record>(&self, value: T) -> StoreResult<Item<T>> {
        let schema = self.ensure_registered::<T>()?;
        schema.check_row(&value.encode())?;
        self.transact(|| {
            let type_id = self.type_id_for(&schema)?;
            let id = StoreId::new(self.insert_sql(&self.catalog_sql(CREATE_OBJECT), &[type_id.into()])?);
            let item = Item::pending(self.clone(), id, Arc::clone(&schema), value);
            self.cache_item(&item);
            self.changed((self.serial(), id), Arc::new(item.clone()))?;
            debug!(r#type = T::TYPE_NAME, store_id = %id, "inserted item");
            Ok(item)
        })
    }

    /// Inserts rows without constructing items.
    ///
    /// Each row gives values for `attributes` in order; other attributes
    /// take their defaults. Returns the new store ids.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for unknown attribute names and `InvalidValue`
    /// for rows that do not fit the schema; nothing is inserted then.
    pub fn batch_insert<T: Record>(
        &self,
        attributes: &[&str],
        rows: impl IntoIterator<Item = Vec<Value>>,
    ) -> StoreResult<Vec<StoreId>> {
        let schema = self.ensure_registered::<T>()?;
        let indexes = attributes
            .iter()
            .map(|name| {
                schema.attribute_index(name).ok_or_else(|| {
                    StoreError::invalid_query(format!("{} has no attribute {name:?}", schema.key()))
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;
        self.transact(|| {
            let type_id = self.type_id_for(&schema)?;
            let create = self.catalog_sql(CREATE_OBJECT);
            let mut ids = Vec::new();
            for values in rows {
                if values.len() != indexes.len() {
                    return Err(StoreError::invalid_operation(format!(
                        "row has {} values for {} attributes",
                        values.len(),
                        indexes.len()
                    )));
                }
                let mut row = schema.default_row();
                for (index, value) in indexes.iter().zip(values) {
                    row[*index] = value;
                }
                schema.check_row(&row)?;
                let id = StoreId::new(self.insert_sql(&create, &[type_id.into()])?);
                self.insert_row(&schema, id, &row)?;
                ids.push(id);
            }
            debug!(r#type = T::TYPE_NAME, rows = ids.len(), "batch insert");
            Ok(ids)
        })
    }

    /// Loads an item by store id.
    ///
    /// Returns the cached item if one is alive. Rows of an older schema
    /// version are upgraded in place first.
    ///
    /// # Errors
    ///
    /// - `ItemNotFound` if no such item exists or it is of another type
    /// - `UnknownItemType` if its type is not registered
    /// - `SchemaMismatch` if it was stored by a newer version of `T`
    pub fn get_item<T: Record>(&self, id: StoreId) -> StoreResult<Item<T>> {
        self.ensure_open()?;
        if id.is_store() {
            return Err(StoreError::invalid_operation(
                "store id -1 refers to the store itself",
            ));
        }
        let schema = self.ensure_registered::<T>()?;
        if let Some(item) = self.cached::<T>(id)? {
            return Ok(item);
        }

        let rows = self.run_query(&self.catalog_sql(TYPEOF_QUERY), &[id.into()])?;
        let Some(row) = rows.into_iter().next() else {
            return Err(StoreError::item_not_found(format!("store id {id}")));
        };
        let type_name = row.get(1).and_then(Value::as_text).map(str::to_string);
        let version = row
            .get(2)
            .and_then(Value::as_integer)
            .and_then(|v| u32::try_from(v).ok());
        let (Some(type_name), Some(version)) = (type_name, version) else {
            // Possibly written by another process since startup.
            self.startup()?;
            return Err(StoreError::UnknownItemType {
                type_name: String::from("<uncataloged>"),
                version: 0,
                store_id: id,
            });
        };

        if type_name != T::TYPE_NAME {
            if self.current_schema(&type_name).is_some() {
                return Err(StoreError::item_not_found(format!(
                    "store id {id} is a {type_name}, not a {}",
                    T::TYPE_NAME
                )));
            }
            self.startup()?;
            return Err(StoreError::UnknownItemType {
                type_name,
                version,
                store_id: id,
            });
        }
        if version > schema.version() {
            return Err(StoreError::schema_mismatch(format!(
                "store id {id} is {type_name} v{version}, newer than v{}",
                schema.version()
            )));
        }
        if version < schema.version() {
            let upgraded = self.transact(|| {
                // The background upgrader may have reached this row first.
                let Some(version) = self.stored_version(id)? else {
                    return Ok(false);
                };
                if version >= schema.version() {
                    return Ok(false);
                }
                let key = TypeKey::new(type_name.clone(), version);
                let Some(old) = self.schema_for_key(&key) else {
                    return Err(StoreError::UnknownItemType {
                        type_name: type_name.clone(),
                        version,
                        store_id: id,
                    });
                };
                let old = Arc::clone(old.schema());
                self.upgrade_row(&old, id)
            })?;
            if upgraded {
                self.shared.stats.record_item_upgraded();
            }
        }

        let values = self
            .select_row(&schema, id)?
            .ok_or_else(|| StoreError::item_not_found(format!("{} row for store id {id}", schema.key())))?;
        self.loaded_item::<T>(id, values)
    }

    /// Schema version recorded for `id`, or `None` once it is gone.
    fn stored_version(&self, id: StoreId) -> StoreResult<Option<u32>> {
        let rows = self.run_query(&self.catalog_sql(TYPEOF_QUERY), &[id.into()])?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.get(2).and_then(Value::as_integer))
            .and_then(|v| u32::try_from(v).ok()))
    }

    /// Like [`get_item`](Self::get_item), but `None` instead of
    /// `ItemNotFound`.
    ///
    /// # Errors
    ///
    /// See [`get_item`](Self::get_item).
    pub fn try_get_item<T: Record>(&self, id: StoreId) -> StoreResult<Option<Item<T>>> {
        match self.get_item::<T>(id) {
            Ok(item) => Ok(Some(item)),
            Err(StoreError::ItemNotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// The live cached item for `id`, if any.
    pub(crate) fn cached<T: Record>(&self, id: StoreId) -> StoreResult<Option<Item<T>>> {
        match self.shared.cache.lock().get::<ItemInner<T>>(id) {
            Lookup::Hit(inner) => {
                self.shared.stats.record_cache_hit();
                Ok(Some(Item::from_inner(inner)))
            }
            Lookup::Miss => Ok(None),
            Lookup::WrongType(found) => Err(StoreError::item_not_found(format!(
                "store id {id} is a {found}, not a {}",
                T::TYPE_NAME
            ))),
        }
    }

    /// Turns a row of current-version values into the one item for `id`.
    pub(crate) fn loaded_item<T: Record>(&self, id: StoreId, values: Vec<Value>) -> StoreResult<Item<T>> {
        if let Some(item) = self.cached::<T>(id)? {
            return Ok(item);
        }
        let schema = self.ensure_registered::<T>()?;
        let item = Item::stored(self.clone(), id, schema, T::decode(&values)?);
        {
            let mut cache = self.shared.cache.lock();
            match cache.get::<ItemInner<T>>(id) {
                // Loaded concurrently by another thread.
                Lookup::Hit(inner) => return Ok(Item::from_inner(inner)),
                Lookup::WrongType(found) => {
                    return Err(StoreError::item_not_found(format!(
                        "store id {id} is a {found}, not a {}",
                        T::TYPE_NAME
                    )))
                }
                Lookup::Miss => cache.insert(id, item.inner(), T::TYPE_NAME),
            }
        }
        self.shared.stats.record_cache_miss();
        debug!(r#type = T::TYPE_NAME, store_id = %id, "cache miss");
        Ok(item)
    }

    pub(crate) fn cache_item<T: Record>(&self, item: &Item<T>) {
        self.shared
            .cache
            .lock()
            .insert(item.store_id(), item.inner(), T::TYPE_NAME);
    }

    pub(crate) fn uncache(&self, id: StoreId) {
        self.shared.cache.lock().remove(id);
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// A query over every item of `T`.
    #[must_use]
    pub fn query<T: Record>(&self) -> ItemQuery<T> {
        ItemQuery::new(self.clone())
    }

    /// A query over tuples of items, e.g. `store.join::<(Person, Pet)>()`.
    ///
    /// Needs a comparison mentioning every member type before it runs.
    #[must_use]
    pub fn join<S: RecordSet>(&self) -> JoinQuery<S> {
        JoinQuery::new(self.clone())
    }

    /// Number of items of `T`.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub fn count<T: Record>(&self) -> StoreResult<u64> {
        self.query::<T>().count()
    }

    /// The single item matching `comparison`.
    ///
    /// # Errors
    ///
    /// Returns `ItemNotFound` for no match and `DuplicateUniqueItem` for
    /// more than one.
    pub fn find_unique<T: Record>(&self, comparison: Comparison) -> StoreResult<Item<T>> {
        let description = comparison.to_string();
        self.find_unique_opt(comparison)?
            .ok_or_else(|| StoreError::item_not_found(format!("{} where {description}", T::TYPE_NAME)))
    }

    /// The single item matching `comparison`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateUniqueItem` for more than one match.
    pub fn find_unique_opt<T: Record>(&self, comparison: Comparison) -> StoreResult<Option<Item<T>>> {
        let description = comparison.to_string();
        let mut items = self.query::<T>().filter(comparison).limit(2).all()?;
        match items.len() {
            0 => Ok(None),
            1 => Ok(items.pop()),
            _ => Err(StoreError::DuplicateUniqueItem {
                description: format!("{} where {description}", T::TYPE_NAME),
                store_ids: items.iter().map(Item::store_id).collect(),
            }),
        }
    }

    /// Any one item matching `comparison`.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub fn find_first<T: Record>(&self, comparison: Comparison) -> StoreResult<Option<Item<T>>> {
        self.query::<T>().filter(comparison).first()
    }

    /// The first item whose attributes equal `matches`, created if absent.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for unknown attribute names.
    pub fn find_or_create<T: Record>(&self, matches: &[(&str, Value)]) -> StoreResult<Item<T>> {
        self.find_or_create_with(matches, |_| {})
    }

    /// Like [`find_or_create`](Self::find_or_create); `init` adjusts a newly
    /// created value before it is stored.
    ///
    /// The new value starts from the attribute defaults overlaid with
    /// `matches`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for unknown attribute names, or the decode
    /// error if the defaults do not make a valid `T`.
    pub fn find_or_create_with<T: Record>(
        &self,
        matches: &[(&str, Value)],
        init: impl FnOnce(&mut T),
    ) -> StoreResult<Item<T>> {
        let schema = self.ensure_registered::<T>()?;
        let mut row = schema.default_row();
        let mut comparisons = Vec::with_capacity(matches.len());
        for (name, value) in matches {
            let index = schema.attribute_index(name).ok_or_else(|| {
                StoreError::invalid_query(format!("{} has no attribute {name:?}", schema.key()))
            })?;
            row[index] = value.clone();
            comparisons.push(T::column(name).eq(value.clone()));
        }
        self.transact(|| {
            let mut query = self.query::<T>();
            if !comparisons.is_empty() {
                query = query.filter(Comparison::all(comparisons));
            }
            if let Some(found) = query.first()? {
                return Ok(found);
            }
            let mut value = T::decode(&row)?;
            init(&mut value);
            self.insert(value)
        })
    }

    // ------------------------------------------------------------------
    // Child stores
    // ------------------------------------------------------------------

    /// Attaches an on-disk child store to this store's connection.
    ///
    /// Afterwards the child runs every statement through this store's
    /// connection, under the returned database name, and shares this
    /// store's transactions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for in-memory or already attached
    /// children, or inside a transaction.
    pub fn attach_child(&self, child: &Store) -> StoreResult<String> {
        self.ensure_open()?;
        child.ensure_open()?;
        if Arc::ptr_eq(&self.shared, &child.shared) {
            return Err(StoreError::invalid_operation("a store cannot attach itself"));
        }
        let Some(child_dir) = child.shared.dir.as_ref() else {
            return Err(StoreError::invalid_operation("only on-disk stores can be attached"));
        };
        if child.shared.attached.load(Ordering::SeqCst) {
            return Err(StoreError::invalid_operation("store is already attached"));
        }

        let manager = self.transactions();
        let _lock = manager.enter();
        if manager.is_active() || child.in_transaction() {
            return Err(StoreError::invalid_operation(
                "cannot attach a child store inside a transaction",
            ));
        }
        let n = self.shared.children.fetch_add(1, Ordering::SeqCst) + 1;
        let name = format!("child_db_{n}");
        manager.backend().attach(&child_dir.database_path(), &name)?;

        *child.shared.transactions.write() = Arc::clone(&manager);
        *child.shared.database.write() = name.clone();
        child.shared.attached.store(true, Ordering::SeqCst);
        *child.shared.cache.lock() = ObjectCache::new(child.shared.config.cache_sweep_threshold);
        info!(child = %child_dir.path().display(), database = %name, "attached child store");
        Ok(name)
    }

    // ------------------------------------------------------------------
    // SQL plumbing
    // ------------------------------------------------------------------

    /// Substitutes the database name into catalog SQL.
    pub(crate) fn catalog_sql(&self, sql: &str) -> String {
        sql.replace(DATABASE, &self.database_name())
    }

    /// Qualified table name of a type.
    pub(crate) fn table_sql(&self, key: &TypeKey) -> String {
        format!("{}.{}", self.database_name(), key.table_name())
    }

    pub(crate) fn query_sql(&self, sql: &str, args: &[Value]) -> StoreResult<Vec<Row>> {
        let manager = self.transactions();
        let _lock = manager.enter();
        let rows = manager.backend().query(sql, args)?;
        self.shared.stats.record_query();
        Ok(rows)
    }

    pub(crate) fn execute_sql(&self, sql: &str, args: &[Value]) -> StoreResult<usize> {
        let manager = self.transactions();
        let _lock = manager.enter();
        let changed = manager.backend().execute(sql, args)?;
        self.shared.stats.record_statement();
        Ok(changed)
    }

    /// Runs an INSERT and returns the new row id.
    pub(crate) fn insert_sql(&self, sql: &str, args: &[Value]) -> StoreResult<i64> {
        let manager = self.transactions();
        let _lock = manager.enter();
        let mut backend = manager.backend();
        backend.execute(sql, args)?;
        self.shared.stats.record_statement();
        Ok(backend.last_insert_id())
    }

    /// Runs a user query, flushing touched items first so it sees them.
    pub(crate) fn run_query(&self, sql: &str, args: &[Value]) -> StoreResult<Vec<Row>> {
        self.ensure_open()?;
        let manager = self.transactions();
        let _lock = manager.enter();
        if manager.is_active() {
            self.checkpoint()?;
        }
        self.query_sql(sql, args)
    }

    pub(crate) fn insert_row(&self, schema: &Schema, id: StoreId, row: &[Value]) -> StoreResult<()> {
        let columns: Vec<String> = std::iter::once("oid".to_string())
            .chain(schema.attributes().iter().map(|a| quote(a.name())))
            .collect();
        let marks = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({marks})",
            self.table_sql(schema.key()),
            columns.join(", ")
        );
        let mut args = Vec::with_capacity(row.len() + 1);
        args.push(id.into());
        args.extend(row.iter().cloned());
        self.execute_sql(&sql, &args).map(|_| ())
    }

    pub(crate) fn update_row(&self, schema: &Schema, id: StoreId, row: &[Value]) -> StoreResult<()> {
        let assignments = schema
            .attributes()
            .iter()
            .map(|a| format!("{} = ?", quote(a.name())))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE oid = ?",
            self.table_sql(schema.key())
        );
        let mut args = row.to_vec();
        args.push(id.into());
        self.execute_sql(&sql, &args).map(|_| ())
    }

    /// Reads one row, decoded to the schema's kinds.
    pub(crate) fn select_row(&self, schema: &Schema, id: StoreId) -> StoreResult<Option<Vec<Value>>> {
        let columns = schema
            .attributes()
            .iter()
            .map(|a| quote(a.name()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {columns} FROM {} WHERE oid = ?",
            self.table_sql(schema.key())
        );
        Ok(self
            .query_sql(&sql, &[id.into()])?
            .into_iter()
            .next()
            .map(|row| schema.decode_row(row)))
    }

    pub(crate) fn delete_row(&self, key: &TypeKey, id: StoreId) -> StoreResult<()> {
        let sql = format!("DELETE FROM {} WHERE oid = ?", self.table_sql(key));
        self.execute_sql(&sql, &[id.into()]).map(|_| ())
    }

    pub(crate) fn delete_rows(&self, key: &TypeKey, ids: &[StoreId]) -> StoreResult<()> {
        let table = self.table_sql(key);
        for chunk in ids.chunks(IN_CHUNK) {
            let sql = format!("DELETE FROM {table} WHERE oid IN ({})", in_marks(chunk.len()));
            self.execute_sql(&sql, &id_values(chunk))?;
        }
        Ok(())
    }

    pub(crate) fn delete_object(&self, id: StoreId) -> StoreResult<()> {
        self.execute_sql(&self.catalog_sql(DELETE_OBJECT), &[id.into()])
            .map(|_| ())
    }

    pub(crate) fn delete_objects(&self, ids: &[StoreId]) -> StoreResult<()> {
        let objects = self.catalog_sql("*DATABASE*.itemdb_objects");
        for chunk in ids.chunks(IN_CHUNK) {
            let sql = format!("DELETE FROM {objects} WHERE oid IN ({})", in_marks(chunk.len()));
            self.execute_sql(&sql, &id_values(chunk))?;
        }
        Ok(())
    }

    /// Applies every reference policy pointing at `ids` of `type_name`.
    ///
    /// All `Disallow` references are checked before anything changes.
    pub(crate) fn apply_reference_policies(&self, type_name: &str, ids: &[StoreId]) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let referencing = self.referencing_attributes(type_name);
        if referencing.is_empty() {
            return Ok(());
        }
        let deleting: HashSet<StoreId> = ids.iter().copied().collect();

        let mut found = Vec::with_capacity(referencing.len());
        for reference in &referencing {
            if self.shared.catalog.lock().type_id(reference.schema.key()).is_none() {
                found.push(Vec::new());
                continue;
            }
            let attribute = &reference.schema.attributes()[reference.index];
            let sql_prefix = format!(
                "SELECT oid FROM {} WHERE {} IN (",
                self.table_sql(reference.schema.key()),
                quote(attribute.name())
            );
            let mut referrers = Vec::new();
            for chunk in ids.chunks(IN_CHUNK) {
                let sql = format!("{sql_prefix}{}) ORDER BY oid", in_marks(chunk.len()));
                for row in self.run_query(&sql, &id_values(chunk))? {
                    if let Some(id) = row.first().and_then(Value::as_integer).map(StoreId::new) {
                        if !deleting.contains(&id) {
                            referrers.push(id);
                        }
                    }
                }
            }
            if reference.policy == DeletePolicy::Disallow && !referrers.is_empty() {
                return Err(StoreError::deletion_disallowed(format!(
                    "{type_name} is referenced by {}.{} of store id {}",
                    reference.schema.type_name(),
                    attribute.name(),
                    referrers[0]
                )));
            }
            found.push(referrers);
        }

        for (reference, referrers) in referencing.iter().zip(found) {
            for id in referrers {
                match reference.policy {
                    DeletePolicy::Cascade => reference.ops.delete_item(self, id)?,
                    DeletePolicy::Nullify => reference.ops.nullify(self, id, reference.index)?,
                    DeletePolicy::Disallow => {}
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("location", &self.shared.location)
            .field("database", &*self.shared.database.read())
            .field("open", &self.is_open())
            .finish()
    }
}

/// Rolls the transaction back unless disarmed, including on panic.
struct RollbackOnDrop<'a> {
    store: &'a Store,
    manager: &'a TransactionManager,
    armed: bool,
}

impl RollbackOnDrop<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RollbackOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.store.roll_back(self.manager);
        }
    }
}

fn corrupt_if_not_database(err: BackendError) -> StoreError {
    match err {
        BackendError::NotADatabase(message) => StoreError::store_corrupt(message),
        other => other.into(),
    }
}

fn in_marks(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn id_values(ids: &[StoreId]) -> Vec<Value> {
    ids.iter().map(|id| Value::from(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Fields};

    #[derive(Debug, Clone, PartialEq)]
    struct Contact {
        name: String,
        number: String,
    }

    impl Record for Contact {
        const TYPE_NAME: &'static str = "contact";

        fn schema() -> Schema {
            Schema::new(Self::TYPE_NAME, Self::SCHEMA_VERSION)
                .attribute(Attribute::text("name").indexed())
                .attribute(Attribute::text("number").with_default(""))
        }

        fn encode(&self) -> Vec<Value> {
            vec![self.name.clone().into(), self.number.clone().into()]
        }

        fn decode(values: &[Value]) -> StoreResult<Self> {
            let mut fields = Fields::new(values);
            Ok(Self {
                name: fields.text()?,
                number: fields.text()?,
            })
        }
    }

    #[derive(Debug, Clone)]
    struct Owner {
        name: String,
    }

    impl Record for Owner {
        const TYPE_NAME: &'static str = "owner";

        fn schema() -> Schema {
            Schema::new(Self::TYPE_NAME, 1).attribute(Attribute::text("name"))
        }

        fn encode(&self) -> Vec<Value> {
            vec![self.name.clone().into()]
        }

        fn decode(values: &[Value]) -> StoreResult<Self> {
            Ok(Self {
                name: Fields::new(values).text()?,
            })
        }
    }

    #[derive(Debug, Clone)]
    struct Lease {
        owner: Option<StoreId>,
    }

    impl Record for Lease {
        const TYPE_NAME: &'static str = "lease";

        fn schema() -> Schema {
            Schema::new(Self::TYPE_NAME, 1).attribute(
                Attribute::reference("owner")
                    .target("owner")
                    .when_deleted(DeletePolicy::Disallow),
            )
        }

        fn encode(&self) -> Vec<Value> {
            vec![self.owner.into()]
        }

        fn decode(values: &[Value]) -> StoreResult<Self> {
            Ok(Self {
                owner: Fields::new(values).reference()?,
            })
        }
    }

    fn ann() -> Contact {
        Contact {
            name: "Ann".into(),
            number: "123".into(),
        }
    }

    #[test]
    fn insert_then_load() {
        let store = Store::open_in_memory().unwrap();
        let item = store.insert(ann()).unwrap();
        let id = item.store_id();
        drop(item);
        let loaded = store.get_item::<Contact>(id).unwrap();
        assert_eq!(loaded.get(), ann());
        assert_eq!(store.count::<Contact>().unwrap(), 1);
    }

    #[test]
    fn find_or_create_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let matches = [("name", Value::from("Ann")), ("number", Value::from("123"))];
        let first = store.find_or_create::<Contact>(&matches).unwrap();
        let second = store.find_or_create::<Contact>(&matches).unwrap();
        assert_eq!(first.store_id(), second.store_id());
        assert_eq!(
            store
                .query::<Contact>()
                .filter(Contact::column("name").eq("Ann"))
                .count()
                .unwrap(),
            1
        );
    }

    #[test]
    fn find_or_create_runs_init_once() {
        let store = Store::open_in_memory().unwrap();
        let created = store
            .find_or_create_with::<Contact>(&[("name", Value::from("Bo"))], |c| {
                c.number = "999".into();
            })
            .unwrap();
        assert_eq!(created.get().number, "999");
        let found = store
            .find_or_create_with::<Contact>(&[("name", Value::from("Bo"))], |c| {
                c.number = "000".into();
            })
            .unwrap();
        assert_eq!(found.get().number, "999");
    }

    #[test]
    fn find_unique_reports_duplicates() {
        let store = Store::open_in_memory().unwrap();
        store.insert(ann()).unwrap();
        store.insert(ann()).unwrap();
        let err = store
            .find_unique::<Contact>(Contact::column("name").eq("Ann"))
            .unwrap_err();
        match err {
            StoreError::DuplicateUniqueItem { store_ids, .. } => assert_eq!(store_ids.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        let err = store
            .find_unique::<Contact>(Contact::column("name").eq("Cy"))
            .unwrap_err();
        assert!(matches!(err, StoreError::ItemNotFound { .. }));
        assert!(store
            .find_unique_opt::<Contact>(Contact::column("name").eq("Cy"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn missing_ids_are_not_found() {
        let store = Store::open_in_memory().unwrap();
        let err = store.get_item::<Contact>(StoreId::new(42)).unwrap_err();
        assert!(matches!(err, StoreError::ItemNotFound { .. }));
        assert!(store.try_get_item::<Contact>(StoreId::new(42)).unwrap().is_none());
        assert!(store.get_item::<Contact>(StoreId::STORE).is_err());
    }

    #[test]
    fn other_types_are_not_found() {
        let store = Store::open_in_memory().unwrap();
        let owner = store.insert(Owner { name: "o".into() }).unwrap();
        let id = owner.store_id();
        drop(owner);
        let err = store.get_item::<Contact>(id).unwrap_err();
        assert!(matches!(err, StoreError::ItemNotFound { .. }));
    }

    #[test]
    fn batch_insert_fills_defaults() {
        let store = Store::open_in_memory().unwrap();
        let ids = store
            .batch_insert::<Contact>(&["name"], vec![vec![Value::from("a")], vec![Value::from("b")]])
            .unwrap();
        assert_eq!(ids.len(), 2);
        let item = store.get_item::<Contact>(ids[1]).unwrap();
        assert_eq!(item.get().name, "b");
        assert_eq!(item.get().number, "");
        let err = store
            .batch_insert::<Contact>(&["nope"], vec![vec![Value::Null]])
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery { .. }));
    }

    #[test]
    fn failing_transaction_rolls_back_everything() {
        let store = Store::open_in_memory().unwrap();
        let kept = store.insert(ann()).unwrap();
        let result: StoreResult<()> = store.transact(|| {
            kept.modify(|c| c.number = "555".into())?;
            store.insert(Contact {
                name: "Tmp".into(),
                number: "0".into(),
            })?;
            Err(StoreError::invalid_operation("abort"))
        });
        assert!(result.is_err());
        assert_eq!(kept.get().number, "123");
        assert_eq!(store.count::<Contact>().unwrap(), 1);
        assert_eq!(store.stats().rollbacks, 1);
    }

    #[test]
    fn nested_transactions_join() {
        let store = Store::open_in_memory().unwrap();
        store
            .transact(|| {
                store.transact(|| store.insert(ann()).map(|_| ()))?;
                assert!(store.in_transaction());
                Ok(())
            })
            .unwrap();
        assert!(!store.in_transaction());
        assert!(store.stats().commits >= 1);
    }

    #[test]
    fn queries_see_uncheckpointed_changes() {
        let store = Store::open_in_memory().unwrap();
        store
            .transact(|| {
                store.insert(ann())?;
                assert_eq!(store.count::<Contact>()?, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn disallowed_references_block_delete() {
        let store = Store::open_in_memory().unwrap();
        store.register::<Lease>().unwrap();
        let owner = store.insert(Owner { name: "o".into() }).unwrap();
        store
            .insert(Lease {
                owner: Some(owner.store_id()),
            })
            .unwrap();
        let err = owner.delete_from_store().unwrap_err();
        assert!(matches!(err, StoreError::DeletionDisallowed { .. }));
        assert!(!owner.is_deleted());
        assert_eq!(store.count::<Owner>().unwrap(), 1);
    }

    #[test]
    fn closed_store_rejects_operations() {
        let store = Store::open_in_memory().unwrap();
        store.close().unwrap();
        assert!(!store.is_open());
        assert!(matches!(store.insert(ann()), Err(StoreError::StoreClosed)));
        assert!(matches!(store.count::<Contact>(), Err(StoreError::StoreClosed)));
    }

    #[test]
    fn corrupt_database_file_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        drop(Store::open(&path).unwrap());
        std::fs::write(path.join("db.sqlite"), vec![0x42; 4096]).unwrap();
        let err = Store::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::StoreCorrupt { .. }));
    }

    #[test]
    fn reopen_keeps_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        let id = {
            let store = Store::open(&path).unwrap();
            store.insert(ann()).unwrap().store_id()
        };
        let store = Store::open(&path).unwrap();
        assert_eq!(store.get_item::<Contact>(id).unwrap().get(), ann());
    }

    #[test]
    fn attach_requires_disk_child() {
        let parent = Store::open_in_memory().unwrap();
        let child = Store::open_in_memory().unwrap();
        assert!(parent.attach_child(&child).is_err());
        assert!(parent.attach_child(&parent).is_err());
    }
}
