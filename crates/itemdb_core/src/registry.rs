//! Record type registry.
//!
//! A [`Registry`] names every record type a store may encounter:
//! - current types, the versions application code reads and writes
//! - legacy schemas, older versions kept only so rows can be upgraded
//! - upgraders, one per `(type name, from version)`
//!
//! ```rust,ignore
//! let mut registry = Registry::new();
//! registry.register::<Contact>()?;
//! registry.declare_legacy(contact_v1_schema())?;
//! registry.upgrade_with("contact", 1, |_store, old| {
//!     let mut values = old.values();
//!     values.insert("label".into(), Value::from("home"));
//!     Ok(Upgraded::Replace(values))
//! })?;
//! let store = Store::open_with(Location::InMemory, Config::default(), registry)?;
//! ```

use crate::error::{StoreError, StoreResult};
use crate::schema::{DeletePolicy, Record, Schema, TypeKey};
use crate::store::Store;
use crate::types::StoreId;
use crate::upgrade::{LegacyItem, UpgradeFn, Upgraded, Upgrader};
use itemdb_storage::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Type-erased operations on one record type.
pub(crate) trait TypeOps: Send + Sync {
    /// Registers the type with a store.
    fn register(&self, store: &Store) -> StoreResult<()>;

    /// Loads and deletes one item.
    fn delete_item(&self, store: &Store, id: StoreId) -> StoreResult<()>;

    /// Loads one item and sets one attribute to null.
    fn nullify(&self, store: &Store, id: StoreId, attribute: usize) -> StoreResult<()>;

    /// Whether bulk deletes must go item by item.
    fn custom_deletion(&self) -> bool;
}

struct TypedOps<T>(PhantomData<fn() -> T>);

impl<T: Record> TypeOps for TypedOps<T> {
    fn register(&self, store: &Store) -> StoreResult<()> {
        store.ensure_registered::<T>().map(|_| ())
    }

    fn delete_item(&self, store: &Store, id: StoreId) -> StoreResult<()> {
        store.get_item::<T>(id)?.delete_from_store()
    }

    fn nullify(&self, store: &Store, id: StoreId, attribute: usize) -> StoreResult<()> {
        store.get_item::<T>(id)?.set_value(attribute, Value::Null)
    }

    fn custom_deletion(&self) -> bool {
        T::CUSTOM_DELETION
    }
}

/// Type-erased handle to a record type.
pub(crate) fn ops_for<T: Record>() -> Arc<dyn TypeOps> {
    Arc::new(TypedOps::<T>(PhantomData))
}

/// The schema a record type registers under.
pub(crate) fn schema_for<T: Record>() -> StoreResult<Schema> {
    let mut schema = T::schema();
    if schema.key() != &TypeKey::new(T::TYPE_NAME, T::SCHEMA_VERSION) {
        return Err(StoreError::invalid_schema(format!(
            "{} declares schema {} but TYPE_NAME/SCHEMA_VERSION say {} v{}",
            std::any::type_name::<T>(),
            schema.key(),
            T::TYPE_NAME,
            T::SCHEMA_VERSION
        )));
    }
    if schema.module_path().is_empty() {
        schema = schema.module(std::any::type_name::<T>());
    }
    schema.validate()?;
    Ok(schema)
}

/// A registered current type.
#[derive(Clone)]
pub(crate) struct RegisteredType {
    pub(crate) schema: Arc<Schema>,
    pub(crate) ops: Arc<dyn TypeOps>,
}

/// A reference attribute that may point at items of some type.
pub(crate) struct ReferencingAttribute {
    pub(crate) schema: Arc<Schema>,
    pub(crate) ops: Arc<dyn TypeOps>,
    pub(crate) index: usize,
    pub(crate) policy: DeletePolicy,
}

/// Record types, legacy schemas and upgraders known to a store.
#[derive(Clone, Default)]
pub struct Registry {
    current: HashMap<String, RegisteredType>,
    legacy: HashMap<TypeKey, Arc<Schema>>,
    upgraders: HashMap<TypeKey, Arc<dyn Upgrader>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a current record type.
    ///
    /// Registering the same type twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` if the schema is malformed or another
    /// version of the type is already registered.
    pub fn register<T: Record>(&mut self) -> StoreResult<()> {
        self.add::<T>().map(|_| ())
    }

    /// Registers `T`; returns false if it was already registered.
    pub(crate) fn add<T: Record>(&mut self) -> StoreResult<bool> {
        let schema = schema_for::<T>()?;
        if let Some(existing) = self.current.get(T::TYPE_NAME) {
            if existing.schema.version() != schema.version() {
                return Err(StoreError::invalid_schema(format!(
                    "{} is already registered at version {}",
                    T::TYPE_NAME,
                    existing.schema.version()
                )));
            }
            if existing.schema.attributes() != schema.attributes() {
                return Err(StoreError::invalid_schema(format!(
                    "{} is already registered with different attributes",
                    schema.key()
                )));
            }
            return Ok(false);
        }
        if self.legacy.contains_key(schema.key()) {
            return Err(StoreError::invalid_schema(format!(
                "{} is already declared as a legacy schema",
                schema.key()
            )));
        }
        self.current.insert(
            T::TYPE_NAME.to_string(),
            RegisteredType {
                schema: Arc::new(schema),
                ops: ops_for::<T>(),
            },
        );
        Ok(true)
    }

    pub(crate) fn unregister(&mut self, type_name: &str) {
        self.current.remove(type_name);
    }

    /// Declares an older schema version of a type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` if the schema is malformed or collides with a
    /// registered current version.
    pub fn declare_legacy(&mut self, schema: Schema) -> StoreResult<()> {
        schema.validate()?;
        if let Some(current) = self.current.get(schema.type_name()) {
            if current.schema.version() <= schema.version() {
                return Err(StoreError::invalid_schema(format!(
                    "legacy {} is not older than current version {}",
                    schema.key(),
                    current.schema.version()
                )));
            }
        }
        self.legacy.insert(schema.key().clone(), Arc::new(schema));
        Ok(())
    }

    /// Registers an upgrader.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if one is already registered for the same
    /// type and version.
    pub fn register_upgrader(&mut self, upgrader: impl Upgrader + 'static) -> StoreResult<()> {
        let key = TypeKey::new(upgrader.type_name(), upgrader.from_version());
        if self.upgraders.contains_key(&key) {
            return Err(StoreError::invalid_operation(format!(
                "an upgrader from {key} is already registered"
            )));
        }
        self.upgraders.insert(key, Arc::new(upgrader));
        Ok(())
    }

    /// Registers a closure upgrading `type_name` from `from_version`.
    ///
    /// # Errors
    ///
    /// See [`register_upgrader`](Self::register_upgrader).
    pub fn upgrade_with<F>(
        &mut self,
        type_name: impl Into<String>,
        from_version: u32,
        upgrade: F,
    ) -> StoreResult<()>
    where
        F: Fn(&Store, LegacyItem) -> StoreResult<Upgraded> + Send + Sync + 'static,
    {
        self.register_upgrader(UpgradeFn::new(type_name, from_version, upgrade))
    }

    /// Returns true if a current type is registered under `type_name`.
    #[must_use]
    pub fn is_registered(&self, type_name: &str) -> bool {
        self.current.contains_key(type_name)
    }

    pub(crate) fn current(&self, type_name: &str) -> Option<&RegisteredType> {
        self.current.get(type_name)
    }

    pub(crate) fn current_types(&self) -> impl Iterator<Item = &RegisteredType> {
        self.current.values()
    }

    pub(crate) fn legacy(&self, key: &TypeKey) -> Option<Arc<Schema>> {
        self.legacy.get(key).cloned()
    }

    pub(crate) fn upgrader(&self, key: &TypeKey) -> Option<Arc<dyn Upgrader>> {
        self.upgraders.get(key).cloned()
    }

    /// Describes every gap in the chain from `from` up to `to`.
    ///
    /// `cataloged` reports legacy schemas the database itself can supply.
    pub(crate) fn missing_upgrade_links(
        &self,
        type_name: &str,
        from: u32,
        to: u32,
        cataloged: impl Fn(&TypeKey) -> bool,
    ) -> Vec<String> {
        let mut missing = Vec::new();
        for version in from..to {
            let key = TypeKey::new(type_name, version);
            if !self.upgraders.contains_key(&key) {
                missing.push(format!(
                    "No upgrader present for {type_name} from {version} to {}",
                    version + 1
                ));
            }
            if version > from && !self.legacy.contains_key(&key) && !cataloged(&key) {
                missing.push(format!(
                    "Type schema required for upgrade missing: {type_name} version {version}"
                ));
            }
        }
        missing
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut current: Vec<_> = self.current.values().map(|t| t.schema.key()).collect();
        current.sort();
        let mut legacy: Vec<_> = self.legacy.keys().collect();
        legacy.sort();
        let mut upgraders: Vec<_> = self.upgraders.keys().collect();
        upgraders.sort();
        f.debug_struct("Registry")
            .field("current", &current)
            .field("legacy", &legacy)
            .field("upgraders", &upgraders)
            .finish()
    }
}

impl Store {
    /// Registers a record type with an open store.
    ///
    /// Re-reads the catalog and applies the same checks as opening: column
    /// consistency, no newer stored version, and complete upgrade paths for
    /// older stored versions.
    ///
    /// # Errors
    ///
    /// Returns the first check that fails; the type stays unregistered.
    pub fn register<T: Record>(&self) -> StoreResult<()> {
        self.ensure_registered::<T>().map(|_| ())
    }

    /// Registers `T` if needed and returns its current schema.
    pub(crate) fn ensure_registered<T: Record>(&self) -> StoreResult<Arc<Schema>> {
        self.ensure_open()?;
        if let Some(found) = self.shared.registry.read().current(T::TYPE_NAME) {
            if found.schema.version() == T::SCHEMA_VERSION {
                return Ok(Arc::clone(&found.schema));
            }
        }
        let added = self.shared.registry.write().add::<T>()?;
        if added {
            if let Err(err) = self.startup() {
                self.shared.registry.write().unregister(T::TYPE_NAME);
                return Err(err);
            }
            self.start_upgrades();
        }
        self.current_schema(T::TYPE_NAME)
            .ok_or_else(|| StoreError::invalid_operation(format!("{} is not registered", T::TYPE_NAME)))
    }

    pub(crate) fn current_schema(&self, type_name: &str) -> Option<Arc<Schema>> {
        self.shared
            .registry
            .read()
            .current(type_name)
            .map(|t| Arc::clone(&t.schema))
    }

    /// Creates the table of a registered current type if needed.
    pub(crate) fn ensure_table(&self, key: &TypeKey) -> StoreResult<()> {
        match self.current_schema(&key.name) {
            Some(schema) if schema.key() == key => self.type_id_for(&schema).map(|_| ()),
            _ => Err(StoreError::invalid_query(format!("{key} is not a registered type"))),
        }
    }

    /// Every registered reference attribute that may point at `type_name`.
    pub(crate) fn referencing_attributes(&self, type_name: &str) -> Vec<ReferencingAttribute> {
        let registry = self.shared.registry.read();
        let mut found = Vec::new();
        for registered in registry.current_types() {
            for (index, attr) in registered.schema.attributes().iter().enumerate() {
                if let (true, Some(policy)) = (attr.may_reference(type_name), attr.delete_policy()) {
                    found.push(ReferencingAttribute {
                        schema: Arc::clone(&registered.schema),
                        ops: Arc::clone(&registered.ops),
                        index,
                        policy,
                    });
                }
            }
        }
        found.sort_by(|a, b| a.schema.key().cmp(b.schema.key()).then(a.index.cmp(&b.index)));
        found
    }

    pub(crate) fn upgrader_for(&self, key: &TypeKey) -> Option<Arc<dyn Upgrader>> {
        self.shared.registry.read().upgrader(key)
    }
}
