//! Persistent type catalog and table resolution.
//!
//! Three backend tables describe everything else in a database:
//! - `itemdb_types`: `(oid, typename, module, version)`, one row per
//!   `(type name, schema version)` ever stored
//! - `itemdb_objects`: `(oid, type_id)`, one row per item; its `oid` is the
//!   item's store id
//! - `itemdb_attributes`: per-type column metadata, used to check code
//!   against the database and to rebuild legacy schemas
//!
//! Item tables are created lazily on first use. Several processes may race
//! to create the same table; the loser re-reads the catalog and adopts the
//! winner's type id.

use crate::error::{StoreError, StoreResult};
use crate::schema::{Attribute, AttributeKind, RecordVersion, Schema, TypeKey};
use crate::store::Store;
use crate::types::TypeId;
use itemdb_storage::{BackendError, RelationalBackend, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Placeholder replaced with the database name (`main`, `child_db_1`, ...).
pub(crate) const DATABASE: &str = "*DATABASE*";

/// Catalog tables, created when a database is first initialized.
pub(crate) const BASE_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS *DATABASE*.itemdb_types (\
     oid INTEGER PRIMARY KEY AUTOINCREMENT, \
     typename TEXT NOT NULL, \
     module TEXT NOT NULL, \
     version INTEGER NOT NULL)",
    "CREATE UNIQUE INDEX IF NOT EXISTS *DATABASE*.itemdb_types_key \
     ON itemdb_types(typename, version)",
    "CREATE TABLE IF NOT EXISTS *DATABASE*.itemdb_objects (\
     oid INTEGER PRIMARY KEY AUTOINCREMENT, \
     type_id INTEGER NOT NULL)",
    "CREATE INDEX IF NOT EXISTS *DATABASE*.itemdb_objects_type \
     ON itemdb_objects(type_id)",
    "CREATE TABLE IF NOT EXISTS *DATABASE*.itemdb_attributes (\
     type_id INTEGER NOT NULL, \
     row_offset INTEGER NOT NULL, \
     indexed BOOLEAN NOT NULL, \
     sqltype TEXT NOT NULL, \
     allow_none BOOLEAN NOT NULL, \
     attribute TEXT NOT NULL, \
     docstring TEXT, \
     kind TEXT NOT NULL)",
];

const ALL_TYPES: &str = "SELECT oid, typename, version, module FROM *DATABASE*.itemdb_types";

const IDENTIFYING_SCHEMA: &str = "SELECT sqltype, attribute FROM *DATABASE*.itemdb_attributes \
     WHERE type_id = ? ORDER BY row_offset";

const SCHEMA_FOR_TYPE: &str =
    "SELECT attribute, kind, indexed, allow_none, docstring FROM *DATABASE*.itemdb_attributes \
     WHERE type_id = ? ORDER BY row_offset";

const CREATE_TYPE: &str =
    "INSERT INTO *DATABASE*.itemdb_types (typename, module, version) VALUES (?, ?, ?)";

const ADD_SCHEMA_ATTRIBUTE: &str = "INSERT INTO *DATABASE*.itemdb_attributes \
     (type_id, row_offset, indexed, sqltype, allow_none, attribute, docstring, kind) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

/// Allocates a store id.
pub(crate) const CREATE_OBJECT: &str = "INSERT INTO *DATABASE*.itemdb_objects (type_id) VALUES (?)";

/// Releases a store id.
pub(crate) const DELETE_OBJECT: &str = "DELETE FROM *DATABASE*.itemdb_objects WHERE oid = ?";

/// `(type_id, typename, version)` of one store id; the type columns are
/// null when the type row is missing.
pub(crate) const TYPEOF_QUERY: &str = "SELECT o.type_id, t.typename, t.version \
     FROM *DATABASE*.itemdb_objects AS o \
     LEFT JOIN *DATABASE*.itemdb_types AS t ON t.oid = o.type_id \
     WHERE o.oid = ?";

/// Moves a store id to another type.
pub(crate) const CHANGE_TYPE: &str = "UPDATE *DATABASE*.itemdb_objects SET type_id = ? WHERE oid = ?";

/// Creates the catalog tables in `database`.
pub(crate) fn initialize(backend: &mut dyn RelationalBackend, database: &str) -> StoreResult<()> {
    for statement in BASE_SCHEMA {
        backend.execute(&statement.replace(DATABASE, database), &[])?;
    }
    Ok(())
}

/// Double-quotes an identifier.
pub(crate) fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

/// In-memory view of the catalog tables.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    type_ids: HashMap<TypeKey, TypeId>,
    keys: HashMap<TypeId, TypeKey>,
    legacy: HashMap<TypeKey, Arc<Schema>>,
}

impl Catalog {
    pub(crate) fn type_id(&self, key: &TypeKey) -> Option<TypeId> {
        self.type_ids.get(key).copied()
    }

    pub(crate) fn key_for(&self, type_id: TypeId) -> Option<&TypeKey> {
        self.keys.get(&type_id)
    }

    pub(crate) fn legacy(&self, key: &TypeKey) -> Option<Arc<Schema>> {
        self.legacy.get(key).cloned()
    }

    fn insert(&mut self, key: TypeKey, type_id: TypeId) {
        self.keys.insert(type_id, key.clone());
        self.type_ids.insert(key, type_id);
    }

    /// Drops a type whose creation was rolled back.
    pub(crate) fn forget(&mut self, key: &TypeKey) {
        if let Some(type_id) = self.type_ids.remove(key) {
            self.keys.remove(&type_id);
        }
    }

    /// Number of known types.
    pub(crate) fn len(&self) -> usize {
        self.type_ids.len()
    }
}

/// What startup discovered about one stored type.
struct Discovered {
    key: TypeKey,
    type_id: TypeId,
    module: String,
}

impl Store {
    /// Returns the type id for a schema, creating its table on first use.
    pub(crate) fn type_id_for(&self, schema: &Arc<Schema>) -> StoreResult<TypeId> {
        if let Some(type_id) = self.shared.catalog.lock().type_id(schema.key()) {
            return Ok(type_id);
        }
        self.transact(|| self.maybe_create_table(schema))
    }

    fn maybe_create_table(&self, schema: &Arc<Schema>) -> StoreResult<TypeId> {
        let key = schema.key();
        if let Some(type_id) = self.shared.catalog.lock().type_id(key) {
            return Ok(type_id);
        }
        if schema.attributes().is_empty() {
            return Err(StoreError::EmptyRecordType {
                type_name: schema.type_name().to_string(),
            });
        }

        let table = self.table_sql(key);
        let columns = schema
            .attributes()
            .iter()
            .map(|a| format!("{} {}", quote(a.name()), a.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        let create = format!("CREATE TABLE {table} (oid INTEGER PRIMARY KEY, {columns})");
        match self.execute_sql(&create, &[]) {
            Ok(_) => {}
            Err(StoreError::Backend(BackendError::TableAlreadyExists { .. })) => {
                debug!(r#type = %key, "table created by another connection; re-reading catalog");
                self.startup()?;
                return self.shared.catalog.lock().type_id(key).ok_or_else(|| {
                    StoreError::store_corrupt(format!("table {table} exists but {key} is not cataloged"))
                });
            }
            Err(err) => return Err(err),
        }

        let type_id = TypeId::new(self.insert_sql(
            &self.catalog_sql(CREATE_TYPE),
            &[
                Value::from(schema.type_name()),
                Value::from(schema.module_path()),
                Value::from(schema.version()),
            ],
        )?);
        self.shared.catalog.lock().insert(key.clone(), type_id);
        let shared = Arc::clone(&self.shared);
        let forget = key.clone();
        self.transactions()
            .on_rollback(Box::new(move || shared.catalog.lock().forget(&forget)));

        self.create_indexes(schema)?;
        let add = self.catalog_sql(ADD_SCHEMA_ATTRIBUTE);
        for (offset, attr) in schema.attributes().iter().enumerate() {
            self.execute_sql(
                &add,
                &[
                    type_id.into(),
                    Value::Integer(offset as i64),
                    Value::Bool(attr.is_indexed()),
                    Value::from(attr.sql_type()),
                    Value::Bool(attr.allows_none()),
                    Value::from(attr.name()),
                    Value::from(attr.docstring()),
                    Value::from(attr.kind().kind_name()),
                ],
            )?;
        }
        self.shared.stats.record_table_created();
        debug!(r#type = %key, %type_id, "created item table");
        Ok(type_id)
    }

    fn create_indexes(&self, schema: &Schema) -> StoreResult<()> {
        let db = self.database_name();
        let table = schema.key().table_name();
        let single = schema
            .attributes()
            .iter()
            .filter(|a| a.is_indexed())
            .map(|a| vec![a.name().to_string()]);
        for columns in single.chain(schema.compound_indexes().iter().cloned()) {
            let name = format!(
                "itemdb_idx_{}_v{}_{}",
                schema.type_name(),
                schema.version(),
                columns.join("_")
            );
            let quoted = columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
            let sql = format!("CREATE INDEX {db}.{name} ON {table}({quoted})");
            match self.execute_sql(&sql, &[]) {
                Ok(_) | Err(StoreError::Backend(BackendError::IndexAlreadyExists { .. })) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Reads the catalog and reconciles it with the registered types.
    ///
    /// Verifies that every registered type the database already knows at
    /// the same version has the same columns, that the database holds no
    /// version newer than the code, and that every older version still
    /// holding rows has a complete upgrade path. Those versions are queued
    /// for upgrading.
    pub(crate) fn startup(&self) -> StoreResult<()> {
        let registry = self.shared.registry.read().clone();
        let discovered = self
            .query_sql(&self.catalog_sql(ALL_TYPES), &[])?
            .into_iter()
            .map(|row| {
                let mut row = row.into_iter();
                let type_id = row.next().and_then(|v| v.as_integer());
                let name = row.next().and_then(|v| v.as_text().map(str::to_string));
                let version = row.next().and_then(|v| v.as_integer());
                let module = row.next().and_then(|v| v.as_text().map(str::to_string));
                match (type_id, name, version, module) {
                    (Some(type_id), Some(name), Some(version), Some(module)) => Ok(Discovered {
                        key: TypeKey::new(name, u32::try_from(version).unwrap_or(0)),
                        type_id: TypeId::new(type_id),
                        module,
                    }),
                    _ => Err(StoreError::store_corrupt("malformed itemdb_types row")),
                }
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let mut catalog = Catalog::default();
        let mut old = Vec::new();
        for found in &discovered {
            catalog.insert(found.key.clone(), found.type_id);
            let Some(current) = registry.current(&found.key.name) else {
                continue;
            };
            let declared = current.schema.version();
            if found.key.version == declared {
                self.check_consistency(&current.schema, found.type_id)?;
            } else if found.key.version > declared {
                return Err(StoreError::schema_mismatch(format!(
                    "database holds {} but code declares version {declared}",
                    found.key
                )));
            } else {
                let schema = match registry.legacy(&found.key) {
                    Some(schema) => schema,
                    None => Arc::new(self.schema_from_catalog(found)?),
                };
                catalog.legacy.insert(found.key.clone(), Arc::clone(&schema));
                if self.table_has_rows(&found.key)? {
                    old.push(schema);
                }
            }
        }

        let mut missing = Vec::new();
        for schema in &old {
            let Some(current) = registry.current(schema.type_name()) else {
                continue;
            };
            missing.extend(registry.missing_upgrade_links(
                schema.type_name(),
                schema.version(),
                current.schema.version(),
                |key| catalog.legacy.contains_key(key),
            ));
        }
        missing.sort();
        missing.dedup();
        if !missing.is_empty() {
            return Err(StoreError::NoUpgradePathAvailable { missing });
        }

        old.sort_by(|a, b| a.key().cmp(b.key()));
        let known = catalog.len();
        *self.shared.catalog.lock() = catalog;
        if !old.is_empty() {
            info!(types = old.len(), "found item types awaiting upgrade");
        }
        debug!(types = known, "catalog loaded");
        self.enqueue_upgrades(old);
        Ok(())
    }

    fn check_consistency(&self, schema: &Schema, type_id: TypeId) -> StoreResult<()> {
        let stored = self
            .query_sql(&self.catalog_sql(IDENTIFYING_SCHEMA), &[type_id.into()])?
            .into_iter()
            .map(|row| match (row.first(), row.get(1)) {
                (Some(Value::Text(sql_type)), Some(Value::Text(name))) => {
                    Ok((sql_type.clone(), name.clone()))
                }
                _ => Err(StoreError::store_corrupt("malformed itemdb_attributes row")),
            })
            .collect::<StoreResult<Vec<_>>>()?;
        let declared = schema.identifying();
        if stored != declared {
            return Err(StoreError::schema_mismatch(format!(
                "{}: code declares {declared:?}, database has {stored:?}",
                schema.key()
            )));
        }
        Ok(())
    }

    fn schema_from_catalog(&self, found: &Discovered) -> StoreResult<Schema> {
        let rows = self.query_sql(&self.catalog_sql(SCHEMA_FOR_TYPE), &[found.type_id.into()])?;
        let mut schema = Schema::new(found.key.name.clone(), found.key.version).module(found.module.clone());
        for row in rows {
            let text = |idx: usize| row.get(idx).and_then(Value::as_text).map(str::to_string);
            let flag = |idx: usize| row.get(idx).and_then(Value::as_bool).unwrap_or(false);
            let name = text(0)
                .ok_or_else(|| StoreError::store_corrupt(format!("{}: unnamed attribute", found.key)))?;
            let kind = text(1)
                .as_deref()
                .and_then(AttributeKind::from_kind_name)
                .ok_or_else(|| {
                    StoreError::store_corrupt(format!("{}.{name}: unknown attribute kind", found.key))
                })?;
            schema = schema.attribute(Attribute::from_catalog(
                name,
                kind,
                flag(2),
                flag(3),
                text(4).unwrap_or_default(),
            ));
        }
        Ok(schema)
    }

    pub(crate) fn table_has_rows(&self, key: &TypeKey) -> StoreResult<bool> {
        let sql = format!("SELECT 1 FROM {} LIMIT 1", self.table_sql(key));
        Ok(!self.query_sql(&sql, &[])?.is_empty())
    }

    /// Resolves a key to the schema code or catalog knows it by.
    pub(crate) fn schema_for_key(&self, key: &TypeKey) -> Option<RecordVersion> {
        if let Some(current) = self.current_schema(&key.name) {
            if current.version() == key.version {
                return Some(RecordVersion::Current(current));
            }
        }
        if let Some(schema) = self.shared.catalog.lock().legacy(key) {
            return Some(RecordVersion::Legacy(schema));
        }
        self.shared
            .registry
            .read()
            .legacy(key)
            .map(RecordVersion::Legacy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Location};
    use crate::registry::Registry;
    use crate::schema::{Fields, Record};

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        title: String,
    }

    impl Record for Note {
        const TYPE_NAME: &'static str = "note";

        fn schema() -> Schema {
            Schema::new(Self::TYPE_NAME, Self::SCHEMA_VERSION)
                .attribute(Attribute::text("title").indexed())
        }

        fn encode(&self) -> Vec<Value> {
            vec![self.title.clone().into()]
        }

        fn decode(values: &[Value]) -> StoreResult<Self> {
            let mut fields = Fields::new(values);
            Ok(Self {
                title: fields.text()?,
            })
        }
    }

    #[test]
    fn type_ids_are_stable() {
        let store = Store::open_in_memory().unwrap();
        let schema = store.ensure_registered::<Note>().unwrap();
        let first = store.type_id_for(&schema).unwrap();
        let second = store.type_id_for(&schema).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.stats().tables_created, 1);
    }

    #[test]
    fn table_created_by_another_handle_is_adopted() {
        let dir = tempfile::tempdir().unwrap();
        let location = Location::Directory(dir.path().join("store"));
        let registry = || {
            let mut registry = Registry::new();
            registry.register::<Note>().unwrap();
            registry
        };
        let first = Store::open_with(location.clone(), Config::default(), registry()).unwrap();
        let second = Store::open_with(location, Config::default(), registry()).unwrap();

        let created = second
            .transact(|| second.insert(Note { title: "x".into() }))
            .unwrap();
        assert_eq!(second.stats().tables_created, 1);

        // The first handle still believes the table is missing.
        let schema = first.ensure_registered::<Note>().unwrap();
        assert!(first.shared.catalog.lock().type_id(schema.key()).is_none());
        let adopted = first.type_id_for(&schema).unwrap();
        assert_eq!(adopted, second.type_id_for(&schema).unwrap());
        assert_eq!(first.stats().tables_created, 0);
        assert_eq!(
            first.get_item::<Note>(created.store_id()).unwrap().get().title,
            "x"
        );
    }

    #[test]
    fn attribute_metadata_is_recorded() {
        let store = Store::open_in_memory().unwrap();
        let schema = store.ensure_registered::<Note>().unwrap();
        let type_id = store.type_id_for(&schema).unwrap();
        let rows = store
            .query_sql(&store.catalog_sql(SCHEMA_FOR_TYPE), &[type_id.into()])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], Value::from("title"));
        assert_eq!(rows[0][1], Value::from("text"));
    }

    #[test]
    fn empty_types_are_rejected_before_sql() {
        let store = Store::open_in_memory().unwrap();
        let schema = Arc::new(Schema::new("empty", 1));
        let err = store.type_id_for(&schema).unwrap_err();
        assert!(matches!(err, StoreError::EmptyRecordType { .. }));
        assert_eq!(store.stats().statements, 0);
    }

    #[test]
    fn creation_rolls_back_with_the_transaction() {
        let store = Store::open_in_memory().unwrap();
        let schema = store.ensure_registered::<Note>().unwrap();
        let result: StoreResult<()> = store.transact(|| {
            store.type_id_for(&schema)?;
            Err(StoreError::invalid_operation("abort"))
        });
        assert!(result.is_err());
        assert!(store.shared.catalog.lock().type_id(schema.key()).is_none());
        // The table can be created again.
        store.type_id_for(&schema).unwrap();
    }

    #[test]
    fn mismatched_columns_fail_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        {
            let store = Store::open(&path).unwrap();
            let schema = store.ensure_registered::<Note>().unwrap();
            store.type_id_for(&schema).unwrap();
        }

        #[derive(Debug, Clone)]
        struct Renamed;
        impl Record for Renamed {
            const TYPE_NAME: &'static str = "note";
            fn schema() -> Schema {
                Schema::new(Self::TYPE_NAME, 1).attribute(Attribute::text("heading"))
            }
            fn encode(&self) -> Vec<Value> {
                vec![Value::Null]
            }
            fn decode(_values: &[Value]) -> StoreResult<Self> {
                Ok(Self)
            }
        }

        let mut registry = Registry::new();
        registry.register::<Renamed>().unwrap();
        let err = Store::open_with(Location::Directory(path), Config::default(), registry)
            .unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch { .. }));
    }

    #[test]
    fn newer_database_version_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");

        #[derive(Debug, Clone)]
        struct NoteV2;
        impl Record for NoteV2 {
            const TYPE_NAME: &'static str = "note";
            const SCHEMA_VERSION: u32 = 2;
            fn schema() -> Schema {
                Schema::new(Self::TYPE_NAME, 2).attribute(Attribute::text("title"))
            }
            fn encode(&self) -> Vec<Value> {
                vec![Value::from("t")]
            }
            fn decode(_values: &[Value]) -> StoreResult<Self> {
                Ok(Self)
            }
        }

        {
            let store = Store::open(&path).unwrap();
            let schema = store.ensure_registered::<NoteV2>().unwrap();
            store.type_id_for(&schema).unwrap();
        }
        let mut registry = Registry::new();
        registry.register::<Note>().unwrap();
        let err = Store::open_with(Location::Directory(path), Config::default(), registry)
            .unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch { .. }));
    }

    #[test]
    fn quote_wraps_names() {
        assert_eq!(quote("name"), "\"name\"");
    }
}
