//! Items: record values bound to a store.

use crate::error::{StoreError, StoreResult};
use crate::schema::{Record, Schema};
use crate::store::Store;
use crate::transaction::{ItemKey, Tracked};
use crate::types::StoreId;
use itemdb_storage::Value;
use parking_lot::Mutex;
use std::sync::Arc;

/// Where an item stands relative to its backing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    /// Has a store id; its row is written at the next checkpoint.
    Pending,
    /// Backed by a row.
    Stored,
    /// Deleted from the store.
    Deleted,
    /// Never committed; its transaction rolled back.
    Detached,
}

struct ItemState<T> {
    current: T,
    committed: T,
    status: ItemStatus,
    committed_status: ItemStatus,
    dirty: bool,
}

pub(crate) struct ItemInner<T: Record> {
    store: Store,
    store_id: StoreId,
    schema: Arc<Schema>,
    state: Mutex<ItemState<T>>,
}

/// A record value bound to one store and store id.
///
/// `Item` is a cheap handle: clones share the same underlying item, and the
/// store's cache hands out the same item for the same store id while any
/// handle is alive. Equality is identity.
///
/// Mutations go through [`set`](Self::set)/[`modify`](Self::modify) so they
/// join the ambient transaction (or run in their own).
pub struct Item<T: Record> {
    inner: Arc<ItemInner<T>>,
}

impl<T: Record> Clone for Item<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Record> Item<T> {
    fn with_state(
        store: Store,
        store_id: StoreId,
        schema: Arc<Schema>,
        value: T,
        status: ItemStatus,
        committed_status: ItemStatus,
    ) -> Self {
        Self {
            inner: Arc::new(ItemInner {
                store,
                store_id,
                schema,
                state: Mutex::new(ItemState {
                    committed: value.clone(),
                    current: value,
                    status,
                    committed_status,
                    dirty: false,
                }),
            }),
        }
    }

    /// A new item whose row is not yet written.
    pub(crate) fn pending(store: Store, store_id: StoreId, schema: Arc<Schema>, value: T) -> Self {
        Self::with_state(
            store,
            store_id,
            schema,
            value,
            ItemStatus::Pending,
            ItemStatus::Detached,
        )
    }

    /// An item loaded from its row.
    pub(crate) fn stored(store: Store, store_id: StoreId, schema: Arc<Schema>, value: T) -> Self {
        Self::with_state(
            store,
            store_id,
            schema,
            value,
            ItemStatus::Stored,
            ItemStatus::Stored,
        )
    }

    pub(crate) fn from_inner(inner: Arc<ItemInner<T>>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<ItemInner<T>> {
        &self.inner
    }

    /// Store id.
    #[must_use]
    pub fn store_id(&self) -> StoreId {
        self.inner.store_id
    }

    /// Owning store.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Schema the item is stored under.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Copy of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.state.lock().current.clone()
    }

    /// Reads the current value in place.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.state.lock().current)
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ItemStatus {
        self.inner.state.lock().status
    }

    /// Returns true once deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.status() == ItemStatus::Deleted
    }

    /// Current value of one attribute.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for unknown attribute names.
    pub fn value(&self, attribute: &str) -> StoreResult<Value> {
        let index = self.inner.schema.attribute_index(attribute).ok_or_else(|| {
            StoreError::invalid_query(format!(
                "{} has no attribute {attribute:?}",
                self.inner.schema.key()
            ))
        })?;
        Ok(self
            .read(|value| value.encode())
            .into_iter()
            .nth(index)
            .unwrap_or(Value::Null))
    }

    fn key(&self) -> ItemKey {
        (self.inner.store.serial(), self.inner.store_id)
    }

    fn track(&self) -> StoreResult<()> {
        self.inner.store.changed(self.key(), Arc::new(self.clone()))
    }

    fn ensure_live(&self) -> StoreResult<()> {
        match self.status() {
            ItemStatus::Pending | ItemStatus::Stored => Ok(()),
            status => Err(StoreError::invalid_operation(format!(
                "{} {} is {status:?}",
                self.inner.schema.type_name(),
                self.inner.store_id
            ))),
        }
    }

    /// Replaces the value.
    ///
    /// Runs in the ambient transaction, or in its own.
    ///
    /// # Errors
    ///
    /// Returns `ChangeRejected` during checkpoints and commit hooks,
    /// `InvalidOperation` for deleted or detached items, and `InvalidValue`
    /// when the new value does not fit the schema.
    pub fn set(&self, value: T) -> StoreResult<()> {
        self.modify(move |current| *current = value)
    }

    /// Mutates the value in place.
    ///
    /// # Errors
    ///
    /// See [`set`](Self::set).
    pub fn modify(&self, f: impl FnOnce(&mut T)) -> StoreResult<()> {
        self.inner.store.transact(|| {
            self.ensure_live()?;
            self.track()?;
            let mut state = self.inner.state.lock();
            f(&mut state.current);
            state.dirty = true;
            Ok(())
        })
    }

    /// Replaces one attribute by position, going through `encode`/`decode`.
    pub(crate) fn set_value(&self, index: usize, value: Value) -> StoreResult<()> {
        let mut values = self.read(|current| current.encode());
        let slot = values.get_mut(index).ok_or_else(|| {
            StoreError::invalid_query(format!(
                "{} has no attribute at position {index}",
                self.inner.schema.key()
            ))
        })?;
        *slot = value;
        self.set(T::decode(&values)?)
    }

    /// Deletes the item.
    ///
    /// Applies the delete policy of every reference to it: `Disallow` fails
    /// the delete, `Cascade` deletes the referencing item, `Nullify` clears
    /// the reference. Deleting an already deleted item is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DeletionDisallowed` if a reference forbids it; nothing is
    /// deleted in that case.
    pub fn delete_from_store(&self) -> StoreResult<()> {
        let store = &self.inner.store;
        store.transact(|| {
            let before = self.status();
            if matches!(before, ItemStatus::Deleted | ItemStatus::Detached) {
                return Ok(());
            }
            self.track()?;
            self.inner.state.lock().status = ItemStatus::Deleted;
            let removed = (|| -> StoreResult<()> {
                store.apply_reference_policies(self.inner.schema.type_name(), &[self.inner.store_id])?;
                if before == ItemStatus::Stored {
                    store.delete_row(self.inner.schema.key(), self.inner.store_id)?;
                }
                store.delete_object(self.inner.store_id)
            })();
            if let Err(err) = removed {
                self.inner.state.lock().status = before;
                return Err(err);
            }
            store.uncache(self.inner.store_id);
            T::deleted(self);
            Ok(())
        })
    }

    /// Marks a cached item deleted after a bulk delete removed its row.
    pub(crate) fn mark_deleted(&self) -> StoreResult<()> {
        self.track()?;
        self.inner.state.lock().status = ItemStatus::Deleted;
        Ok(())
    }
}

impl<T: Record> Tracked for Item<T> {
    fn checkpoint(&self) -> StoreResult<()> {
        let write = {
            let state = self.inner.state.lock();
            match state.status {
                ItemStatus::Pending => Some((true, state.current.encode())),
                ItemStatus::Stored if state.dirty => Some((false, state.current.encode())),
                _ => None,
            }
        };
        let Some((insert, row)) = write else {
            return Ok(());
        };
        let schema = &self.inner.schema;
        schema.check_row(&row)?;
        if insert {
            self.inner.store.insert_row(schema, self.inner.store_id, &row)?;
        } else {
            self.inner.store.update_row(schema, self.inner.store_id, &row)?;
        }
        let mut state = self.inner.state.lock();
        if insert {
            state.status = ItemStatus::Stored;
        }
        state.dirty = false;
        Ok(())
    }

    fn committed(&self) {
        {
            let mut state = self.inner.state.lock();
            state.committed = state.current.clone();
            state.committed_status = state.status;
            state.dirty = false;
        }
        T::committed(self);
    }

    fn reverted(&self) {
        let (before, after) = {
            let mut state = self.inner.state.lock();
            state.current = state.committed.clone();
            let before = state.status;
            state.status = state.committed_status;
            state.dirty = false;
            (before, state.status)
        };
        match after {
            ItemStatus::Detached | ItemStatus::Deleted => self.inner.store.uncache(self.inner.store_id),
            ItemStatus::Stored if before != ItemStatus::Stored => self.inner.store.cache_item(self),
            _ => {}
        }
        T::reverted(self);
    }
}

impl<T: Record> PartialEq for Item<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Record> Eq for Item<T> {}

impl<T: Record + std::fmt::Debug> std::fmt::Debug for Item<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Item")
            .field("type", &self.inner.schema.key())
            .field("store_id", &self.inner.store_id)
            .field("status", &state.status)
            .field("value", &state.current)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Fields};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COMMITS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        name: String,
        count: i64,
    }

    impl Record for Counter {
        const TYPE_NAME: &'static str = "counter";

        fn schema() -> Schema {
            Schema::new(Self::TYPE_NAME, Self::SCHEMA_VERSION)
                .attribute(Attribute::text("name"))
                .attribute(Attribute::integer("count"))
        }

        fn encode(&self) -> Vec<Value> {
            vec![self.name.clone().into(), self.count.into()]
        }

        fn decode(values: &[Value]) -> StoreResult<Self> {
            let mut fields = Fields::new(values);
            Ok(Self {
                name: fields.text()?,
                count: fields.integer()?,
            })
        }

        fn committed(_item: &Item<Self>) {
            COMMITS.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter(name: &str) -> Counter {
        Counter {
            name: name.into(),
            count: 0,
        }
    }

    #[test]
    fn insert_writes_row_on_commit() {
        let store = Store::open_in_memory().unwrap();
        let item = store.insert(counter("a")).unwrap();
        assert_eq!(item.status(), ItemStatus::Stored);
        assert_eq!(item.value("name").unwrap(), Value::from("a"));
        assert!(COMMITS.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn modify_updates_row() {
        let store = Store::open_in_memory().unwrap();
        let item = store.insert(counter("a")).unwrap();
        let id = item.store_id();
        item.modify(|c| c.count += 5).unwrap();
        drop(item);
        let loaded = store.get_item::<Counter>(id).unwrap();
        assert_eq!(loaded.get().count, 5);
    }

    #[test]
    fn rollback_restores_committed_value() {
        let store = Store::open_in_memory().unwrap();
        let item = store.insert(counter("a")).unwrap();
        let result: StoreResult<()> = store.transact(|| {
            item.modify(|c| c.count = 99)?;
            store.checkpoint()?;
            Err(StoreError::invalid_operation("abort"))
        });
        assert!(result.is_err());
        assert_eq!(item.get().count, 0);
        assert_eq!(item.status(), ItemStatus::Stored);
    }

    #[test]
    fn rolled_back_insert_detaches() {
        let store = Store::open_in_memory().unwrap();
        let mut inserted = None;
        let result: StoreResult<()> = store.transact(|| {
            inserted = Some(store.insert(counter("temp"))?);
            Err(StoreError::invalid_operation("abort"))
        });
        assert!(result.is_err());
        let item = inserted.unwrap();
        assert_eq!(item.status(), ItemStatus::Detached);
        assert!(item.set(counter("again")).is_err());
        assert!(store.get_item::<Counter>(item.store_id()).is_err());
    }

    #[test]
    fn delete_then_rollback_restores() {
        let store = Store::open_in_memory().unwrap();
        let item = store.insert(counter("keep")).unwrap();
        let id = item.store_id();
        let result: StoreResult<()> = store.transact(|| {
            item.delete_from_store()?;
            assert!(item.is_deleted());
            Err(StoreError::invalid_operation("abort"))
        });
        assert!(result.is_err());
        assert_eq!(item.status(), ItemStatus::Stored);
        let again = store.get_item::<Counter>(id).unwrap();
        assert_eq!(again, item);
    }

    #[test]
    fn delete_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let item = store.insert(counter("gone")).unwrap();
        item.delete_from_store().unwrap();
        item.delete_from_store().unwrap();
        let err = store.get_item::<Counter>(item.store_id()).unwrap_err();
        assert!(matches!(err, StoreError::ItemNotFound { .. }));
    }

    #[test]
    fn invalid_values_are_not_applied() {
        #[derive(Debug, Clone)]
        struct Strict {
            name: Option<String>,
        }
        impl Record for Strict {
            const TYPE_NAME: &'static str = "strict";
            fn schema() -> Schema {
                Schema::new(Self::TYPE_NAME, 1).attribute(Attribute::text("name").not_null())
            }
            fn encode(&self) -> Vec<Value> {
                vec![self.name.clone().into()]
            }
            fn decode(values: &[Value]) -> StoreResult<Self> {
                Ok(Self {
                    name: Fields::new(values).opt_text()?,
                })
            }
        }

        let store = Store::open_in_memory().unwrap();
        let item = store
            .insert(Strict {
                name: Some("x".into()),
            })
            .unwrap();
        let err = item.set(Strict { name: None }).unwrap_err();
        assert!(matches!(err, StoreError::InvalidValue { .. }));
        assert_eq!(item.get().name.as_deref(), Some("x"));
    }

    #[test]
    fn equality_is_identity() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert(counter("a")).unwrap();
        let b = store.insert(counter("a")).unwrap();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
