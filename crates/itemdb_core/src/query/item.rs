//! Queries returning items of one record type.

use super::attribute::AttributeQuery;
use super::base::{item_columns, QueryBase, QueryTarget};
use super::comparison::{Comparison, SortKey};
use super::paginate::Paginate;
use super::Query;
use crate::error::{StoreError, StoreResult};
use crate::item::Item;
use crate::schema::{Record, Schema};
use crate::store::Store;
use crate::types::StoreId;
use itemdb_storage::{Row, Value};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Items of record type `T`.
///
/// Each row resolves through the store's object cache, so a store id
/// yields the same [`Item`] as every other live handle to it.
pub struct ItemQuery<T: Record> {
    base: QueryBase,
    schema: Arc<Schema>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> Clone for ItemQuery<T> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            schema: Arc::clone(&self.schema),
            _marker: PhantomData,
        }
    }
}

impl<T: Record> ItemQuery<T> {
    pub(crate) fn new(store: Store) -> Self {
        Self {
            base: QueryBase::new(store, vec![QueryTarget::of::<T>()]),
            schema: Arc::new(T::schema()),
            _marker: PhantomData,
        }
    }

    /// Adds a comparison, ANDed with any existing one.
    #[must_use]
    pub fn filter(mut self, comparison: Comparison) -> Self {
        self.base.filter(comparison);
        self
    }

    /// Appends a sort key.
    #[must_use]
    pub fn sort(mut self, key: SortKey) -> Self {
        self.base.sort.push(key);
        self
    }

    /// Projects the query onto one attribute.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` if `T` has no such attribute.
    pub fn column(self, attribute: &str) -> StoreResult<AttributeQuery<T>> {
        let kind = self
            .schema
            .get_attribute(attribute)
            .map(|a| a.kind().clone())
            .ok_or_else(|| {
                StoreError::invalid_query(format!("{} has no attribute {attribute:?}", self.schema.key()))
            })?;
        Ok(AttributeQuery::new(self.base, attribute.to_string(), kind))
    }

    /// Streams the results page by page, ordered by the single sort key
    /// (store id if none).
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for a zero page size, several sort keys, a
    /// sort on another type, or a limit or offset on the query.
    pub fn paginate(self, page_size: usize) -> StoreResult<Paginate<T>> {
        Paginate::new(self, page_size)
    }

    /// The first result, if any.
    ///
    /// # Errors
    ///
    /// Returns compile, backend or decode errors.
    pub fn first(&self) -> StoreResult<Option<Item<T>>> {
        self.clone_query(Some(1)).iter().next().transpose()
    }

    /// Deletes every matching item.
    ///
    /// Reference policies are applied first. Types without custom deletion
    /// are removed with bulk statements; otherwise each item is deleted on
    /// its own so [`Record::deleted`] runs. Returns the number deleted.
    ///
    /// # Errors
    ///
    /// Returns `DeletionDisallowed` if a reference forbids deleting any of
    /// them; nothing is deleted then.
    pub fn delete_from_store(&self) -> StoreResult<u64> {
        let store = &self.base.store;
        store.transact(|| {
            if T::CUSTOM_DELETION {
                let items = self.all()?;
                for item in &items {
                    item.delete_from_store()?;
                }
                return Ok(items.len() as u64);
            }

            let (sql, args) = self.prepare()?;
            let ids: Vec<StoreId> = store
                .run_query(&format!("SELECT oid FROM ({sql})"), &args)?
                .into_iter()
                .filter_map(|row| row.first().and_then(Value::as_integer))
                .map(StoreId::new)
                .collect();
            if ids.is_empty() {
                return Ok(0);
            }
            store.apply_reference_policies(T::TYPE_NAME, &ids)?;
            for id in &ids {
                if let Some(item) = store.cached::<T>(*id)? {
                    item.mark_deleted()?;
                    store.uncache(*id);
                }
            }
            store.delete_rows(self.schema.key(), &ids)?;
            store.delete_objects(&ids)?;
            debug!(r#type = T::TYPE_NAME, items = ids.len(), "bulk delete");
            Ok(ids.len() as u64)
        })
    }
}

impl<T: Record> Query for ItemQuery<T> {
    type Output = Item<T>;

    fn base(&self) -> &QueryBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut QueryBase {
        &mut self.base
    }

    fn select_list(&self, db: &str) -> StoreResult<String> {
        Ok(item_columns(db, &self.schema))
    }

    fn massage(&self, row: Row) -> StoreResult<Item<T>> {
        let mut values = row.into_iter();
        take_item::<T>(&self.base.store, &self.schema, &mut values)
    }
}

impl<T: Record> std::fmt::Debug for ItemQuery<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemQuery").field("base", &self.base).finish()
    }
}

/// Decodes `oid, attributes...` of one item from the front of a row.
pub(crate) fn take_item<T: Record>(
    store: &Store,
    schema: &Schema,
    values: &mut impl Iterator<Item = Value>,
) -> StoreResult<Item<T>> {
    let id = values
        .next()
        .and_then(|v| v.as_integer())
        .map(StoreId::new)
        .ok_or_else(|| StoreError::decode(format!("{} row without store id", schema.key())))?;
    let raw: Vec<Value> = values.take(schema.attributes().len()).collect();
    if raw.len() != schema.attributes().len() {
        return Err(StoreError::decode(format!(
            "{} row has {} values for {} attributes",
            schema.key(),
            raw.len(),
            schema.attributes().len()
        )));
    }
    store.loaded_item::<T>(id, schema.decode_row(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Fields};

    #[derive(Debug, Clone, PartialEq)]
    struct Score {
        player: String,
        points: i64,
    }

    impl Record for Score {
        const TYPE_NAME: &'static str = "score";

        fn schema() -> Schema {
            Schema::new(Self::TYPE_NAME, 1)
                .attribute(Attribute::text("player"))
                .attribute(Attribute::integer("points").indexed())
        }

        fn encode(&self) -> Vec<Value> {
            vec![self.player.clone().into(), self.points.into()]
        }

        fn decode(values: &[Value]) -> StoreResult<Self> {
            let mut fields = Fields::new(values);
            Ok(Self {
                player: fields.text()?,
                points: fields.integer()?,
            })
        }
    }

    fn seeded() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .transact(|| {
                for (player, points) in [("a", 3), ("b", 1), ("c", 2), ("d", 2)] {
                    store.insert(Score {
                        player: player.into(),
                        points,
                    })?;
                }
                Ok(())
            })
            .unwrap();
        store
    }

    fn players(items: &[Item<Score>]) -> Vec<String> {
        items.iter().map(|i| i.get().player).collect()
    }

    #[test]
    fn filter_and_sort() {
        let store = seeded();
        let items = store
            .query::<Score>()
            .filter(Score::column("points").ge(2))
            .sort(Score::column("points").descending())
            .sort(Score::column("player").ascending())
            .all()
            .unwrap();
        assert_eq!(players(&items), ["a", "c", "d"]);
    }

    #[test]
    fn limit_offset_and_count() {
        let store = seeded();
        let query = store
            .query::<Score>()
            .sort(Score::column("player").ascending());
        assert_eq!(players(&query.clone().limit(2).all().unwrap()), ["a", "b"]);
        assert_eq!(players(&query.clone().offset(3).all().unwrap()), ["d"]);
        assert_eq!(query.clone().limit(2).offset(1).count().unwrap(), 2);
        assert_eq!(query.count().unwrap(), 4);
    }

    #[test]
    fn results_share_identity() {
        let store = seeded();
        let query = store.query::<Score>().filter(Score::column("player").eq("a"));
        let first = query.first().unwrap().unwrap();
        let again = query.first().unwrap().unwrap();
        assert_eq!(first, again);
        assert!(store.stats().cache_hits >= 1);
    }

    #[test]
    fn queries_are_lazy_and_restartable() {
        let store = seeded();
        let query = store.query::<Score>();
        let before = store.stats().queries;
        let iter = query.iter();
        assert_eq!(store.stats().queries, before);
        assert_eq!(iter.count(), 4);
        assert_eq!(query.all().unwrap().len(), 4);
    }

    #[test]
    fn unknown_column_is_rejected() {
        let store = seeded();
        let err = store.query::<Score>().column("nope").unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery { .. }));
    }

    #[test]
    fn foreign_sort_is_rejected() {
        let store = seeded();
        let other = crate::query::Column::attribute(crate::schema::TypeKey::new("other", 1), "x");
        let err = store.query::<Score>().sort(other.ascending()).all().unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery { .. }));
    }

    #[test]
    fn bulk_delete_marks_live_items() {
        let store = seeded();
        let low = store
            .find_unique::<Score>(Score::column("player").eq("b"))
            .unwrap();
        let deleted = store
            .query::<Score>()
            .filter(Score::column("points").lt(3))
            .delete_from_store()
            .unwrap();
        assert_eq!(deleted, 3);
        assert!(low.is_deleted());
        assert_eq!(store.count::<Score>().unwrap(), 1);
        assert!(store.try_get_item::<Score>(low.store_id()).unwrap().is_none());
    }

    #[test]
    fn explain_mentions_the_table() {
        let store = seeded();
        let plan = store
            .query::<Score>()
            .filter(Score::column("points").eq(2))
            .explain()
            .unwrap();
        assert!(plan.iter().any(|line| line.contains("item_score_v1")));
    }

    proptest::proptest! {
        #[test]
        fn prefix_matches_literally(
            names in proptest::collection::vec("[ab%_\\\\]{0,4}", 0..12),
            prefix in "[ab%_\\\\]{0,3}",
        ) {
            let store = Store::open_in_memory().unwrap();
            store
                .transact(|| {
                    for name in &names {
                        store.insert(Score { player: name.clone(), points: 0 })?;
                    }
                    Ok(())
                })
                .unwrap();
            let expected = names.iter().filter(|n| n.starts_with(prefix.as_str())).count();
            let found = store
                .query::<Score>()
                .filter(Score::column("player").starts_with(&prefix))
                .count()
                .unwrap();
            proptest::prop_assert_eq!(found, expected as u64);
        }
    }
}
