//! Streaming sorted results page by page.
//!
//! Each page is a separate query for `page_size + 1` rows sorted by
//! `(column, store id)`, anchored by a strict inequality on the last sort
//! value already yielded rather than by an offset. Rows inserted behind the
//! anchor are never seen twice and nothing after it is skipped.
//!
//! The extra row tells whether the page boundary splits a group of equal
//! sort values. If it does, the rows before the group are yielded and the
//! whole group is fetched in one unbounded query ordered by store id, so
//! ties never straddle two pages.

use super::comparison::{Column, Comparison, Direction, SortKey};
use super::item::ItemQuery;
use super::Query;
use crate::error::{StoreError, StoreResult};
use crate::item::Item;
use crate::schema::{Record, TypeKey};
use itemdb_storage::Value;
use std::collections::VecDeque;

/// Iterator over the pages of an [`ItemQuery`].
pub struct Paginate<T: Record> {
    query: ItemQuery<T>,
    column: Column,
    direction: Direction,
    page_size: usize,
    buffer: VecDeque<Item<T>>,
    anchor: Option<Value>,
    done: bool,
}

impl<T: Record> Paginate<T> {
    pub(crate) fn new(mut query: ItemQuery<T>, page_size: usize) -> StoreResult<Self> {
        if page_size == 0 {
            return Err(StoreError::invalid_query("page size must be positive"));
        }
        let base = query.base_mut();
        if base.limit.is_some() || base.offset.is_some() {
            return Err(StoreError::invalid_query(
                "paginated queries cannot have a limit or offset",
            ));
        }
        if base.sort.len() > 1 {
            return Err(StoreError::invalid_query(
                "pagination supports a single sort column",
            ));
        }
        let own_table = TypeKey::new(T::TYPE_NAME, T::SCHEMA_VERSION);
        let key = base
            .sort
            .pop()
            .unwrap_or_else(|| T::store_id_column().ascending());
        if key.column().table() != &own_table {
            return Err(StoreError::invalid_query(format!(
                "pagination must sort on a column of {own_table}"
            )));
        }
        Ok(Self {
            query,
            column: key.column().clone(),
            direction: key.direction(),
            page_size,
            buffer: VecDeque::new(),
            anchor: None,
            done: false,
        })
    }

    fn sort_value(&self, item: &Item<T>) -> StoreResult<Value> {
        match self.column.attribute_name() {
            Some(name) => item.value(name),
            None => Ok(item.store_id().into()),
        }
    }

    /// Rows strictly after `anchor` in sort order; `None` if there are none.
    fn after(&self, anchor: &Value) -> Option<Comparison> {
        match (self.direction, anchor) {
            (Direction::Ascending, Value::Null) => Some(self.column.not_null()),
            (Direction::Ascending, value) => Some(self.column.gt(value.clone())),
            // Nulls sort last descending.
            (Direction::Descending, Value::Null) => None,
            (Direction::Descending, value) => {
                Some(self.column.lt(value.clone()) | self.column.is_null())
            }
        }
    }

    fn ordered(&self, query: ItemQuery<T>) -> ItemQuery<T> {
        let query = query.sort(SortKey {
            column: self.column.clone(),
            direction: self.direction,
        });
        if self.column.is_store_id() {
            query
        } else {
            query.sort(T::store_id_column().ascending())
        }
    }

    fn fetch_page(&mut self) -> StoreResult<()> {
        let mut page = self.ordered(self.query.clone());
        if let Some(anchor) = &self.anchor {
            match self.after(anchor) {
                Some(comparison) => page = page.filter(comparison),
                None => {
                    self.done = true;
                    return Ok(());
                }
            }
        }
        // SQLite limits are signed.
        let fetch = u64::try_from(self.page_size)
            .unwrap_or(u64::MAX)
            .saturating_add(1)
            .min(i64::MAX as u64);
        let items = page.limit(fetch).all()?;
        let n = items.len();
        if n <= 1 {
            self.buffer.extend(items);
            self.done = true;
            return Ok(());
        }

        let values = items
            .iter()
            .map(|item| self.sort_value(item))
            .collect::<StoreResult<Vec<_>>>()?;
        let last = values[n - 1].clone();
        if values[n - 2] != last {
            // The extra row starts a new value; it opens the next page.
            self.anchor = Some(values[n - 2].clone());
            self.buffer.extend(items.into_iter().take(n - 1));
            return Ok(());
        }

        for (item, value) in items.into_iter().zip(&values) {
            if *value != last {
                self.buffer.push_back(item);
            }
        }
        let tied = match &last {
            Value::Null => self.column.is_null(),
            value => self.column.eq(value.clone()),
        };
        let group = self
            .query
            .clone()
            .filter(tied)
            .sort(T::store_id_column().ascending())
            .all()?;
        self.buffer.extend(group);
        self.anchor = Some(last);
        Ok(())
    }
}

impl<T: Record> Iterator for Paginate<T> {
    type Item = StoreResult<Item<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            if self.done {
                return None;
            }
            if let Err(err) = self.fetch_page() {
                self.done = true;
                return Some(Err(err));
            }
        }
    }
}

impl<T: Record> std::fmt::Debug for Paginate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paginate")
            .field("column", &self.column)
            .field("direction", &self.direction)
            .field("page_size", &self.page_size)
            .field("buffered", &self.buffer.len())
            .field("anchor", &self.anchor)
            .field("done", &self.done)
            .finish()
    }
}
