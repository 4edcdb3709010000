//! Schema upgrade engine.
//!
//! When a store opens over rows written by an older schema version, those
//! versions are queued. Rows are upgraded one at a time, oldest store id
//! first, each in its own transaction: the upgrader chain walks the row up
//! to the current version, the old row is deleted and the new row is
//! inserted under the same store id.
//!
//! A failed step rolls back only that row, which stays at its old version
//! for a retry.

use crate::catalog::{CHANGE_TYPE, DELETE_OBJECT};
use crate::config::UpgradeMode;
use crate::error::{StoreError, StoreResult};
use crate::schema::{AttributeValues, RecordVersion, Schema};
use crate::store::Store;
use crate::types::StoreId;
use itemdb_storage::Value;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// A row read through a legacy schema.
#[derive(Debug, Clone)]
pub struct LegacyItem {
    store_id: StoreId,
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl LegacyItem {
    pub(crate) fn new(store_id: StoreId, schema: Arc<Schema>, values: Vec<Value>) -> Self {
        Self {
            store_id,
            schema,
            values,
        }
    }

    /// Store id; the upgraded item keeps it.
    #[must_use]
    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    /// Type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.schema.type_name()
    }

    /// Schema version the values were written by.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.schema.version()
    }

    /// The legacy schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// One attribute's value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema
            .attribute_index(name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Every value by attribute name.
    #[must_use]
    pub fn values(&self) -> AttributeValues {
        self.schema.values_by_name(&self.values)
    }
}

/// Result of one upgrade step.
#[derive(Debug, Clone, PartialEq)]
pub enum Upgraded {
    /// The item continues at the next version with these values.
    ///
    /// Attributes left out take their defaults.
    Replace(AttributeValues),
    /// The item is deleted.
    Removed,
}

/// Upgrades items of one type from one version to the next.
pub trait Upgrader: Send + Sync {
    /// Type name.
    fn type_name(&self) -> &str;

    /// The version this upgrader reads.
    fn from_version(&self) -> u32;

    /// Produces the next version of `item`.
    ///
    /// # Errors
    ///
    /// Any error aborts the step; the row stays at its old version.
    fn upgrade(&self, store: &Store, item: LegacyItem) -> StoreResult<Upgraded>;
}

/// Closure adapter for [`Upgrader`].
pub struct UpgradeFn<F> {
    type_name: String,
    from_version: u32,
    upgrade: F,
}

impl<F> UpgradeFn<F>
where
    F: Fn(&Store, LegacyItem) -> StoreResult<Upgraded> + Send + Sync,
{
    /// Wraps a closure.
    pub fn new(type_name: impl Into<String>, from_version: u32, upgrade: F) -> Self {
        Self {
            type_name: type_name.into(),
            from_version,
            upgrade,
        }
    }
}

impl<F> Upgrader for UpgradeFn<F>
where
    F: Fn(&Store, LegacyItem) -> StoreResult<Upgraded> + Send + Sync,
{
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn from_version(&self) -> u32 {
        self.from_version
    }

    fn upgrade(&self, store: &Store, item: LegacyItem) -> StoreResult<Upgraded> {
        (self.upgrade)(store, item)
    }
}

/// Resolves once no old-version rows remain.
#[derive(Debug, Clone, Default)]
pub struct UpgradeCompletion {
    inner: Arc<(Mutex<Option<Result<(), String>>>, Condvar)>,
}

impl UpgradeCompletion {
    fn resolved() -> Self {
        let completion = Self::default();
        completion.resolve(Ok(()));
        completion
    }

    fn resolve(&self, outcome: Result<(), String>) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = Some(outcome);
        cvar.notify_all();
    }

    fn outcome(&self) -> Option<Result<(), String>> {
        self.inner.0.lock().clone()
    }

    /// Returns true once the upgrade sequence has finished or failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.inner.0.lock().is_some()
    }

    /// Blocks until the sequence finishes.
    ///
    /// # Errors
    ///
    /// Returns `UpgradeFailed` if the sequence aborted.
    pub fn wait(&self) -> StoreResult<()> {
        let (lock, cvar) = &*self.inner;
        let mut outcome = lock.lock();
        while outcome.is_none() {
            cvar.wait(&mut outcome);
        }
        to_result(outcome.clone())
    }

    /// Blocks until the sequence finishes or `timeout` passes.
    ///
    /// Returns `Ok(false)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns `UpgradeFailed` if the sequence aborted.
    pub fn wait_timeout(&self, timeout: Duration) -> StoreResult<bool> {
        let (lock, cvar) = &*self.inner;
        let mut outcome = lock.lock();
        if outcome.is_none() {
            cvar.wait_for(&mut outcome, timeout);
        }
        match outcome.clone() {
            None => Ok(false),
            resolved => to_result(resolved).map(|()| true),
        }
    }
}

fn to_result(outcome: Option<Result<(), String>>) -> StoreResult<()> {
    match outcome {
        Some(Err(message)) => Err(StoreError::upgrade_failed(message)),
        _ => Ok(()),
    }
}

/// Old versions still holding rows.
#[derive(Debug)]
pub(crate) struct UpgradeQueue {
    remaining: VecDeque<Arc<Schema>>,
    completion: UpgradeCompletion,
    running: bool,
}

impl Default for UpgradeQueue {
    fn default() -> Self {
        Self {
            remaining: VecDeque::new(),
            completion: UpgradeCompletion::resolved(),
            running: false,
        }
    }
}

impl UpgradeQueue {
    fn enqueue(&mut self, schemas: Vec<Arc<Schema>>) {
        for schema in schemas {
            if !self.remaining.iter().any(|s| s.key() == schema.key()) {
                self.remaining.push_back(schema);
            }
        }
        let resolved = matches!(self.completion.outcome(), Some(Ok(())));
        if !self.remaining.is_empty() && resolved {
            self.completion = UpgradeCompletion::default();
        }
    }
}

impl Store {
    /// Completion signal for the upgrade sequence.
    ///
    /// Already resolved if nothing needed upgrading.
    #[must_use]
    pub fn when_fully_upgraded(&self) -> UpgradeCompletion {
        self.shared.upgrades.lock().completion.clone()
    }

    /// Returns true while old-version rows remain queued.
    #[must_use]
    pub fn upgrades_pending(&self) -> bool {
        !self.shared.upgrades.lock().remaining.is_empty()
    }

    pub(crate) fn enqueue_upgrades(&self, schemas: Vec<Arc<Schema>>) {
        self.shared.upgrades.lock().enqueue(schemas);
    }

    /// Spawns the background upgrade thread if work is queued.
    pub(crate) fn start_upgrades(&self) {
        if self.shared.config.upgrade_mode != UpgradeMode::Background {
            return;
        }
        {
            let mut queue = self.shared.upgrades.lock();
            if queue.running || queue.remaining.is_empty() {
                return;
            }
            queue.running = true;
        }
        let store = self.clone();
        let spawned = std::thread::Builder::new()
            .name("itemdb-upgrade".into())
            .spawn(move || {
                // Failures are logged and recorded in the completion.
                let _ = store.run_upgrades();
                store.shared.upgrades.lock().running = false;
            });
        if let Err(err) = spawned {
            error!(error = %err, "could not start upgrade thread");
            let mut queue = self.shared.upgrades.lock();
            queue.running = false;
            queue.completion.resolve(Err(err.to_string()));
        }
    }

    /// Upgrades every queued row.
    ///
    /// # Errors
    ///
    /// Returns the first failing step; its row stays at the old version.
    pub fn run_upgrades(&self) -> StoreResult<()> {
        loop {
            match self.upgrade_step() {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(err) => {
                    self.shared
                        .upgrades
                        .lock()
                        .completion
                        .resolve(Err(err.to_string()));
                    return Err(err);
                }
            }
        }
    }

    /// Upgrades one row.
    ///
    /// Returns false once nothing remains, resolving
    /// [`when_fully_upgraded`](Self::when_fully_upgraded).
    ///
    /// # Errors
    ///
    /// Returns the error of the failing upgrader or statement.
    pub fn upgrade_step(&self) -> StoreResult<bool> {
        self.ensure_open()?;
        loop {
            let next = self.shared.upgrades.lock().remaining.front().cloned();
            let Some(schema) = next else {
                let queue = self.shared.upgrades.lock();
                if !matches!(queue.completion.outcome(), Some(Ok(()))) {
                    info!("all items fully upgraded");
                    queue.completion.resolve(Ok(()));
                }
                return Ok(false);
            };
            let sql = format!(
                "SELECT oid FROM {} ORDER BY oid LIMIT 1",
                self.table_sql(schema.key())
            );
            // The oldest row is chosen under the writer lock.
            let step = self.transact(|| {
                let oldest = self
                    .query_sql(&sql, &[])?
                    .first()
                    .and_then(|row| row.first())
                    .and_then(Value::as_integer);
                let Some(id) = oldest else {
                    return Ok(None);
                };
                let store_id = StoreId::new(id);
                match self.upgrade_row(&schema, store_id) {
                    Ok(upgraded) => Ok(Some(upgraded)),
                    Err(err) => {
                        error!(r#type = %schema.key(), %store_id, error = %err, "upgrade step failed");
                        Err(err)
                    }
                }
            })?;
            match step {
                Some(upgraded) => {
                    if upgraded {
                        self.shared.stats.record_item_upgraded();
                    }
                    return Ok(true);
                }
                None => {
                    info!(r#type = %schema.key(), "finished upgrading");
                    self.shared.upgrades.lock().remaining.pop_front();
                }
            }
        }
    }

    /// Walks one row through the upgrader chain to the current version.
    ///
    /// Returns false if the old-version row is already gone, upgraded or
    /// removed by an earlier step. Must run inside a transaction.
    pub(crate) fn upgrade_row(&self, schema: &Arc<Schema>, store_id: StoreId) -> StoreResult<bool> {
        let Some(values) = self.select_row(schema, store_id)? else {
            debug!(r#type = %schema.key(), %store_id, "row already upgraded");
            return Ok(false);
        };
        let mut item = LegacyItem::new(store_id, Arc::clone(schema), values);
        loop {
            let key = item.schema.key().clone();
            let upgrader = self.upgrader_for(&key).ok_or_else(|| {
                StoreError::upgrade_failed(format!("no upgrader for {key}"))
            })?;
            let next_key = crate::schema::TypeKey::new(key.name.clone(), key.version + 1);
            match upgrader.upgrade(self, item)? {
                Upgraded::Removed => {
                    self.delete_row(schema.key(), store_id)?;
                    self.execute_sql(&self.catalog_sql(DELETE_OBJECT), &[store_id.into()])?;
                    return Ok(true);
                }
                Upgraded::Replace(values) => match self.schema_for_key(&next_key) {
                    Some(RecordVersion::Current(current)) => {
                        let row = current.row_from_values(values)?;
                        current.check_row(&row)?;
                        let type_id = self.type_id_for(&current)?;
                        self.delete_row(schema.key(), store_id)?;
                        self.insert_row(&current, store_id, &row)?;
                        self.execute_sql(
                            &self.catalog_sql(CHANGE_TYPE),
                            &[type_id.into(), store_id.into()],
                        )?;
                        return Ok(true);
                    }
                    Some(RecordVersion::Legacy(next)) => {
                        let row = next.row_from_values(values)?;
                        next.check_row(&row)?;
                        item = LegacyItem::new(store_id, next, row);
                    }
                    None => {
                        return Err(StoreError::upgrade_failed(format!(
                            "no schema for {next_key}"
                        )))
                    }
                },
            }
        }
    }
}
