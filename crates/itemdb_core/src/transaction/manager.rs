//! Transaction manager.

use super::state::{ItemKey, Tracked, TxnState, UndoAction};
use crate::error::{StoreError, StoreResult};
use itemdb_storage::RelationalBackend;
use parking_lot::{Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Owns the backend connection and the active transaction.
///
/// One manager is shared by a store and every child store attached to it,
/// so they all run in the same backend transaction.
///
/// ## Locking
///
/// - `lock` is held by whichever thread is inside a transaction (or a
///   statement outside one); it is reentrant so nested `transact` calls
///   join the outer transaction
/// - `backend` and `state` are held only for the duration of one call and
///   never across item hooks
pub(crate) struct TransactionManager {
    backend: Mutex<Box<dyn RelationalBackend>>,
    lock: ReentrantMutex<()>,
    state: Mutex<Option<TxnState>>,
    reject_changes: AtomicUsize,
}

impl TransactionManager {
    /// Wraps a backend connection.
    pub(crate) fn new(backend: Box<dyn RelationalBackend>) -> Self {
        Self {
            backend: Mutex::new(backend),
            lock: ReentrantMutex::new(()),
            state: Mutex::new(None),
            reject_changes: AtomicUsize::new(0),
        }
    }

    /// Serializes this thread against other threads using the connection.
    pub(crate) fn enter(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// The backend connection, for a single statement.
    pub(crate) fn backend(&self) -> MutexGuard<'_, Box<dyn RelationalBackend>> {
        self.backend.lock()
    }

    /// Returns true while a transaction is open.
    pub(crate) fn is_active(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Opens a backend transaction with the write lock held.
    pub(crate) fn begin(&self) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.is_some() {
            return Err(StoreError::invalid_operation("transaction already active"));
        }
        self.backend.lock().begin_immediate()?;
        *state = Some(TxnState::default());
        debug!("transaction started");
        Ok(())
    }

    /// Commits the backend transaction.
    ///
    /// Returns the items changed during the transaction. On failure the
    /// transaction stays open for [`rollback`](Self::rollback).
    pub(crate) fn commit(&self) -> StoreResult<Vec<Arc<dyn Tracked>>> {
        let mut state = self.state.lock();
        if state.is_none() {
            return Err(StoreError::invalid_operation("no active transaction"));
        }
        self.backend.lock().commit()?;
        let finished = state.take().unwrap_or_default();
        debug!(items = finished.transaction.len(), "transaction committed");
        Ok(finished.transaction.into_values().collect())
    }

    /// Rolls back the backend transaction and hands back its state.
    ///
    /// Backend failures are logged; the in-memory state is discarded either
    /// way.
    pub(crate) fn rollback(&self) -> TxnState {
        let finished = self.state.lock().take().unwrap_or_default();
        let mut backend = self.backend.lock();
        if backend.in_transaction() {
            if let Err(err) = backend.rollback() {
                warn!(error = %err, "rollback failed");
            }
        }
        debug!(items = finished.transaction.len(), "transaction rolled back");
        finished
    }

    /// Records a mutated item.
    pub(crate) fn changed(&self, key: ItemKey, item: Arc<dyn Tracked>) -> StoreResult<()> {
        if self.is_rejecting() {
            return Err(StoreError::ChangeRejected);
        }
        match self.state.lock().as_mut() {
            Some(state) => {
                state.changed(key, item);
                Ok(())
            }
            None => Err(StoreError::invalid_operation(
                "item changes require an active transaction",
            )),
        }
    }

    /// Removes and returns the touched set.
    pub(crate) fn take_touched(&self) -> BTreeMap<ItemKey, Arc<dyn Tracked>> {
        self.state
            .lock()
            .as_mut()
            .map(|state| std::mem::take(&mut state.touched))
            .unwrap_or_default()
    }

    /// Puts back items a failed checkpoint did not flush.
    pub(crate) fn restore_touched(&self, items: BTreeMap<ItemKey, Arc<dyn Tracked>>) {
        if let Some(state) = self.state.lock().as_mut() {
            for (key, item) in items {
                state.touched.entry(key).or_insert(item);
            }
        }
    }

    /// Registers an action to run if the active transaction rolls back.
    pub(crate) fn on_rollback(&self, undo: UndoAction) {
        if let Some(state) = self.state.lock().as_mut() {
            state.undo.push(undo);
        }
    }

    /// Rejects item changes until the guard is dropped.
    pub(crate) fn reject_changes(&self) -> RejectGuard<'_> {
        self.reject_changes.fetch_add(1, Ordering::SeqCst);
        RejectGuard { manager: self }
    }

    fn is_rejecting(&self) -> bool {
        self.reject_changes.load(Ordering::SeqCst) > 0
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active", &self.is_active())
            .field("reject_changes", &self.reject_changes.load(Ordering::Relaxed))
            .finish()
    }
}

/// Re-allows item changes on drop.
pub(crate) struct RejectGuard<'a> {
    manager: &'a TransactionManager,
}

impl Drop for RejectGuard<'_> {
    fn drop(&mut self) {
        self.manager.reject_changes.fetch_sub(1, Ordering::SeqCst);
    }
}
