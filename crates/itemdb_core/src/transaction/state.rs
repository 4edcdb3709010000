//! Per-transaction state.

use crate::error::StoreResult;
use crate::types::StoreId;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identifies an item across stores sharing one transaction.
///
/// The first component is the owning store's serial number.
pub(crate) type ItemKey = (u64, StoreId);

/// An item the transaction manager can flush and notify.
pub(crate) trait Tracked: Send + Sync {
    /// Writes pending in-memory changes to the backend.
    fn checkpoint(&self) -> StoreResult<()>;

    /// The transaction that changed the item committed.
    fn committed(&self);

    /// The transaction that changed the item rolled back.
    fn reverted(&self);
}

/// Undo action for in-memory state the backend rollback cannot reach.
pub(crate) type UndoAction = Box<dyn FnOnce() + Send>;

/// State of the active transaction.
#[derive(Default)]
pub(crate) struct TxnState {
    /// Items mutated since the last checkpoint.
    pub(crate) touched: BTreeMap<ItemKey, Arc<dyn Tracked>>,
    /// Items mutated since the transaction began.
    pub(crate) transaction: BTreeMap<ItemKey, Arc<dyn Tracked>>,
    /// Run in reverse order on rollback.
    pub(crate) undo: Vec<UndoAction>,
}

impl TxnState {
    /// Records a mutated item in both sets.
    pub(crate) fn changed(&mut self, key: ItemKey, item: Arc<dyn Tracked>) {
        self.transaction.insert(key, Arc::clone(&item));
        self.touched.insert(key, item);
    }
}

impl std::fmt::Debug for TxnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnState")
            .field("touched", &self.touched.len())
            .field("transaction", &self.transaction.len())
            .field("undo", &self.undo.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Tracked for Noop {
        fn checkpoint(&self) -> StoreResult<()> {
            Ok(())
        }
        fn committed(&self) {}
        fn reverted(&self) {}
    }

    #[test]
    fn changed_lands_in_both_sets() {
        let mut state = TxnState::default();
        state.changed((1, StoreId::new(4)), Arc::new(Noop));
        state.changed((1, StoreId::new(4)), Arc::new(Noop));
        state.changed((2, StoreId::new(4)), Arc::new(Noop));
        assert_eq!(state.touched.len(), 2);
        assert_eq!(state.transaction.len(), 2);
    }
}
