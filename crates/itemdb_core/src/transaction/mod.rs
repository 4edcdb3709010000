//! Transaction bookkeeping.
//!
//! ItemDB transactions are backend transactions plus two item sets:
//! - **touched**: items mutated since the last checkpoint
//! - **transaction**: items mutated since the transaction began
//!
//! Commits notify every item in the transaction set; rollbacks restore
//! their last-committed state. Transactions do not nest: a transaction
//! started while one is active joins it.

mod manager;
mod state;

pub(crate) use manager::TransactionManager;
pub(crate) use state::{ItemKey, Tracked};
