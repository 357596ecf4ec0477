#![warn(missing_docs)]

//! CreditShare metadata subsystem: user/file/transaction records, atomic units of work,
//! the credit ledger and the file catalog

pub mod catalog;
pub mod kvstore;
pub mod ledger;
pub mod locking;
pub mod repo;
pub mod types;
pub mod unit_of_work;
pub mod wal_store;

pub use catalog::{Catalog, FileFilter, FileListing, NewFile, SortBy, UNKNOWN_OWNER};
pub use kvstore::{BatchOp, KvStore, MemoryKvStore};
pub use ledger::Ledger;
pub use locking::{KeyLockManager, LockKey};
pub use repo::Repository;
pub use types::*;
pub use unit_of_work::UnitOfWork;
pub use wal_store::PersistentKvStore;
