//! Typed records over the KV store.
//!
//! Key layout:
//!
//! ```text
//! user/<uuid>              -> User
//! file/<uuid>              -> FileRecord
//! txn/<user uuid>/<seq:020> -> Transaction
//! ```
//!
//! Transaction keys embed a zero-padded store-wide sequence number so a prefix
//! scan returns a user's history in commit order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::kvstore::KvStore;
use crate::locking::{KeyLockManager, LockKey};
use crate::types::{FileId, FileRecord, MetaError, Transaction, User, UserId};
use crate::unit_of_work::UnitOfWork;

const USER_PREFIX: &str = "user/";
const FILE_PREFIX: &str = "file/";
const TXN_PREFIX: &str = "txn/";

pub(crate) fn user_key(id: UserId) -> Vec<u8> {
    format!("{}{}", USER_PREFIX, id).into_bytes()
}

pub(crate) fn file_key(id: FileId) -> Vec<u8> {
    format!("{}{}", FILE_PREFIX, id).into_bytes()
}

pub(crate) fn txn_key(user: UserId, seq: u64) -> Vec<u8> {
    format!("{}{}/{:020}", TXN_PREFIX, user, seq).into_bytes()
}

fn txn_user_prefix(user: UserId) -> Vec<u8> {
    format!("{}{}/", TXN_PREFIX, user).into_bytes()
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, MetaError> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MetaError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Persistence entry point: typed reads plus units of work for writes.
pub struct Repository {
    store: Arc<dyn KvStore>,
    locks: KeyLockManager,
    next_seq: AtomicU64,
}

impl Repository {
    /// Wraps a KV store. Scans existing transactions to resume the sequence.
    pub fn new(store: Arc<dyn KvStore>, lock_timeout: Duration) -> Result<Self, MetaError> {
        let mut max_seq = 0u64;
        for (_, value) in store.scan_prefix(TXN_PREFIX.as_bytes())? {
            let txn: Transaction = decode(&value)?;
            max_seq = max_seq.max(txn.seq);
        }
        tracing::debug!(resume_seq = max_seq + 1, "repository opened");
        Ok(Self {
            store,
            locks: KeyLockManager::new(lock_timeout),
            next_seq: AtomicU64::new(max_seq + 1),
        })
    }

    /// Begins a unit of work holding locks on `keys`.
    pub async fn begin(&self, keys: &[LockKey]) -> Result<UnitOfWork<'_>, MetaError> {
        let locks = self.locks.acquire(keys).await?;
        Ok(UnitOfWork::new(self, locks))
    }

    pub(crate) fn store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }

    pub(crate) fn allocate_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Reads a user without locking.
    pub fn find_user(&self, id: UserId) -> Result<Option<User>, MetaError> {
        self.store
            .get(&user_key(id))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Reads a user without locking; missing is an error.
    pub fn user(&self, id: UserId) -> Result<User, MetaError> {
        self.find_user(id)?.ok_or(MetaError::UserNotFound(id))
    }

    /// Reads a file record without locking.
    pub fn find_file(&self, id: FileId) -> Result<Option<FileRecord>, MetaError> {
        self.store
            .get(&file_key(id))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Reads a file record without locking; missing is an error.
    pub fn file(&self, id: FileId) -> Result<FileRecord, MetaError> {
        self.find_file(id)?.ok_or(MetaError::FileNotFound(id))
    }

    /// All file records in key order.
    pub fn files(&self) -> Result<Vec<FileRecord>, MetaError> {
        self.store
            .scan_prefix(FILE_PREFIX.as_bytes())?
            .iter()
            .map(|(_, v)| decode(v))
            .collect()
    }

    /// A user's transactions in commit order.
    pub fn transactions(&self, user: UserId) -> Result<Vec<Transaction>, MetaError> {
        self.store
            .scan_prefix(&txn_user_prefix(user))?
            .iter()
            .map(|(_, v)| decode(v))
            .collect()
    }

    /// Drops idle lock-table entries.
    pub fn prune_locks(&self) -> usize {
        self.locks.prune()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvstore::{BatchOp, MemoryKvStore};
    use crate::types::{Timestamp, TransactionKind, TxnId};

    fn repo() -> Repository {
        Repository::new(Arc::new(MemoryKvStore::new()), Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_txn_keys_sort_by_seq() {
        let u = UserId::new();
        assert!(txn_key(u, 9) < txn_key(u, 10));
        assert!(txn_key(u, 99) < txn_key(u, 100));
    }

    #[test]
    fn test_missing_records() {
        let repo = repo();
        let u = UserId::new();
        let f = FileId::new();
        assert!(repo.find_user(u).unwrap().is_none());
        assert!(matches!(repo.user(u), Err(MetaError::UserNotFound(id)) if id == u));
        assert!(matches!(repo.file(f), Err(MetaError::FileNotFound(id)) if id == f));
        assert!(repo.files().unwrap().is_empty());
    }

    #[test]
    fn test_sequence_resumes_after_existing_transactions() {
        let store = Arc::new(MemoryKvStore::new());
        let user = UserId::new();
        let txn = Transaction {
            id: TxnId::new(),
            seq: 41,
            user,
            amount: 10,
            kind: TransactionKind::Credit,
            description: "seed".to_string(),
            created_at: Timestamp::now(),
        };
        store
            .write_batch(vec![BatchOp::Put {
                key: txn_key(user, txn.seq),
                value: encode(&txn).unwrap(),
            }])
            .unwrap();

        let repo = Repository::new(store, Duration::from_secs(1)).unwrap();
        assert_eq!(repo.allocate_seq(), 42);
        assert_eq!(repo.transactions(user).unwrap(), vec![txn]);
    }

    #[test]
    fn test_corrupt_record_is_codec_error() {
        let store = Arc::new(MemoryKvStore::new());
        let u = UserId::new();
        store
            .write_batch(vec![BatchOp::Put {
                key: user_key(u),
                value: vec![0xff],
            }])
            .unwrap();
        let repo = Repository::new(store, Duration::from_secs(1)).unwrap();
        assert!(matches!(repo.user(u), Err(MetaError::Codec(_))));
    }
}
