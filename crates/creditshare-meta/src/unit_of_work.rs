//! Atomic unit of work over users, files and ledger entries.
//!
//! A unit of work holds the record locks it was opened with, reads current
//! state under those locks, and stages writes into a single `write_batch`.
//! Nothing is visible to other readers until `commit` succeeds; dropping an
//! uncommitted unit discards everything it staged.

use crate::kvstore::BatchOp;
use crate::locking::{LockKey, LockSet};
use crate::repo::{encode, file_key, txn_key, user_key, Repository};
use crate::types::{
    FileId, FileRecord, MetaError, Timestamp, Transaction, TransactionKind, TxnId, User, UserId,
};

/// Staged writes plus the locks protecting them.
pub struct UnitOfWork<'a> {
    repo: &'a Repository,
    locks: LockSet,
    ops: Vec<BatchOp>,
    transactions: Vec<Transaction>,
    committed: bool,
}

impl<'a> UnitOfWork<'a> {
    pub(crate) fn new(repo: &'a Repository, locks: LockSet) -> Self {
        Self {
            repo,
            locks,
            ops: Vec::new(),
            transactions: Vec::new(),
            committed: false,
        }
    }

    fn require_lock(&self, key: LockKey) -> Result<(), MetaError> {
        if self.locks.holds(key) {
            Ok(())
        } else {
            Err(MetaError::KvError(format!(
                "{:?} written without holding its lock",
                key
            )))
        }
    }

    /// Reads the committed state of a user.
    pub fn load_user(&self, id: UserId) -> Result<User, MetaError> {
        self.repo.user(id)
    }

    /// Reads the committed state of a file.
    pub fn load_file(&self, id: FileId) -> Result<FileRecord, MetaError> {
        self.repo.file(id)
    }

    /// Returns the committed user, or None.
    pub fn find_user(&self, id: UserId) -> Result<Option<User>, MetaError> {
        self.repo.find_user(id)
    }

    /// Returns the committed file, or None.
    pub fn find_file(&self, id: FileId) -> Result<Option<FileRecord>, MetaError> {
        self.repo.find_file(id)
    }

    /// Stages a full replacement of the user record.
    pub fn stage_user(&mut self, user: &User) -> Result<(), MetaError> {
        self.require_lock(LockKey::User(user.id))?;
        self.ops.push(BatchOp::Put {
            key: user_key(user.id),
            value: encode(user)?,
        });
        Ok(())
    }

    /// Stages a full replacement of the file record.
    pub fn stage_file(&mut self, file: &FileRecord) -> Result<(), MetaError> {
        self.require_lock(LockKey::File(file.id))?;
        self.ops.push(BatchOp::Put {
            key: file_key(file.id),
            value: encode(file)?,
        });
        Ok(())
    }

    /// Stages a ledger entry. `amount` is unsigned; the sign follows `kind`.
    pub fn stage_transaction(
        &mut self,
        user: UserId,
        amount: u64,
        kind: TransactionKind,
        description: &str,
    ) -> Result<Transaction, MetaError> {
        self.require_lock(LockKey::User(user))?;
        let magnitude = i64::try_from(amount)
            .map_err(|_| MetaError::InvalidInput(format!("amount {} out of range", amount)))?;
        let txn = Transaction {
            id: TxnId::new(),
            seq: self.repo.allocate_seq(),
            user,
            amount: match kind {
                TransactionKind::Credit => magnitude,
                TransactionKind::Debit => -magnitude,
            },
            kind,
            description: description.to_string(),
            created_at: Timestamp::now(),
        };
        self.ops.push(BatchOp::Put {
            key: txn_key(user, txn.seq),
            value: encode(&txn)?,
        });
        self.transactions.push(txn.clone());
        Ok(txn)
    }

    /// Number of staged operations.
    pub fn staged(&self) -> usize {
        self.ops.len()
    }

    /// Writes every staged operation in one atomic batch.
    ///
    /// Returns the ledger entries that were committed.
    pub fn commit(mut self) -> Result<Vec<Transaction>, MetaError> {
        let ops = std::mem::take(&mut self.ops);
        let count = ops.len();
        if count > 0 {
            self.repo.store().write_batch(ops)?;
        }
        self.committed = true;
        tracing::debug!(ops = count, keys = ?self.locks.keys(), "unit of work committed");
        Ok(std::mem::take(&mut self.transactions))
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.committed && (!self.ops.is_empty() || !self.transactions.is_empty()) {
            tracing::debug!(
                discarded = self.ops.len(),
                keys = ?self.locks.keys(),
                "unit of work rolled back"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvstore::{KvStore, MemoryKvStore};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    struct RejectingStore {
        inner: MemoryKvStore,
    }

    impl KvStore for RejectingStore {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, MetaError> {
            self.inner.get(key)
        }
        fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, MetaError> {
            self.inner.scan_prefix(prefix)
        }
        fn write_batch(&self, _ops: Vec<BatchOp>) -> Result<(), MetaError> {
            Err(MetaError::KvError("disk full".to_string()))
        }
    }

    fn sample_file(owner: UserId) -> FileRecord {
        FileRecord {
            id: FileId::new(),
            blob_name: "blob".to_string(),
            name: "notes.txt".to_string(),
            owner,
            size: 3,
            content_type: "text/plain".to_string(),
            description: String::new(),
            checksum: String::new(),
            uploaded_at: Timestamp::now(),
            downloaders: BTreeSet::new(),
            downloads: 0,
            likes: 0,
            liked_by: BTreeSet::new(),
            issues: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_commit_writes_all_records() {
        let repo = Repository::new(Arc::new(MemoryKvStore::new()), Duration::from_secs(1)).unwrap();
        let user = User::new(UserId::new(), "a@example.com", 10);
        let file = sample_file(user.id);

        let mut uow = repo
            .begin(&[LockKey::User(user.id), LockKey::File(file.id)])
            .await
            .unwrap();
        uow.stage_user(&user).unwrap();
        uow.stage_file(&file).unwrap();
        let txn = uow
            .stage_transaction(user.id, 10, TransactionKind::Credit, "seed")
            .unwrap();
        assert_eq!(txn.amount, 10);
        assert_eq!(uow.staged(), 3);
        let committed = uow.commit().unwrap();

        assert_eq!(committed, vec![txn]);
        assert_eq!(repo.user(user.id).unwrap(), user);
        assert_eq!(repo.file(file.id).unwrap(), file);
        assert_eq!(repo.transactions(user.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_drop_without_commit_discards() {
        let repo = Repository::new(Arc::new(MemoryKvStore::new()), Duration::from_secs(1)).unwrap();
        let user = User::new(UserId::new(), "a@example.com", 10);
        {
            let mut uow = repo.begin(&[LockKey::User(user.id)]).await.unwrap();
            uow.stage_user(&user).unwrap();
            uow.stage_transaction(user.id, 10, TransactionKind::Credit, "seed")
                .unwrap();
        }
        assert!(repo.find_user(user.id).unwrap().is_none());
        assert!(repo.transactions(user.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_nothing() {
        let store = Arc::new(RejectingStore {
            inner: MemoryKvStore::new(),
        });
        let repo = Repository::new(store, Duration::from_secs(1)).unwrap();
        let user = User::new(UserId::new(), "a@example.com", 10);
        let mut uow = repo.begin(&[LockKey::User(user.id)]).await.unwrap();
        uow.stage_user(&user).unwrap();
        uow.stage_transaction(user.id, 5, TransactionKind::Debit, "x")
            .unwrap();
        assert!(uow.commit().is_err());
        assert!(repo.find_user(user.id).unwrap().is_none());
        assert!(repo.transactions(user.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stage_requires_lock() {
        let repo = Repository::new(Arc::new(MemoryKvStore::new()), Duration::from_secs(1)).unwrap();
        let user = User::new(UserId::new(), "a@example.com", 0);
        let mut uow = repo.begin(&[]).await.unwrap();
        assert!(uow.stage_user(&user).is_err());
        assert!(uow
            .stage_transaction(user.id, 1, TransactionKind::Credit, "x")
            .is_err());
        assert_eq!(uow.staged(), 0);
    }

    #[tokio::test]
    async fn test_debit_sign() {
        let repo = Repository::new(Arc::new(MemoryKvStore::new()), Duration::from_secs(1)).unwrap();
        let u = UserId::new();
        let mut uow = repo.begin(&[LockKey::User(u)]).await.unwrap();
        let txn = uow
            .stage_transaction(u, 5, TransactionKind::Debit, "download")
            .unwrap();
        assert_eq!(txn.amount, -5);
        assert_eq!(txn.kind, TransactionKind::Debit);
    }
}
