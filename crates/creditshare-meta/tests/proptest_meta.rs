//! Property-based tests for the ledger and the write-ahead-logged store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use creditshare_meta::{
    BatchOp, KvStore, Ledger, LockKey, MemoryKvStore, MetaError, PersistentKvStore, Repository,
    TransactionKind, User, UserId,
};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Generator for a ledger call: (is_credit, amount).
fn any_ledger_op() -> impl Strategy<Value = (bool, u64)> {
    (any::<bool>(), 0u64..20)
}

/// Generator for a batch of puts over a small key space.
fn any_batch() -> impl Strategy<Value = Vec<BatchOp>> {
    let op = (0u8..16, proptest::collection::vec(any::<u8>(), 0..32)).prop_map(|(k, value)| {
        BatchOp::Put {
            key: vec![b'k', k],
            value,
        }
    });
    proptest::collection::vec(op, 0..6)
}

proptest! {
    /// The balance never goes negative and always equals the sum of the history.
    #[test]
    fn test_balance_matches_history(
        start in 0u64..50,
        ops in proptest::collection::vec(any_ledger_op(), 0..50),
    ) {
        runtime().block_on(async {
            let repo = Arc::new(
                Repository::new(Arc::new(MemoryKvStore::new()), Duration::from_secs(1)).unwrap(),
            );
            let user = UserId::new();
            let mut uow = repo.begin(&[LockKey::User(user)]).await.unwrap();
            uow.stage_user(&User::new(user, "p@example.com", 0)).unwrap();
            uow.commit().unwrap();

            let ledger = Ledger::new(repo.clone());
            let mut expected = 0u64;
            if start > 0 {
                ledger.credit(user, start, "opening").await.unwrap();
                expected = start;
            }

            for (is_credit, amount) in ops {
                let res = if is_credit {
                    ledger.credit(user, amount, "credit").await
                } else {
                    ledger.debit(user, amount, "debit").await
                };
                match res {
                    Ok(txn) => {
                        prop_assert!(amount > 0);
                        if is_credit {
                            prop_assert_eq!(txn.kind, TransactionKind::Credit);
                            prop_assert_eq!(txn.amount, amount as i64);
                            expected += amount;
                        } else {
                            prop_assert_eq!(txn.kind, TransactionKind::Debit);
                            prop_assert_eq!(txn.amount, -(amount as i64));
                            expected -= amount;
                        }
                    }
                    Err(MetaError::InvalidInput(_)) => prop_assert_eq!(amount, 0),
                    Err(MetaError::InsufficientCredits { required, available, .. }) => {
                        prop_assert!(!is_credit);
                        prop_assert_eq!(required, amount);
                        prop_assert_eq!(available, expected);
                    }
                    Err(e) => prop_assert!(false, "unexpected error {}", e),
                }
                prop_assert_eq!(ledger.balance(user).unwrap(), expected);
            }

            let history = ledger.history(user).unwrap();
            let sum: i64 = history.iter().map(|t| t.amount).sum();
            prop_assert_eq!(sum, expected as i64);
            prop_assert!(history.windows(2).all(|w| w[0].seq < w[1].seq));
            Ok(())
        })?;
    }

    /// After any sequence of batches, a reopened store holds exactly what the
    /// in-memory model holds.
    #[test]
    fn test_reopen_matches_model(
        batches in proptest::collection::vec(any_batch(), 0..12),
        checkpoint_at in proptest::option::of(0usize..12),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        {
            let store = PersistentKvStore::open(dir.path()).unwrap();
            for (i, batch) in batches.iter().enumerate() {
                store.write_batch(batch.clone()).unwrap();
                for op in batch {
                    match op {
                        BatchOp::Put { key, value } => {
                            model.insert(key.clone(), value.clone());
                        }
                    }
                }
                if checkpoint_at == Some(i) {
                    store.checkpoint().unwrap();
                }
            }
        }

        let reopened = PersistentKvStore::open(dir.path()).unwrap();
        let contents: BTreeMap<Vec<u8>, Vec<u8>> =
            reopened.scan_prefix(b"k").unwrap().into_iter().collect();
        prop_assert_eq!(contents, model);
    }
}
