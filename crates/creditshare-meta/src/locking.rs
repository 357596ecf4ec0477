//! Per-record locks serialising read-modify-write on users and files.
//!
//! One async mutex per key, created on first use. A caller locks every key it
//! will touch in one call; keys are taken in sorted order so two callers can
//! never wait on each other in a cycle.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::{FileId, MetaError, UserId};

/// A lockable record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    /// A user's balance and downloaded set.
    User(UserId),
    /// A file's downloader set, counters and issue list.
    File(FileId),
}

/// Guards held for the lifetime of a unit of work.
pub struct LockSet {
    keys: Vec<LockKey>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl LockSet {
    /// The keys held, in acquisition order.
    pub fn keys(&self) -> &[LockKey] {
        &self.keys
    }

    /// Returns true if `key` is held by this set.
    pub fn holds(&self, key: LockKey) -> bool {
        self.keys.binary_search(&key).is_ok()
    }
}

/// Table of per-key mutexes.
pub struct KeyLockManager {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl KeyLockManager {
    /// Creates a lock table whose acquisitions give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Locks every key in `keys`, waiting at most the configured timeout in total.
    pub async fn acquire(&self, keys: &[LockKey]) -> Result<LockSet, MetaError> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        let mutexes: Vec<Arc<Mutex<()>>> = keys
            .iter()
            .map(|k| self.locks.entry(*k).or_default().value().clone())
            .collect();

        let acquire_all = async move {
            let mut guards = Vec::with_capacity(mutexes.len());
            for m in mutexes {
                guards.push(m.lock_owned().await);
            }
            guards
        };

        match tokio::time::timeout(self.timeout, acquire_all).await {
            Ok(guards) => {
                tracing::trace!(?keys, "record locks acquired");
                Ok(LockSet {
                    keys,
                    _guards: guards,
                })
            }
            Err(_) => {
                tracing::warn!(?keys, timeout = ?self.timeout, "record lock acquisition timed out");
                Err(MetaError::LockTimeout(self.timeout))
            }
        }
    }

    /// Drops table entries nobody holds or waits on. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, m| Arc::strong_count(m) > 1);
        let removed = before - self.locks.len();
        if removed > 0 {
            tracing::debug!(removed, "pruned idle record locks");
        }
        removed
    }

    /// Number of keys currently in the table.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns true if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
