//! Credit balances and the append-only transaction history.
//!
//! Every balance change goes through `apply_credit` / `apply_debit`, which
//! mutate the in-hand `User` and stage exactly one matching `Transaction` in
//! the caller's unit of work. The standalone `credit` / `debit` calls wrap
//! that in their own unit of work locked on the user.

use std::sync::Arc;

use crate::locking::LockKey;
use crate::repo::Repository;
use crate::types::{MetaError, Transaction, TransactionKind, User, UserId};
use crate::unit_of_work::UnitOfWork;

/// Adds `amount` to the user's balance and stages the credit entry.
pub fn apply_credit(
    uow: &mut UnitOfWork<'_>,
    user: &mut User,
    amount: u64,
    reason: &str,
) -> Result<Transaction, MetaError> {
    if amount == 0 {
        return Err(MetaError::InvalidInput("credit amount must be positive".into()));
    }
    let balance = user
        .credits
        .checked_add(amount)
        .filter(|b| i64::try_from(*b).is_ok())
        .ok_or_else(|| MetaError::InvalidInput(format!("credit of {} overflows balance", amount)))?;
    let txn = uow.stage_transaction(user.id, amount, TransactionKind::Credit, reason)?;
    user.credits = balance;
    Ok(txn)
}

/// Removes `amount` from the user's balance and stages the debit entry.
///
/// Fails with `InsufficientCredits`, leaving `user` untouched, if the balance
/// is too small.
pub fn apply_debit(
    uow: &mut UnitOfWork<'_>,
    user: &mut User,
    amount: u64,
    reason: &str,
) -> Result<Transaction, MetaError> {
    if amount == 0 {
        return Err(MetaError::InvalidInput("debit amount must be positive".into()));
    }
    if amount > user.credits {
        return Err(MetaError::InsufficientCredits {
            user: user.id,
            required: amount,
            available: user.credits,
        });
    }
    let txn = uow.stage_transaction(user.id, amount, TransactionKind::Debit, reason)?;
    user.credits -= amount;
    Ok(txn)
}

/// Per-user credit operations.
#[derive(Clone)]
pub struct Ledger {
    repo: Arc<Repository>,
}

impl Ledger {
    /// Creates a ledger over the repository.
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Credits a user and records the entry atomically.
    pub async fn credit(
        &self,
        user: UserId,
        amount: u64,
        reason: &str,
    ) -> Result<Transaction, MetaError> {
        let mut uow = self.repo.begin(&[LockKey::User(user)]).await?;
        let mut record = uow.load_user(user)?;
        let txn = apply_credit(&mut uow, &mut record, amount, reason)?;
        uow.stage_user(&record)?;
        uow.commit()?;
        tracing::info!(user = %user, amount, balance = record.credits, reason, "credited");
        Ok(txn)
    }

    /// Debits a user and records the entry atomically.
    pub async fn debit(
        &self,
        user: UserId,
        amount: u64,
        reason: &str,
    ) -> Result<Transaction, MetaError> {
        let mut uow = self.repo.begin(&[LockKey::User(user)]).await?;
        let mut record = uow.load_user(user)?;
        let txn = apply_debit(&mut uow, &mut record, amount, reason)?;
        uow.stage_user(&record)?;
        uow.commit()?;
        tracing::info!(user = %user, amount, balance = record.credits, reason, "debited");
        Ok(txn)
    }

    /// Current balance.
    pub fn balance(&self, user: UserId) -> Result<u64, MetaError> {
        Ok(self.repo.user(user)?.credits)
    }

    /// Transactions for the user in commit order.
    pub fn history(&self, user: UserId) -> Result<Vec<Transaction>, MetaError> {
        self.repo.user(user)?;
        self.repo.transactions(user)
    }
}
