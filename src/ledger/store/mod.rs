//! Storage seam for accounts and the transaction log.
//!
//! `LedgerStore` is shared by all requests. `LedgerTx` is one durable unit of
//! work owned by a single transfer: row locks taken through it are held until
//! `commit`, `rollback`, or drop. Dropping without `commit` discards every
//! staged write.

pub mod memory;
pub mod postgres;

pub use memory::{FaultPoint, MemoryLedgerStore};
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use super::models::{
    Account, AccountId, ExternalUserId, NewAccount, NewTransaction, Page, Transaction,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// A unique constraint rejected the write (duplicate username / external id)
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Serialization failure, deadlock, or lock timeout. Safe to retry.
    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    #[error("Account {0} does not exist")]
    AccountNotFound(AccountId),

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db_err) = e.as_database_error() {
            if db_err.is_unique_violation() {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                return StoreError::UniqueViolation(constraint);
            }
            // serialization_failure, deadlock_detected, lock_not_available
            if let Some(code) = db_err.code()
                && matches!(code.as_ref(), "40001" | "40P01" | "55P03")
            {
                return StoreError::Conflict(db_err.message().to_string());
            }
        }
        StoreError::Database(e.to_string())
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>, StoreError>;

    async fn account_by_external_id(
        &self,
        external_user_id: ExternalUserId,
    ) -> Result<Option<Account>, StoreError>;

    async fn account_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Insert a new account. Fails with `UniqueViolation` if the username or
    /// external id is already taken.
    async fn insert_account(&self, account: &NewAccount) -> Result<Account, StoreError>;

    /// Open a unit of work
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError>;

    /// Transactions where the account is sender or receiver, newest first
    async fn transactions_for(
        &self,
        account_id: AccountId,
        page: Page,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait LedgerTx: Send {
    /// Acquire the row lock on an account and return its current state.
    ///
    /// Callers touching several accounts must lock them in ascending id order.
    async fn lock_account(&mut self, id: AccountId) -> Result<Account, StoreError>;

    async fn update_balance(
        &mut self,
        id: AccountId,
        balance: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn insert_transaction(
        &mut self,
        record: &NewTransaction,
    ) -> Result<Transaction, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
