//! Ledger records
//!
//! Plain value records. Relations are explicit id fields; related rows are
//! loaded with explicit queries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;

/// Internal surrogate key of an account
pub type AccountId = i64;
/// Id the identity authority assigns to a user
pub type ExternalUserId = i64;
/// Surrogate key of a committed transaction
pub type TransactionId = i64;

/// A user's balance record, linked to an external identity
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Account {
    pub id: AccountId,
    pub external_user_id: ExternalUserId,
    pub username: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a new account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub external_user_id: ExternalUserId,
    pub username: String,
    pub balance: Decimal,
}

/// One completed funds movement. Never mutated after commit.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Transaction {
    pub id: TransactionId,
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Insert payload for a transaction row
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Offset/limit window over an account's history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl Page {
    pub fn new(offset: i64, limit: i64) -> Self {
        Self { offset, limit }
    }
}
