//! PostgreSQL ledger store
//!
//! Row locks are `SELECT ... FOR UPDATE` held by the open transaction.
//! Each unit of work sets `lock_timeout` so a stuck lock surfaces as a
//! retryable conflict instead of a hang.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres};

use super::{LedgerStore, LedgerTx, StoreError};
use crate::ledger::models::{
    Account, AccountId, ExternalUserId, NewAccount, NewTransaction, Page, Transaction,
};

const ACCOUNT_COLUMNS: &str = "id, external_user_id, username, balance, created_at, updated_at";

pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool, lock_timeout_ms: u64) -> Self {
        Self {
            pool,
            lock_timeout_ms,
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE username = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn account_by_external_id(
        &self,
        external_user_id: ExternalUserId,
    ) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE external_user_id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(external_user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn account_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn insert_account(&self, account: &NewAccount) -> Result<Account, StoreError> {
        let created = sqlx::query_as::<_, Account>(&format!(
            "INSERT INTO accounts (external_user_id, username, balance, created_at, updated_at)
             VALUES ($1, $2, $3, NOW(), NOW())
             RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(account.external_user_id)
        .bind(&account.username)
        .bind(account.balance)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        let mut tx = self.pool.begin().await?;
        // SET does not accept bind parameters
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout_ms
        ))
        .execute(&mut *tx)
        .await?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn transactions_for(
        &self,
        account_id: AccountId,
        page: Page,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT id, sender_id, receiver_id, amount, timestamp
            FROM transactions
            WHERE sender_id = $1 OR receiver_id = $1
            ORDER BY timestamp DESC, id DESC
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(account_id)
        .bind(page.offset)
        .bind(page.limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgLedgerTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_account(&mut self, id: AccountId) -> Result<Account, StoreError> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE id = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(StoreError::AccountNotFound(id))
    }

    async fn update_balance(
        &mut self,
        id: AccountId,
        balance: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE accounts SET balance = $1, updated_at = $2 WHERE id = $3")
            .bind(balance)
            .bind(at)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AccountNotFound(id));
        }
        Ok(())
    }

    async fn insert_transaction(
        &mut self,
        record: &NewTransaction,
    ) -> Result<Transaction, StoreError> {
        let created = sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions (sender_id, receiver_id, amount, timestamp)
            VALUES ($1, $2, $3, $4)
            RETURNING id, sender_id, receiver_id, amount, timestamp
            "#,
        )
        .bind(record.sender_id)
        .bind(record.receiver_id)
        .bind(record.amount)
        .bind(record.timestamp)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(created)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
