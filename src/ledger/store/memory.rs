//! In-memory ledger store
//!
//! Same contract as the PostgreSQL store. Each account has an async mutex that
//! plays the role of its row lock; a unit of work keeps the owned guards until
//! it ends. Writes are staged inside the unit of work and applied to the
//! shared state in a single step on commit, so an abandoned unit of work
//! leaves nothing behind.
//!
//! A one-shot [`FaultPoint`] can be armed to fail a unit of work at a chosen
//! step. [`MemoryLedgerStore::inject_conflicts`] makes row locks and inserts
//! report `Conflict` the way a lock timeout or serialization failure would,
//! and [`MemoryLedgerStore::arm_insert_race`] lets a competing writer win the
//! next account insert.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use super::{LedgerStore, LedgerTx, StoreError};
use crate::ledger::models::{
    Account, AccountId, ExternalUserId, NewAccount, NewTransaction, Page, Transaction,
    TransactionId,
};

/// Step at which an armed fault fails the current unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// The second `update_balance` of a unit of work (after the debit)
    SecondBalanceWrite,
    InsertTransaction,
    Commit,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<AccountId, Account>,
    by_username: HashMap<String, AccountId>,
    by_external_id: HashMap<ExternalUserId, AccountId>,
    transactions: Vec<Transaction>,
    last_account_id: AccountId,
    last_transaction_id: TransactionId,
}

type SharedState = Arc<Mutex<MemoryState>>;

fn lock_state(state: &SharedState) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    state: SharedState,
    row_locks: Arc<DashMap<AccountId, Arc<RowLock<()>>>>,
    fault: Arc<Mutex<Option<FaultPoint>>>,
    /// Remaining `Conflict` errors for lock/insert calls
    conflicts: Arc<AtomicU32>,
    insert_race: Arc<AtomicBool>,
}

/// Consume one pending conflict, if any
fn take_conflict(pending: &AtomicU32, op: &str) -> Result<(), StoreError> {
    let taken = pending
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if taken {
        return Err(StoreError::Conflict(format!("injected conflict on {}", op)));
    }
    Ok(())
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next unit of work that reaches `point`
    pub fn arm_fault(&self, point: FaultPoint) {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(point);
    }

    /// The next `count` calls to `lock_account` or `insert_account` fail with
    /// `StoreError::Conflict`
    pub fn inject_conflicts(&self, count: u32) {
        self.conflicts.store(count, Ordering::SeqCst);
    }

    /// The next `insert_account` loses to a competing writer: the same row is
    /// stored as if another caller inserted it first, and the call reports
    /// `UniqueViolation`.
    pub fn arm_insert_race(&self) {
        self.insert_race.store(true, Ordering::SeqCst);
    }

    /// Snapshot of all accounts, ordered by id
    pub fn accounts(&self) -> Vec<Account> {
        let state = lock_state(&self.state);
        let mut accounts: Vec<Account> = state.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.id);
        accounts
    }

    /// Snapshot of the transaction log in commit order
    pub fn transactions(&self) -> Vec<Transaction> {
        lock_state(&self.state).transactions.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let state = lock_state(&self.state);
        Ok(state
            .by_username
            .get(username)
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn account_by_external_id(
        &self,
        external_user_id: ExternalUserId,
    ) -> Result<Option<Account>, StoreError> {
        let state = lock_state(&self.state);
        Ok(state
            .by_external_id
            .get(&external_user_id)
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn account_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(lock_state(&self.state).accounts.get(&id).cloned())
    }

    async fn insert_account(&self, account: &NewAccount) -> Result<Account, StoreError> {
        take_conflict(&self.conflicts, "insert_account")?;
        let mut state = lock_state(&self.state);
        let raced = self.insert_race.swap(false, Ordering::SeqCst);

        if state.by_username.contains_key(&account.username) {
            return Err(StoreError::UniqueViolation(
                "accounts_username_key".to_string(),
            ));
        }
        if state.by_external_id.contains_key(&account.external_user_id) {
            return Err(StoreError::UniqueViolation(
                "accounts_external_user_id_key".to_string(),
            ));
        }

        state.last_account_id += 1;
        let now = Utc::now();
        let created = Account {
            id: state.last_account_id,
            external_user_id: account.external_user_id,
            username: account.username.clone(),
            balance: account.balance,
            created_at: now,
            updated_at: now,
        };

        state
            .by_username
            .insert(created.username.clone(), created.id);
        state
            .by_external_id
            .insert(created.external_user_id, created.id);
        state.accounts.insert(created.id, created.clone());

        if raced {
            return Err(StoreError::UniqueViolation(
                "accounts_username_key".to_string(),
            ));
        }
        Ok(created)
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        Ok(Box::new(MemoryLedgerTx {
            state: self.state.clone(),
            row_locks: self.row_locks.clone(),
            fault: self.fault.clone(),
            conflicts: self.conflicts.clone(),
            held: HashMap::new(),
            balances: HashMap::new(),
            balance_writes: 0,
            staged: Vec::new(),
        }))
    }

    async fn transactions_for(
        &self,
        account_id: AccountId,
        page: Page,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = lock_state(&self.state);
        let mut rows: Vec<Transaction> = state
            .transactions
            .iter()
            .filter(|t| t.sender_id == account_id || t.receiver_id == account_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));

        Ok(rows
            .into_iter()
            .skip(page.offset.max(0) as usize)
            .take(page.limit.max(0) as usize)
            .collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

struct MemoryLedgerTx {
    state: SharedState,
    row_locks: Arc<DashMap<AccountId, Arc<RowLock<()>>>>,
    fault: Arc<Mutex<Option<FaultPoint>>>,
    conflicts: Arc<AtomicU32>,
    /// Row locks owned by this unit of work
    held: HashMap<AccountId, OwnedMutexGuard<()>>,
    /// Staged balance writes
    balances: HashMap<AccountId, (Decimal, DateTime<Utc>)>,
    balance_writes: usize,
    staged: Vec<Transaction>,
}

impl MemoryLedgerTx {
    fn trip(&self, point: FaultPoint) -> Result<(), StoreError> {
        let mut armed = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        if *armed == Some(point) {
            *armed = None;
            return Err(StoreError::Database(format!("injected fault at {:?}", point)));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn lock_account(&mut self, id: AccountId) -> Result<Account, StoreError> {
        take_conflict(&self.conflicts, "lock_account")?;
        if !self.held.contains_key(&id) {
            let lock = self
                .row_locks
                .entry(id)
                .or_insert_with(|| Arc::new(RowLock::new(())))
                .clone();
            let guard = lock.lock_owned().await;
            self.held.insert(id, guard);
        }

        let mut account = lock_state(&self.state)
            .accounts
            .get(&id)
            .cloned()
            .ok_or(StoreError::AccountNotFound(id))?;

        if let Some((balance, at)) = self.balances.get(&id) {
            account.balance = *balance;
            account.updated_at = *at;
        }
        Ok(account)
    }

    async fn update_balance(
        &mut self,
        id: AccountId,
        balance: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if !self.held.contains_key(&id) {
            return Err(StoreError::Database(format!(
                "balance update on account {} without row lock",
                id
            )));
        }

        self.balance_writes += 1;
        if self.balance_writes == 2 {
            self.trip(FaultPoint::SecondBalanceWrite)?;
        }

        self.balances.insert(id, (balance, at));
        Ok(())
    }

    async fn insert_transaction(
        &mut self,
        record: &NewTransaction,
    ) -> Result<Transaction, StoreError> {
        self.trip(FaultPoint::InsertTransaction)?;

        let mut state = lock_state(&self.state);
        for id in [record.sender_id, record.receiver_id] {
            if !state.accounts.contains_key(&id) {
                return Err(StoreError::AccountNotFound(id));
            }
        }

        // ids are consumed even if the unit of work is abandoned, like a sequence
        state.last_transaction_id += 1;
        let created = Transaction {
            id: state.last_transaction_id,
            sender_id: record.sender_id,
            receiver_id: record.receiver_id,
            amount: record.amount,
            timestamp: record.timestamp,
        };
        drop(state);

        self.staged.push(created.clone());
        Ok(created)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.trip(FaultPoint::Commit)?;

        let mut state = lock_state(&self.state);
        for (id, (balance, at)) in &self.balances {
            if let Some(account) = state.accounts.get_mut(id) {
                account.balance = *balance;
                account.updated_at = *at;
            }
        }
        state.transactions.extend(self.staged.iter().cloned());
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
