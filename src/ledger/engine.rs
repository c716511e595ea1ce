//! Transfer Engine
//!
//! Moves funds between two named accounts.
//!
//! ```text
//! validate ─▶ LookupUser(receiver) ─▶ resolve sender ─▶ resolve receiver
//!                                                            │
//!            ┌───────────────── unit of work ────────────────┘
//!            ▼
//!   lock min(id) ─▶ lock max(id) ─▶ funds check ─▶ debit ─▶ credit ─▶ log ─▶ commit
//! ```
//!
//! # Invariants
//!
//! 1. **All-or-nothing**: debit, credit and the transaction row commit together
//!    or not at all.
//! 2. **No stale funds check**: the balance is compared after its row lock is
//!    taken, in the same unit of work that writes it.
//! 3. **Fixed lock order**: rows are locked by ascending account id, so two
//!    opposite transfers between the same pair cannot deadlock.
//! 4. **Bounded retries**: lock/serialization conflicts restart the unit of
//!    work at most `max_conflict_retries` times.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::accounts::AccountResolver;
use super::error::LedgerError;
use super::models::{Account, AccountId, NewTransaction, Transaction};
use super::store::{LedgerStore, StoreError};
use crate::config::LedgerConfig;
use crate::identity::{CallerIdentity, IdentityAuthority};

/// Fractional digits an amount may carry (matches NUMERIC(30, 8))
pub const MAX_AMOUNT_SCALE: u32 = 8;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_balance: Decimal,
    pub history_default_limit: i64,
    pub history_max_limit: i64,
    pub max_conflict_retries: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&LedgerConfig::default())
    }
}

impl From<&LedgerConfig> for EngineSettings {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            default_balance: config.default_balance,
            history_default_limit: config.history_default_limit,
            history_max_limit: config.history_max_limit,
            max_conflict_retries: config.max_conflict_retries.max(1),
        }
    }
}

/// Outcome of one unit of work that did not hit a storage error
enum Attempt {
    Committed(Transaction),
    Rejected(LedgerError),
}

pub struct TransferEngine {
    pub(super) store: Arc<dyn LedgerStore>,
    identity: Arc<dyn IdentityAuthority>,
    pub(super) accounts: AccountResolver,
    pub(super) settings: EngineSettings,
}

impl TransferEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        identity: Arc<dyn IdentityAuthority>,
        settings: EngineSettings,
    ) -> Self {
        let accounts = AccountResolver::new(
            store.clone(),
            settings.default_balance,
            settings.max_conflict_retries,
        );
        Self {
            store,
            identity,
            accounts,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn identity(&self) -> &Arc<dyn IdentityAuthority> {
        &self.identity
    }

    /// Move `amount` from the caller to `receiver_username`.
    pub async fn transfer(
        &self,
        caller: &CallerIdentity,
        receiver_username: &str,
        amount: Decimal,
    ) -> Result<Transaction, LedgerError> {
        validate_amount(amount)?;
        if receiver_username.is_empty() {
            return Err(LedgerError::InvalidRequest(
                "receiver_username must not be empty".to_string(),
            ));
        }
        if receiver_username == caller.username {
            return Err(LedgerError::SelfTransfer);
        }

        info!(
            sender = %caller.username,
            receiver = receiver_username,
            amount = %amount,
            "Transfer requested"
        );

        // 1. Receiver must be registered with the authority
        let receiver_uid = self
            .identity
            .lookup_user(receiver_username)
            .await
            .map_err(|e| LedgerError::from_receiver_lookup(e, receiver_username))?;

        // 2-3. Resolve or provision both accounts
        let sender = self
            .accounts
            .resolve_or_create(&caller.username, caller.external_user_id)
            .await?;
        let receiver = self
            .accounts
            .resolve_or_create(receiver_username, receiver_uid)
            .await?;

        if sender.id == receiver.id {
            return Err(LedgerError::SelfTransfer);
        }

        // 4-5. Funds check and commit under row locks
        let attempts = self.settings.max_conflict_retries;
        for attempt in 1..=attempts {
            match self.commit_once(&sender, &receiver, amount).await {
                Ok(Attempt::Committed(record)) => {
                    info!(
                        transaction_id = record.id,
                        sender = %sender.username,
                        receiver = %receiver.username,
                        amount = %amount,
                        "Transfer committed"
                    );
                    return Ok(record);
                }
                Ok(Attempt::Rejected(err)) => {
                    warn!(
                        sender = %sender.username,
                        amount = %amount,
                        error = %err,
                        "Transfer rejected"
                    );
                    return Err(err);
                }
                Err(e) if e.is_conflict() => {
                    debug!(attempt, error = %e, "Transfer hit a storage conflict, retrying");
                }
                Err(e) => {
                    warn!(error = %e, "Transfer aborted by storage error");
                    return Err(e.into());
                }
            }
        }

        warn!(
            sender = %sender.username,
            attempts,
            "Transfer retries exhausted"
        );
        Err(LedgerError::StorageConflict { attempts })
    }

    /// One unit of work. Any error before `commit` drops the unit of work,
    /// which discards every staged write.
    async fn commit_once(
        &self,
        sender: &Account,
        receiver: &Account,
        amount: Decimal,
    ) -> Result<Attempt, StoreError> {
        let mut tx = self.store.begin().await?;

        let (first, second) = lock_order(sender.id, receiver.id);
        let first = tx.lock_account(first).await?;
        let second = tx.lock_account(second).await?;
        let (locked_sender, locked_receiver) = if first.id == sender.id {
            (first, second)
        } else {
            (second, first)
        };

        if locked_sender.balance < amount {
            tx.rollback().await?;
            return Ok(Attempt::Rejected(LedgerError::InsufficientFunds {
                available: locked_sender.balance,
                requested: amount,
            }));
        }

        let (Some(debited), Some(credited)) = (
            locked_sender.balance.checked_sub(amount),
            locked_receiver.balance.checked_add(amount),
        ) else {
            tx.rollback().await?;
            return Ok(Attempt::Rejected(LedgerError::InvalidAmount));
        };

        let now = Utc::now();
        tx.update_balance(locked_sender.id, debited, now).await?;
        tx.update_balance(locked_receiver.id, credited, now).await?;
        let record = tx
            .insert_transaction(&NewTransaction {
                sender_id: locked_sender.id,
                receiver_id: locked_receiver.id,
                amount,
                timestamp: now,
            })
            .await?;
        tx.commit().await?;

        Ok(Attempt::Committed(record))
    }

    /// Explicit (registration-style) provisioning of the caller's account.
    pub async fn open_account(&self, caller: &CallerIdentity) -> Result<Account, LedgerError> {
        self.accounts
            .resolve_or_create(&caller.username, caller.external_user_id)
            .await
    }

    /// The caller's account, if the ledger has ever seen them
    pub async fn account_for(&self, caller: &CallerIdentity) -> Result<Account, LedgerError> {
        self.accounts
            .find(&caller.username)
            .await?
            .ok_or_else(|| LedgerError::UnknownAccount(caller.username.clone()))
    }
}

/// Ascending id order for row locks
fn lock_order(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a <= b { (a, b) } else { (b, a) }
}

pub fn validate_amount(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO || amount.normalize().scale() > MAX_AMOUNT_SCALE {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::mock::MockIdentity;
    use crate::ledger::models::NewAccount;
    use crate::ledger::store::{FaultPoint, MemoryLedgerStore};
    use std::str::FromStr;

    struct TestHarness {
        engine: Arc<TransferEngine>,
        store: MemoryLedgerStore,
        identity: Arc<MockIdentity>,
    }

    impl TestHarness {
        fn new() -> Self {
            let store = MemoryLedgerStore::new();
            let identity = Arc::new(
                MockIdentity::new()
                    .with_user("alice", 1)
                    .with_user("bob", 2)
                    .with_user("carol", 3),
            );
            let engine = Arc::new(TransferEngine::new(
                Arc::new(store.clone()),
                identity.clone(),
                EngineSettings::default(),
            ));
            Self {
                engine,
                store,
                identity,
            }
        }

        async fn seed(&self, username: &str, uid: i64, balance: i64) -> Account {
            self.store
                .insert_account(&NewAccount {
                    external_user_id: uid,
                    username: username.to_string(),
                    balance: Decimal::from(balance),
                })
                .await
                .unwrap()
        }

        fn balance_of(&self, username: &str) -> Option<Decimal> {
            self.store
                .accounts()
                .into_iter()
                .find(|a| a.username == username)
                .map(|a| a.balance)
        }
    }

    fn caller(username: &str, uid: i64) -> CallerIdentity {
        CallerIdentity {
            external_user_id: uid,
            username: username.to_string(),
        }
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    // ========================================================================
    // Happy Path
    // ========================================================================

    #[tokio::test]
    async fn test_transfer_to_new_receiver() {
        let h = TestHarness::new();
        h.seed("alice", 1, 100).await;

        let record = h
            .engine
            .transfer(&caller("alice", 1), "bob", dec("40"))
            .await
            .unwrap();

        assert_eq!(record.amount, dec("40"));
        assert_eq!(h.balance_of("alice"), Some(dec("60")));
        assert_eq!(h.balance_of("bob"), Some(dec("40")));

        let log = h.store.transactions();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0], record);

        let bob = h.store.account_by_username("bob").await.unwrap().unwrap();
        assert_eq!(bob.external_user_id, 2);
        assert_eq!(record.receiver_id, bob.id);
    }

    #[tokio::test]
    async fn test_conservation_of_funds() {
        let h = TestHarness::new();
        h.seed("alice", 1, 100).await;
        h.seed("bob", 2, 25).await;

        h.engine
            .transfer(&caller("alice", 1), "bob", dec("12.345"))
            .await
            .unwrap();
        h.engine
            .transfer(&caller("bob", 2), "alice", dec("7.5"))
            .await
            .unwrap();

        let total: Decimal = h.store.accounts().iter().map(|a| a.balance).sum();
        assert_eq!(total, dec("125"));
        assert_eq!(h.balance_of("alice"), Some(dec("95.155")));
    }

    #[tokio::test]
    async fn test_sender_provisioned_with_default_balance() {
        let store = MemoryLedgerStore::new();
        let identity = Arc::new(MockIdentity::new().with_user("bob", 2));
        let settings = EngineSettings {
            default_balance: dec("50"),
            ..EngineSettings::default()
        };
        let engine = TransferEngine::new(Arc::new(store.clone()), identity, settings);

        engine
            .transfer(&caller("alice", 1), "bob", dec("20"))
            .await
            .unwrap();

        let accounts = store.accounts();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].username, "alice");
        assert_eq!(accounts[0].balance, dec("30"));
        assert_eq!(accounts[1].balance, dec("70"));
    }

    // ========================================================================
    // Rejections
    // ========================================================================

    #[tokio::test]
    async fn test_insufficient_funds_changes_nothing() {
        let h = TestHarness::new();
        h.seed("alice", 1, 10).await;
        h.seed("bob", 2, 5).await;

        let err = h
            .engine
            .transfer(&caller("alice", 1), "bob", dec("50"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                available: dec("10"),
                requested: dec("50"),
            }
        );
        assert_eq!(h.balance_of("alice"), Some(dec("10")));
        assert_eq!(h.balance_of("bob"), Some(dec("5")));
        assert!(h.store.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_amounts() {
        let h = TestHarness::new();
        h.seed("alice", 1, 100).await;

        for amount in ["0", "-5", "0.000000001"] {
            let err = h
                .engine
                .transfer(&caller("alice", 1), "bob", dec(amount))
                .await
                .unwrap_err();
            assert_eq!(err, LedgerError::InvalidAmount, "amount {amount}");
        }
        // trailing zeros do not count as precision
        assert!(validate_amount(dec("1.0000000000")).is_ok());
        assert_eq!(h.identity.lookup_count(), 0);
    }

    #[tokio::test]
    async fn test_self_transfer_rejected() {
        let h = TestHarness::new();
        h.seed("alice", 1, 100).await;

        let err = h
            .engine
            .transfer(&caller("alice", 1), "alice", dec("1"))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::SelfTransfer);
        assert_eq!(h.identity.lookup_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_receiver_rejected() {
        let h = TestHarness::new();
        let err = h
            .engine
            .transfer(&caller("alice", 1), "", dec("1"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_unknown_receiver() {
        let h = TestHarness::new();
        h.seed("alice", 1, 100).await;

        let err = h
            .engine
            .transfer(&caller("alice", 1), "mallory", dec("1"))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::UnknownReceiver("mallory".into()));
        assert_eq!(h.store.accounts().len(), 1);
    }

    #[tokio::test]
    async fn test_identity_unavailable_is_retryable_and_side_effect_free() {
        let h = TestHarness::new();
        h.seed("alice", 1, 100).await;
        h.identity.set_unavailable(true);

        let err = h
            .engine
            .transfer(&caller("alice", 1), "bob", dec("1"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::IdentityUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(h.store.accounts().len(), 1);
        assert_eq!(h.balance_of("alice"), Some(dec("100")));
    }

    // ========================================================================
    // Atomicity under injected storage faults
    // ========================================================================

    async fn assert_fault_leaves_no_trace(point: FaultPoint) {
        let h = TestHarness::new();
        h.seed("alice", 1, 100).await;
        h.seed("bob", 2, 0).await;
        h.store.arm_fault(point);

        let err = h
            .engine
            .transfer(&caller("alice", 1), "bob", dec("40"))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Storage(_)), "{point:?}: {err:?}");
        assert_eq!(h.balance_of("alice"), Some(dec("100")), "{point:?}");
        assert_eq!(h.balance_of("bob"), Some(dec("0")), "{point:?}");
        assert!(h.store.transactions().is_empty(), "{point:?}");

        // locks were released: the next transfer goes through
        h.engine
            .transfer(&caller("alice", 1), "bob", dec("40"))
            .await
            .unwrap();
        assert_eq!(h.balance_of("bob"), Some(dec("40")));
    }

    #[tokio::test]
    async fn test_fault_between_balance_writes() {
        assert_fault_leaves_no_trace(FaultPoint::SecondBalanceWrite).await;
    }

    #[tokio::test]
    async fn test_fault_on_transaction_insert() {
        assert_fault_leaves_no_trace(FaultPoint::InsertTransaction).await;
    }

    #[tokio::test]
    async fn test_fault_on_commit() {
        assert_fault_leaves_no_trace(FaultPoint::Commit).await;
    }

    // ========================================================================
    // Concurrency
    // ========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_overdraft_only_one_wins() {
        let h = TestHarness::new();
        h.seed("alice", 1, 100).await;

        let spawn = |receiver: &'static str| {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .transfer(&caller("alice", 1), receiver, dec("60"))
                    .await
            })
        };
        let first = spawn("bob");
        let second = spawn("carol");

        let results = [first.await.unwrap(), second.await.unwrap()];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::InsufficientFunds { .. })))
            .count();

        assert_eq!(ok, 1);
        assert_eq!(insufficient, 1);
        assert_eq!(h.balance_of("alice"), Some(dec("40")));
        assert_eq!(h.store.transactions().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_opposite_transfers_do_not_deadlock() {
        let h = TestHarness::new();
        h.seed("alice", 1, 1000).await;
        h.seed("bob", 2, 1000).await;

        let mut handles = Vec::new();
        for i in 0..50 {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    engine.transfer(&caller("alice", 1), "bob", dec("3")).await
                } else {
                    engine.transfer(&caller("bob", 2), "alice", dec("2")).await
                }
            }));
        }

        let all = tokio::time::timeout(std::time::Duration::from_secs(10), async {
            for handle in handles {
                handle.await.unwrap().unwrap();
            }
        })
        .await;
        assert!(all.is_ok(), "transfers deadlocked");

        // 25 x 3 one way, 25 x 2 the other
        assert_eq!(h.balance_of("alice"), Some(dec("975")));
        assert_eq!(h.balance_of("bob"), Some(dec("1025")));
        assert_eq!(h.store.transactions().len(), 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_balance_never_negative_under_contention() {
        let h = TestHarness::new();
        h.seed("alice", 1, 100).await;

        let mut handles = Vec::new();
        for i in 0..40 {
            let engine = h.engine.clone();
            let receiver = if i % 2 == 0 { "bob" } else { "carol" };
            handles.push(tokio::spawn(async move {
                engine
                    .transfer(&caller("alice", 1), receiver, dec("7"))
                    .await
            }));
        }
        let mut committed = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                committed += 1;
            }
        }

        // floor(100 / 7) transfers fit
        assert_eq!(committed, 14);
        assert_eq!(h.balance_of("alice"), Some(dec("2")));
        let total: Decimal = h.store.accounts().iter().map(|a| a.balance).sum();
        assert_eq!(total, dec("100"));
        assert!(h.store.accounts().iter().all(|a| a.balance >= Decimal::ZERO));
    }

    // ========================================================================
    // Account access
    // ========================================================================

    #[tokio::test]
    async fn test_open_account_is_idempotent() {
        let h = TestHarness::new();
        let first = h.engine.open_account(&caller("carol", 3)).await.unwrap();
        let second = h.engine.open_account(&caller("carol", 3)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(h.store.accounts().len(), 1);
    }

    #[tokio::test]
    async fn test_account_for_unknown_caller() {
        let h = TestHarness::new();
        let err = h.engine.account_for(&caller("carol", 3)).await.unwrap_err();
        assert_eq!(err, LedgerError::UnknownAccount("carol".into()));
    }

    #[test]
    fn test_lock_order() {
        assert_eq!(lock_order(5, 2), (2, 5));
        assert_eq!(lock_order(2, 5), (2, 5));
    }

    // ========================================================================
    // Storage conflicts
    // ========================================================================

    #[tokio::test]
    async fn test_transfer_succeeds_after_retried_conflicts() {
        let h = TestHarness::new();
        h.seed("alice", 1, 100).await;
        h.seed("bob", 2, 0).await;
        let retries = EngineSettings::default().max_conflict_retries;
        h.store.inject_conflicts(retries - 1);

        let record = h
            .engine
            .transfer(&caller("alice", 1), "bob", dec("10"))
            .await
            .unwrap();

        assert_eq!(record.amount, dec("10"));
        assert_eq!(h.store.transactions(), vec![record]);
        assert_eq!(h.balance_of("alice"), Some(dec("90")));
        assert_eq!(h.balance_of("bob"), Some(dec("10")));
    }

    #[tokio::test]
    async fn test_conflicts_exhaust_retries() {
        let h = TestHarness::new();
        h.seed("alice", 1, 100).await;
        h.seed("bob", 2, 0).await;
        let retries = EngineSettings::default().max_conflict_retries;
        h.store.inject_conflicts(retries);

        let err = h
            .engine
            .transfer(&caller("alice", 1), "bob", dec("10"))
            .await
            .unwrap_err();

        assert_eq!(err, LedgerError::StorageConflict { attempts: retries });
        assert!(err.is_retryable());
        assert!(h.store.transactions().is_empty());
        assert_eq!(h.balance_of("alice"), Some(dec("100")));
        assert_eq!(h.balance_of("bob"), Some(dec("0")));
    }
}

