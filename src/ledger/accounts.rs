//! Account resolution and lazy provisioning
//!
//! Maps a username to its durable account, creating it on first contact.
//! Concurrent first contacts for the same username race on the unique
//! constraint; the loser re-reads and returns the winner's row.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::error::LedgerError;
use super::models::{Account, ExternalUserId, NewAccount};
use super::store::{LedgerStore, StoreError};

pub struct AccountResolver {
    store: Arc<dyn LedgerStore>,
    default_balance: Decimal,
    max_attempts: u32,
}

impl AccountResolver {
    pub fn new(store: Arc<dyn LedgerStore>, default_balance: Decimal, max_attempts: u32) -> Self {
        Self {
            store,
            default_balance,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Existing account for `username`, if any
    pub async fn find(&self, username: &str) -> Result<Option<Account>, LedgerError> {
        Ok(self.store.account_by_username(username).await?)
    }

    /// Return the account for `username`, creating it with `external_user_id`
    /// and the default balance if the ledger has never seen it.
    pub async fn resolve_or_create(
        &self,
        username: &str,
        external_user_id: ExternalUserId,
    ) -> Result<Account, LedgerError> {
        for attempt in 1..=self.max_attempts {
            if let Some(account) = self.store.account_by_username(username).await? {
                return check_identity(account, external_user_id);
            }

            let new = NewAccount {
                external_user_id,
                username: username.to_string(),
                balance: self.default_balance,
            };

            match self.store.insert_account(&new).await {
                Ok(account) => {
                    info!(
                        account_id = account.id,
                        username,
                        external_user_id,
                        "Provisioned account"
                    );
                    return Ok(account);
                }
                Err(StoreError::UniqueViolation(constraint)) => {
                    debug!(
                        username,
                        attempt,
                        constraint = %constraint,
                        "Provisioning lost a race, re-reading"
                    );
                    if let Some(account) = self.store.account_by_username(username).await? {
                        return check_identity(account, external_user_id);
                    }
                    // The external id belongs to an account under another username.
                    if let Some(owner) = self.store.account_by_external_id(external_user_id).await?
                    {
                        warn!(
                            username,
                            external_user_id,
                            owner = %owner.username,
                            "External id already bound to another username"
                        );
                        return Err(LedgerError::IdentityConflict(format!(
                            "external id {} already belongs to {}",
                            external_user_id, owner.username
                        )));
                    }
                }
                Err(e) if e.is_conflict() => {
                    debug!(username, attempt, "Provisioning conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(username, attempts = self.max_attempts, "Provisioning retries exhausted");
        Err(LedgerError::StorageConflict {
            attempts: self.max_attempts,
        })
    }
}

/// A stored account must agree with the identity authority about who owns it.
fn check_identity(account: Account, external_user_id: ExternalUserId) -> Result<Account, LedgerError> {
    if account.external_user_id != external_user_id {
        warn!(
            username = %account.username,
            stored = account.external_user_id,
            authority = external_user_id,
            "Account identity mismatch"
        );
        return Err(LedgerError::IdentityConflict(format!(
            "account {} is bound to external id {}, authority reports {}",
            account.username, account.external_user_id, external_user_id
        )));
    }
    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::MemoryLedgerStore;

    fn resolver(store: &MemoryLedgerStore) -> AccountResolver {
        AccountResolver::new(Arc::new(store.clone()), Decimal::ZERO, 3)
    }

    #[tokio::test]
    async fn test_creates_on_first_contact() {
        let store = MemoryLedgerStore::new();
        let resolver = resolver(&store);

        let first = resolver.resolve_or_create("alice", 7).await.unwrap();
        let second = resolver.resolve_or_create("alice", 7).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.balance, Decimal::ZERO);
        assert_eq!(store.accounts().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_provisioning_yields_one_row() {
        let store = MemoryLedgerStore::new();
        let resolver = Arc::new(resolver(&store));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve_or_create("newcomer", 42).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }

        ids.dedup();
        assert_eq!(ids.len(), 1, "all callers must see the same account");
        assert_eq!(store.accounts().len(), 1);
    }

    #[tokio::test]
    async fn test_external_id_mismatch_is_conflict() {
        let store = MemoryLedgerStore::new();
        let resolver = resolver(&store);
        resolver.resolve_or_create("alice", 7).await.unwrap();

        let err = resolver.resolve_or_create("alice", 99).await.unwrap_err();
        assert!(matches!(err, LedgerError::IdentityConflict(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_external_id_owned_by_other_username() {
        let store = MemoryLedgerStore::new();
        let resolver = resolver(&store);
        resolver.resolve_or_create("alice", 7).await.unwrap();

        // authority renamed alice -> alicia, ledger still has the old row
        let err = resolver.resolve_or_create("alicia", 7).await.unwrap_err();
        assert!(matches!(err, LedgerError::IdentityConflict(_)), "got {err:?}");
        assert_eq!(store.accounts().len(), 1);
    }

    #[tokio::test]
    async fn test_find_missing() {
        let store = MemoryLedgerStore::new();
        assert!(resolver(&store).find("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lost_insert_race_returns_existing_row() {
        let store = MemoryLedgerStore::new();
        store.arm_insert_race();

        let account = resolver(&store).resolve_or_create("alice", 7).await.unwrap();

        assert_eq!(account.external_user_id, 7);
        assert_eq!(store.accounts(), vec![account]);
    }

    #[tokio::test]
    async fn test_provisioning_conflicts_are_retried() {
        let store = MemoryLedgerStore::new();
        store.inject_conflicts(2);
        let account = resolver(&store).resolve_or_create("alice", 7).await.unwrap();
        assert_eq!(store.accounts(), vec![account]);

        store.inject_conflicts(3);
        let err = resolver(&store).resolve_or_create("bob", 8).await.unwrap_err();
        assert_eq!(err, LedgerError::StorageConflict { attempts: 3 });
        assert_eq!(store.accounts().len(), 1);
    }
}

