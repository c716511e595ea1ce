//! Query layer: paginated transaction history, newest first.

use tracing::debug;

use super::engine::TransferEngine;
use super::error::LedgerError;
use super::models::{AccountId, Page, Transaction};
use crate::identity::CallerIdentity;

impl TransferEngine {
    /// Build a page from raw `skip`/`limit` query values.
    ///
    /// A missing limit takes the configured default; any limit is clamped to
    /// `[1, history_max_limit]`.
    pub fn resolve_page(&self, skip: Option<i64>, limit: Option<i64>) -> Result<Page, LedgerError> {
        let offset = skip.unwrap_or(0);
        if offset < 0 {
            return Err(LedgerError::InvalidRequest(
                "skip must not be negative".to_string(),
            ));
        }
        let max = self.settings.history_max_limit.max(1);
        let limit = limit
            .unwrap_or(self.settings.history_default_limit)
            .clamp(1, max);
        Ok(Page::new(offset, limit))
    }

    /// Transactions where `account_id` is sender or receiver
    pub async fn list_transactions(
        &self,
        account_id: AccountId,
        page: Page,
    ) -> Result<Vec<Transaction>, LedgerError> {
        if self.store.account_by_id(account_id).await?.is_none() {
            return Err(LedgerError::UnknownAccount(account_id.to_string()));
        }
        Ok(self.store.transactions_for(account_id, page).await?)
    }

    /// History of the caller's own account
    pub async fn history_for(
        &self,
        caller: &CallerIdentity,
        page: Page,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let account = self.account_for(caller).await?;
        let rows = self.store.transactions_for(account.id, page).await?;
        debug!(
            username = %caller.username,
            offset = page.offset,
            limit = page.limit,
            returned = rows.len(),
            "History served"
        );
        Ok(rows)
    }
}
