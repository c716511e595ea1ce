//! Ledger core
//!
//! Accounts keyed by username and external user id, an immutable
//! transaction log, and the transfer engine that moves funds between them.
//!
//! # Components
//!
//! - [`store`] - storage seam (`LedgerStore` / `LedgerTx`), PostgreSQL and in-memory backends
//! - [`accounts`] - username → account resolution with lazy provisioning
//! - [`engine`] - the transfer protocol
//! - [`history`] - paginated history, newest first

pub mod accounts;
pub mod engine;
pub mod error;
pub mod history;
pub mod models;
pub mod store;

// Re-exports for convenience
pub use accounts::AccountResolver;
pub use engine::{EngineSettings, TransferEngine};
pub use error::LedgerError;
pub use models::{Account, AccountId, ExternalUserId, Page, Transaction, TransactionId};
pub use store::{LedgerStore, LedgerTx, MemoryLedgerStore, PgLedgerStore, StoreError};
