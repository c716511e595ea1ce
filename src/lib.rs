//! ledger_pair - a ledger service and its identity authority
//!
//! The ledger moves funds between named accounts with all-or-nothing
//! transfers and serves per-account history. Who a caller is, and whether a
//! username exists, is decided by a separate identity authority reached over
//! HTTP.
//!
//! # Modules
//!
//! - [`ledger`] - accounts, transactions, transfer engine, storage seam
//! - [`identity`] - identity authority client adapter
//! - [`gateway`] - ledger HTTP surface (bearer-authenticated)
//! - [`authority`] - the identity authority service (users, passwords, tokens)
//! - [`db`] - PostgreSQL pool and schema bootstrap
//! - [`config`] / [`logging`] - ambient configuration and tracing setup

pub mod authority;
pub mod config;
pub mod db;
pub mod gateway;
pub mod identity;
pub mod ledger;
pub mod logging;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use identity::{CallerIdentity, HttpIdentityClient, IdentityAuthority, IdentityError};
pub use ledger::{
    Account, EngineSettings, LedgerError, LedgerStore, MemoryLedgerStore, PgLedgerStore,
    Transaction, TransferEngine,
};
