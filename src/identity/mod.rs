//! Identity Authority client adapter
//!
//! The ledger never authenticates anyone itself. It asks the identity
//! authority two questions over HTTP:
//!
//! - `POST /verify` with a bearer token: who is calling?
//! - `POST /check-user {username}`: which external id owns this username?
//!
//! Failures collapse into [`IdentityError`]; callers only decide between
//! retrying (`Unavailable`) and aborting (everything else).

pub mod client;

pub use client::HttpIdentityClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::models::ExternalUserId;

/// Caller as established by the identity authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub external_user_id: ExternalUserId,
    pub username: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Network error, timeout, 5xx, or unreadable response. Retryable.
    #[error("identity authority unavailable: {0}")]
    Unavailable(String),

    #[error("user not registered")]
    UnknownUser,

    #[error("token rejected")]
    InvalidToken,
}

#[async_trait]
pub trait IdentityAuthority: Send + Sync {
    async fn verify_token(&self, token: &str) -> Result<CallerIdentity, IdentityError>;

    async fn lookup_user(&self, username: &str) -> Result<ExternalUserId, IdentityError>;
}
