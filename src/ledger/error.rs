//! Ledger Error Types
//!
//! Every caller-visible failure of the transfer engine and query layer.

use rust_decimal::Decimal;
use thiserror::Error;

use super::store::StoreError;
use crate::identity::IdentityError;

/// Ledger error types
///
/// `code()` is the stable machine-readable code returned by the HTTP surface.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    // === Validation Errors ===
    #[error("Amount must be positive with at most 8 decimal places")]
    InvalidAmount,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Sender and receiver cannot be the same account")]
    SelfTransfer,

    // === Business Errors ===
    #[error("Receiver not found: {0}")]
    UnknownReceiver(String),

    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Account not found for user {0}")]
    UnknownAccount(String),

    #[error("Identity mismatch: {0}")]
    IdentityConflict(String),

    // === Authentication Errors ===
    #[error("Missing or malformed bearer token")]
    Unauthenticated,

    #[error("Invalid token")]
    InvalidToken,

    // === Transient Errors ===
    #[error("Identity service unavailable: {0}")]
    IdentityUnavailable(String),

    #[error("Storage conflict persisted after {attempts} attempts")]
    StorageConflict { attempts: u32 },

    // === System Errors ===
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount => "INVALID_AMOUNT",
            LedgerError::InvalidRequest(_) => "INVALID_REQUEST",
            LedgerError::SelfTransfer => "SELF_TRANSFER",
            LedgerError::UnknownReceiver(_) => "UNKNOWN_RECEIVER",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::UnknownAccount(_) => "UNKNOWN_ACCOUNT",
            LedgerError::IdentityConflict(_) => "IDENTITY_CONFLICT",
            LedgerError::Unauthenticated => "UNAUTHENTICATED",
            LedgerError::InvalidToken => "INVALID_TOKEN",
            LedgerError::IdentityUnavailable(_) => "IDENTITY_UNAVAILABLE",
            LedgerError::StorageConflict { .. } => "STORAGE_CONFLICT",
            LedgerError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::InvalidAmount
            | LedgerError::InvalidRequest(_)
            | LedgerError::SelfTransfer
            | LedgerError::InsufficientFunds { .. } => 400,
            LedgerError::Unauthenticated | LedgerError::InvalidToken => 401,
            LedgerError::UnknownReceiver(_) | LedgerError::UnknownAccount(_) => 404,
            LedgerError::IdentityConflict(_) => 409,
            LedgerError::Storage(_) => 500,
            LedgerError::IdentityUnavailable(_) => 502,
            LedgerError::StorageConflict { .. } => 503,
        }
    }

    /// Whether the whole request may be retried unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::IdentityUnavailable(_) | LedgerError::StorageConflict { .. }
        )
    }

    /// Map a failed `LookupUser` for the receiver
    pub fn from_receiver_lookup(err: IdentityError, username: &str) -> Self {
        match err {
            IdentityError::UnknownUser => LedgerError::UnknownReceiver(username.to_string()),
            IdentityError::InvalidToken => LedgerError::InvalidToken,
            IdentityError::Unavailable(msg) => LedgerError::IdentityUnavailable(msg),
        }
    }

    /// Map a failed `VerifyToken`
    pub fn from_token_check(err: IdentityError) -> Self {
        match err {
            IdentityError::UnknownUser | IdentityError::InvalidToken => LedgerError::InvalidToken,
            IdentityError::Unavailable(msg) => LedgerError::IdentityUnavailable(msg),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(_) | StoreError::UniqueViolation(_) => {
                LedgerError::StorageConflict { attempts: 1 }
            }
            other => LedgerError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::InvalidAmount.code(), "INVALID_AMOUNT");
        assert_eq!(LedgerError::SelfTransfer.code(), "SELF_TRANSFER");
        assert_eq!(
            LedgerError::InsufficientFunds {
                available: Decimal::from(10),
                requested: Decimal::from(50),
            }
            .code(),
            "INSUFFICIENT_FUNDS"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(LedgerError::InvalidAmount.http_status(), 400);
        assert_eq!(LedgerError::UnknownReceiver("bob".into()).http_status(), 404);
        assert_eq!(LedgerError::UnknownAccount("bob".into()).http_status(), 404);
        assert_eq!(LedgerError::InvalidToken.http_status(), 401);
        assert_eq!(
            LedgerError::IdentityUnavailable("timeout".into()).http_status(),
            502
        );
        assert_eq!(LedgerError::StorageConflict { attempts: 3 }.http_status(), 503);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(LedgerError::IdentityUnavailable("x".into()).is_retryable());
        assert!(LedgerError::StorageConflict { attempts: 3 }.is_retryable());
        assert!(!LedgerError::InvalidToken.is_retryable());
        assert!(
            !LedgerError::InsufficientFunds {
                available: Decimal::ZERO,
                requested: Decimal::ONE,
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_identity_mapping() {
        assert_eq!(
            LedgerError::from_receiver_lookup(IdentityError::UnknownUser, "bob"),
            LedgerError::UnknownReceiver("bob".to_string())
        );
        assert_eq!(
            LedgerError::from_token_check(IdentityError::UnknownUser),
            LedgerError::InvalidToken
        );
        assert!(matches!(
            LedgerError::from_token_check(IdentityError::Unavailable("down".into())),
            LedgerError::IdentityUnavailable(_)
        ));
    }

    #[test]
    fn test_display() {
        let err = LedgerError::InsufficientFunds {
            available: Decimal::from(10),
            requested: Decimal::from(50),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: available 10, requested 50"
        );
    }
}
