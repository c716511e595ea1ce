//! Identity authority service
//!
//! Owns the `users` table, password hashes and bearer tokens. The ledger
//! only reaches it through `/verify` and `/check-user`.

pub mod error;
pub mod handlers;
pub mod password;
pub mod service;
pub mod token;

pub use error::AuthorityError;
pub use service::AuthorityService;
pub use token::{Claims, TokenSigner};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

pub fn router(service: Arc<AuthorityService>) -> Router {
    Router::new()
        .route("/register", post(handlers::register))
        .route("/token", post(handlers::token))
        .route("/change-password", post(handlers::change_password))
        .route("/verify", post(handlers::verify))
        .route("/check-user", post(handlers::check_user))
        .route("/health", get(handlers::health))
        .with_state(service)
}
