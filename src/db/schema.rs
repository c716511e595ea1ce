//! Table definitions for both services.
//!
//! Statements are idempotent so they can run on every start-up.

use anyhow::{Context, Result};
use sqlx::PgPool;

const CREATE_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id               BIGSERIAL PRIMARY KEY,
    external_user_id BIGINT NOT NULL UNIQUE,
    username         VARCHAR(50) NOT NULL UNIQUE,
    balance          NUMERIC(30, 8) NOT NULL DEFAULT 0,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id          BIGSERIAL PRIMARY KEY,
    sender_id   BIGINT NOT NULL REFERENCES accounts(id),
    receiver_id BIGINT NOT NULL REFERENCES accounts(id),
    amount      NUMERIC(30, 8) NOT NULL CHECK (amount > 0),
    timestamp   TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_TRANSACTIONS_SENDER_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_sender_ts
    ON transactions (sender_id, timestamp DESC)
"#;

const CREATE_TRANSACTIONS_RECEIVER_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_receiver_ts
    ON transactions (receiver_id, timestamp DESC)
"#;

const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id            BIGSERIAL PRIMARY KEY,
    username      VARCHAR(50) NOT NULL UNIQUE,
    email         VARCHAR(100) NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Create the ledger tables (`accounts`, `transactions`).
pub async fn init_ledger_schema(pool: &PgPool) -> Result<()> {
    tracing::info!("Initializing ledger schema...");
    for (name, stmt) in [
        ("accounts", CREATE_ACCOUNTS_TABLE),
        ("transactions", CREATE_TRANSACTIONS_TABLE),
        ("idx_transactions_sender_ts", CREATE_TRANSACTIONS_SENDER_INDEX),
        ("idx_transactions_receiver_ts", CREATE_TRANSACTIONS_RECEIVER_INDEX),
    ] {
        sqlx::query(stmt)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create {}", name))?;
    }
    tracing::info!("Ledger schema initialized successfully");
    Ok(())
}

/// Create the identity authority's `users` table.
pub async fn init_authority_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(CREATE_USERS_TABLE)
        .execute(pool)
        .await
        .context("Failed to create users")?;
    tracing::info!("Authority schema initialized successfully");
    Ok(())
}
