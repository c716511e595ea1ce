use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::{info, warn};
use validator::Validate;

use super::error::AuthorityError;
use super::password::{hash_password, verify_password};
use super::token::TokenSigner;
use crate::db::Database;

/// User Registration Request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 50))]
    pub username: String,
    #[validate(email, length(max = 100))]
    pub email: String,
    #[validate(length(min = 8))]
    pub password: String,
}

/// `POST /token` form body
#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    #[validate(length(min = 8))]
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckUserRequest {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserOut {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Answer of `/verify` and `/check-user`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for UserOut {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            created_at: row.created_at,
        }
    }
}

const USER_COLUMNS: &str = "id, username, email, password_hash, created_at";

pub struct AuthorityService {
    db: Database,
    signer: TokenSigner,
}

impl AuthorityService {
    pub fn new(db: Database, signer: TokenSigner) -> Self {
        Self { db, signer }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Register a new user
    pub async fn register(&self, req: RegisterRequest) -> Result<UserOut, AuthorityError> {
        req.validate()?;
        let password_hash = hash_password(&req.password)?;

        let row: UserRow = sqlx::query_as(&format!(
            "INSERT INTO users (username, email, password_hash) VALUES ($1, $2, $3) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&req.username)
        .bind(&req.email)
        .bind(&password_hash)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| {
            let err = AuthorityError::from(e);
            if err == AuthorityError::AlreadyRegistered {
                warn!(username = %req.username, "registration for existing user");
            }
            err
        })?;

        info!(user_id = row.id, username = %row.username, "user registered");
        Ok(row.into())
    }

    /// Password grant: issue a bearer token
    pub async fn login(&self, form: TokenForm) -> Result<TokenResponse, AuthorityError> {
        let user = self
            .user_by_username(&form.username)
            .await?
            .ok_or(AuthorityError::BadCredentials)?;

        if !verify_password(&form.password, &user.password_hash) {
            warn!(username = %form.username, "login with wrong password");
            return Err(AuthorityError::BadCredentials);
        }

        Ok(TokenResponse {
            access_token: self.signer.issue(user.id)?,
            token_type: "bearer".to_string(),
        })
    }

    /// Resolve a bearer token to its user. A token for a deleted user is invalid.
    pub async fn authenticate(&self, token: &str) -> Result<UserRef, AuthorityError> {
        let user = self.user_for_token(token).await?;
        Ok(UserRef {
            id: user.id,
            username: user.username,
        })
    }

    pub async fn change_password(
        &self,
        token: &str,
        req: ChangePasswordRequest,
    ) -> Result<UserOut, AuthorityError> {
        req.validate()?;
        let user = self.user_for_token(token).await?;
        if !verify_password(&req.old_password, &user.password_hash) {
            return Err(AuthorityError::WrongPassword);
        }

        let new_hash = hash_password(&req.new_password)?;
        sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
            .bind(&new_hash)
            .bind(user.id)
            .execute(self.db.pool())
            .await?;

        info!(user_id = user.id, "password changed");
        Ok(user.into())
    }

    pub async fn check_user(&self, username: &str) -> Result<UserRef, AuthorityError> {
        let user = self
            .user_by_username(username)
            .await?
            .ok_or(AuthorityError::UserNotFound)?;
        Ok(UserRef {
            id: user.id,
            username: user.username,
        })
    }

    async fn user_for_token(&self, token: &str) -> Result<UserRow, AuthorityError> {
        let user_id = self.signer.verify(token)?.user_id()?;
        let user: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
                .bind(user_id)
                .fetch_optional(self.db.pool())
                .await?;
        user.ok_or(AuthorityError::InvalidToken)
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<UserRow>, AuthorityError> {
        Ok(
            sqlx::query_as(&format!("SELECT {} FROM users WHERE username = $1", USER_COLUMNS))
                .bind(username)
                .fetch_optional(self.db.pool())
                .await?,
        )
    }
}
