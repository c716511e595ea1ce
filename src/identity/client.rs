//! HTTP client for the identity authority

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CallerIdentity, IdentityAuthority, IdentityError};
use crate::ledger::models::ExternalUserId;

#[derive(Deserialize)]
struct VerifyResponse {
    id: ExternalUserId,
    username: String,
}

#[derive(Serialize)]
struct CheckUserRequest<'a> {
    username: &'a str,
}

#[derive(Deserialize)]
struct CheckUserResponse {
    id: ExternalUserId,
}

/// Identity authority reached over HTTP with a bounded per-request timeout
pub struct HttpIdentityClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                IdentityError::Unavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Transport failures are always transient; a timeout must never hang the caller.
fn transport_error(op: &str, e: reqwest::Error) -> IdentityError {
    if e.is_timeout() {
        warn!(op, "identity authority timed out");
        IdentityError::Unavailable(format!("{} timed out", op))
    } else {
        warn!(op, error = %e, "identity authority request failed");
        IdentityError::Unavailable(format!("{} failed: {}", op, e))
    }
}

/// 5xx and 429 are transient; any other non-success is permanent.
fn status_error(status: StatusCode, permanent: IdentityError) -> IdentityError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        IdentityError::Unavailable(format!("authority responded {}", status))
    } else {
        permanent
    }
}

#[async_trait]
impl IdentityAuthority for HttpIdentityClient {
    async fn verify_token(&self, token: &str) -> Result<CallerIdentity, IdentityError> {
        let response = self
            .client
            .post(format!("{}/verify", self.base_url))
            .bearer_auth(token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| transport_error("verify", e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(%status, "token verification rejected");
            return Err(status_error(status, IdentityError::InvalidToken));
        }

        let body: VerifyResponse = response.json().await.map_err(|e| {
            IdentityError::Unavailable(format!("Failed to parse verify response: {}", e))
        })?;

        Ok(CallerIdentity {
            external_user_id: body.id,
            username: body.username,
        })
    }

    async fn lookup_user(&self, username: &str) -> Result<ExternalUserId, IdentityError> {
        let response = self
            .client
            .post(format!("{}/check-user", self.base_url))
            .json(&CheckUserRequest { username })
            .send()
            .await
            .map_err(|e| transport_error("check-user", e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(%status, username, "user lookup rejected");
            return Err(status_error(status, IdentityError::UnknownUser));
        }

        let body: CheckUserResponse = response.json().await.map_err(|e| {
            IdentityError::Unavailable(format!("Failed to parse check-user response: {}", e))
        })?;

        Ok(body.id)
    }
}
