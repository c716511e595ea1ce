//! Bearer tokens: HS256 JWTs carrying the user id as `sub`.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use super::error::AuthorityError;

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    pub sub: String, // user id as string
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, AuthorityError> {
        self.sub.parse().map_err(|_| AuthorityError::InvalidToken)
    }
}

#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    pub fn issue(&self, user_id: i64) -> Result<String, AuthorityError> {
        self.issue_at(user_id, Utc::now())
    }

    pub fn issue_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<String, AuthorityError> {
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthorityError::Internal(format!("Failed to generate token: {}", e)))
    }

    /// Signature and expiry check. Any failure is `InvalidToken`.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthorityError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "token rejected");
                AuthorityError::InvalidToken
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let signer = TokenSigner::new("test-secret", 30);
        let token = signer.issue(42).unwrap();
        let claims = signer.verify(&token).unwrap();
        assert_eq!(claims.user_id().unwrap(), 42);
        assert_eq!(claims.exp - claims.iat, 30 * 60);
    }

    #[test]
    fn test_expired_token_rejected() {
        let signer = TokenSigner::new("test-secret", 30);
        let token = signer
            .issue_at(42, Utc::now() - Duration::hours(2))
            .unwrap();
        assert_eq!(signer.verify(&token), Err(AuthorityError::InvalidToken));
    }

    #[test]
    fn test_foreign_secret_rejected() {
        let token = TokenSigner::new("secret-a", 30).issue(1).unwrap();
        let other = TokenSigner::new("secret-b", 30);
        assert_eq!(other.verify(&token), Err(AuthorityError::InvalidToken));
        assert_eq!(other.verify("not-a-jwt"), Err(AuthorityError::InvalidToken));
    }

    #[test]
    fn test_non_numeric_subject() {
        let claims = Claims {
            sub: "alice".into(),
            iat: 0,
            exp: 0,
        };
        assert_eq!(claims.user_id(), Err(AuthorityError::InvalidToken));
    }
}
