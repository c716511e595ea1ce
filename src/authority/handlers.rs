use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::error::AuthorityError;
use super::service::{
    AuthorityService, ChangePasswordRequest, CheckUserRequest, RegisterRequest, TokenForm,
    TokenResponse, UserOut, UserRef,
};
use crate::gateway::{middleware, types::ErrorBody};

impl IntoResponse for AuthorityError {
    fn into_response(self) -> Response {
        if let AuthorityError::Internal(msg) = &self {
            tracing::error!("identity authority failure: {}", msg);
        }
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (
            status,
            Json(ErrorBody {
                code: self.code().to_string(),
                msg: self.to_string(),
            }),
        )
            .into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                header::HeaderValue::from_static("Bearer"),
            );
        }
        response
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthorityError> {
    middleware::bearer_token(headers).ok_or(AuthorityError::MissingToken)
}

/// POST /register
pub async fn register(
    State(svc): State<Arc<AuthorityService>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<UserOut>, AuthorityError> {
    Ok(Json(svc.register(req).await?))
}

/// POST /token (form: username, password)
pub async fn token(
    State(svc): State<Arc<AuthorityService>>,
    Form(form): Form<TokenForm>,
) -> Result<Json<TokenResponse>, AuthorityError> {
    Ok(Json(svc.login(form).await?))
}

/// POST /change-password
pub async fn change_password(
    State(svc): State<Arc<AuthorityService>>,
    headers: HeaderMap,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<UserOut>, AuthorityError> {
    let token = bearer_token(&headers)?;
    Ok(Json(svc.change_password(token, req).await?))
}

/// POST /verify
pub async fn verify(
    State(svc): State<Arc<AuthorityService>>,
    headers: HeaderMap,
) -> Result<Json<UserRef>, AuthorityError> {
    let token = bearer_token(&headers)?;
    Ok(Json(svc.authenticate(token).await?))
}

/// POST /check-user
pub async fn check_user(
    State(svc): State<Arc<AuthorityService>>,
    Json(req): Json<CheckUserRequest>,
) -> Result<Json<UserRef>, AuthorityError> {
    Ok(Json(svc.check_user(&req.username).await?))
}

/// GET /health
pub async fn health(State(svc): State<Arc<AuthorityService>>) -> StatusCode {
    match svc.database().health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "authority health check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
