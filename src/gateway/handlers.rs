use axum::{
    Extension, Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
};
use std::sync::Arc;
use validator::Validate;

use super::state::AppState;
use super::types::{AccountOut, HealthResponse, HistoryQuery, TransactionOut, TransferRequest};
use crate::identity::CallerIdentity;
use crate::ledger::LedgerError;

/// POST /transfer
pub async fn transfer(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> Result<Json<TransactionOut>, LedgerError> {
    let Json(req) = payload.map_err(|e| LedgerError::InvalidRequest(e.body_text()))?;
    req.validate()
        .map_err(|e| LedgerError::InvalidRequest(e.to_string()))?;

    let tx = state
        .engine
        .transfer(&caller, &req.receiver_username, req.amount)
        .await?;
    Ok(Json(tx.into()))
}

/// GET /transactions?skip=&limit=
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<TransactionOut>>, LedgerError> {
    let Query(q) = query.map_err(|e| LedgerError::InvalidRequest(e.body_text()))?;
    let page = state.engine.resolve_page(q.skip, q.limit)?;
    let rows = state.engine.history_for(&caller, page).await?;
    Ok(Json(rows.into_iter().map(TransactionOut::from).collect()))
}

/// GET /account
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
) -> Result<Json<AccountOut>, LedgerError> {
    let account = state.engine.account_for(&caller).await?;
    Ok(Json(account.into()))
}

/// POST /account (idempotent)
pub async fn open_account(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
) -> Result<Json<AccountOut>, LedgerError> {
    let account = state.engine.open_account(&caller).await?;
    Ok(Json(account.into()))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    match state.engine.store().health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                version: state.version,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "storage health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    version: state.version,
                }),
            )
        }
    }
}
