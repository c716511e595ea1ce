//! Ledger HTTP surface
//!
//! Every route except `/health` sits behind [`middleware::bearer_auth`],
//! which resolves the bearer token through the identity authority.

pub mod handlers;
pub mod middleware;
pub mod state;
pub mod types;

pub use state::AppState;

use anyhow::Context;
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;

pub fn router(state: Arc<AppState>) -> Router {
    let private_routes = Router::new()
        .route("/transfer", post(handlers::transfer))
        .route("/transactions", get(handlers::list_transactions))
        .route(
            "/account",
            get(handlers::get_account).post(handlers::open_account),
        )
        .layer(from_fn_with_state(state.clone(), middleware::bearer_auth));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(private_routes)
        .with_state(state)
}

/// Serve `app` on `host:port` until Ctrl-C.
pub async fn run_server(host: &str, port: u16, app: Router) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {} (port already in use?)", addr))?;

    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install Ctrl-C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
