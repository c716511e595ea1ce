//! Ledger service
//!
//! ```text
//! client ──Bearer──▶ gateway ──▶ TransferEngine ──▶ LedgerStore (PostgreSQL | memory)
//!                       │              │
//!                       └──────────────┴──▶ identity authority (/verify, /check-user)
//! ```
//!
//! Usage: `ledger_pair [--env dev] [--port 8081]`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use ledger_pair::config::{AppConfig, StorageBackend, cli_value};
use ledger_pair::db::{Database, schema::init_ledger_schema};
use ledger_pair::gateway::{self, AppState};
use ledger_pair::identity::HttpIdentityClient;
use ledger_pair::ledger::{
    EngineSettings, LedgerStore, MemoryLedgerStore, PgLedgerStore, TransferEngine,
};

async fn open_store(config: &AppConfig) -> Result<Arc<dyn LedgerStore>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage; balances are lost on exit");
            Ok(Arc::new(MemoryLedgerStore::new()))
        }
        StorageBackend::Postgres => {
            let url = config
                .storage
                .postgres_url
                .as_deref()
                .context("storage.postgres_url (or TRANS_DATABASE_URL) is required")?;
            let db = Database::connect(url)
                .await
                .context("Failed to connect to ledger database")?;
            init_ledger_schema(db.pool()).await?;
            tracing::info!("ledger database ready");
            Ok(Arc::new(PgLedgerStore::new(
                db.pool().clone(),
                config.ledger.lock_timeout_ms,
            )))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let env = cli_value(&args, &["--env", "-e"]).unwrap_or_else(|| "dev".to_string());

    let mut config = AppConfig::load(&env)?;
    if let Some(port) = cli_value(&args, &["--port"]) {
        config.ledger.port = port
            .parse()
            .with_context(|| format!("Invalid --port: {}", port))?;
    }

    let _log_guard = ledger_pair::logging::init_logging(&config);
    tracing::info!(
        env = %env,
        version = env!("GIT_HASH"),
        "starting ledger service"
    );

    let store = open_store(&config).await?;
    tracing::info!(backend = store.name(), "ledger store ready");

    let identity = HttpIdentityClient::new(
        config.identity.base_url.clone(),
        Duration::from_millis(config.identity.timeout_ms),
    )?;
    tracing::info!(base_url = identity.base_url(), "identity authority client ready");

    let engine = Arc::new(TransferEngine::new(
        store,
        Arc::new(identity),
        EngineSettings::from(&config.ledger),
    ));

    let app = gateway::router(Arc::new(AppState::new(engine)));
    gateway::run_server(&config.ledger.host, config.ledger.port, app).await
}
