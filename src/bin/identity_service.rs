//! Identity authority service
//!
//! Usage: `identity_service [--env dev] [--port 8080]`

use std::sync::Arc;

use anyhow::{Context, Result, bail};

use ledger_pair::authority::{self, AuthorityService, TokenSigner};
use ledger_pair::config::{AppConfig, cli_value};
use ledger_pair::db::{Database, schema::init_authority_schema};
use ledger_pair::gateway::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let env = cli_value(&args, &["--env", "-e"]).unwrap_or_else(|| "dev".to_string());

    let mut config = AppConfig::load(&env)?;
    if let Some(port) = cli_value(&args, &["--port"]) {
        config.authority.port = port
            .parse()
            .with_context(|| format!("Invalid --port: {}", port))?;
    }
    config.log_file = format!("identity_{}", config.log_file);

    let _log_guard = ledger_pair::logging::init_logging(&config);
    tracing::info!(
        env = %env,
        version = env!("GIT_HASH"),
        "starting identity authority"
    );

    let authority = &config.authority;
    if authority.jwt_secret.is_empty() {
        bail!("authority.jwt_secret (or SECRET_KEY) must be set");
    }
    if authority.token_ttl_minutes <= 0 {
        bail!("authority.token_ttl_minutes must be positive");
    }

    let url = authority
        .postgres_url
        .as_deref()
        .context("authority.postgres_url (or AUTH_DATABASE_URL) is required")?;
    let db = Database::connect(url)
        .await
        .context("Failed to connect to identity database")?;
    init_authority_schema(db.pool()).await?;

    let service = AuthorityService::new(
        db,
        TokenSigner::new(&authority.jwt_secret, authority.token_ttl_minutes),
    );

    run_server(
        &authority.host,
        authority.port,
        authority::router(Arc::new(service)),
    )
    .await
}
