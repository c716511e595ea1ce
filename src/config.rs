use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub identity: IdentityClientConfig,
    #[serde(default)]
    pub authority: AuthorityConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    pub host: String,
    pub port: u16,
    /// Balance a lazily provisioned account starts with
    #[serde(default)]
    pub default_balance: Decimal,
    #[serde(default = "default_history_limit")]
    pub history_default_limit: i64,
    #[serde(default = "default_history_max_limit")]
    pub history_max_limit: i64,
    /// Attempts for provisioning races and lock conflicts before giving up
    #[serde(default = "default_conflict_retries")]
    pub max_conflict_retries: u32,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_history_limit() -> i64 {
    10
}

fn default_history_max_limit() -> i64 {
    100
}

fn default_conflict_retries() -> u32 {
    3
}

fn default_lock_timeout_ms() -> u64 {
    2000
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            default_balance: Decimal::ZERO,
            history_default_limit: default_history_limit(),
            history_max_limit: default_history_max_limit(),
            max_conflict_retries: default_conflict_retries(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[serde(default)]
    pub postgres_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            postgres_url: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IdentityClientConfig {
    pub base_url: String,
    #[serde(default = "default_identity_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_identity_timeout_ms() -> u64 {
    3000
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthorityConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_minutes")]
    pub token_ttl_minutes: i64,
}

fn default_token_ttl_minutes() -> i64 {
    30
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            postgres_url: None,
            jwt_secret: String::new(),
            token_ttl_minutes: default_token_ttl_minutes(),
        }
    }
}

impl AppConfig {
    /// Load `config/{env}.yaml`, then apply environment overrides.
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path))?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Secrets and URLs may come from the environment instead of the YAML file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("TRANS_DATABASE_URL") {
            self.storage.postgres_url = Some(url);
        }
        if let Some(url) = lookup("AUTH_SERVICE_URL") {
            self.identity.base_url = url;
        }
        if let Some(url) = lookup("AUTH_DATABASE_URL") {
            self.authority.postgres_url = Some(url);
        }
        if let Some(secret) = lookup("SECRET_KEY") {
            self.authority.jwt_secret = secret;
        }
        if let Some(ttl) = lookup("ACCESS_TOKEN_EXPIRE_MINUTES") {
            self.authority.token_ttl_minutes = ttl
                .parse()
                .with_context(|| format!("Invalid ACCESS_TOKEN_EXPIRE_MINUTES: {}", ttl))?;
        }
        Ok(())
    }
}

/// Value following `--flag` on the command line, e.g. `--env prod`.
pub fn cli_value(args: &[String], flags: &[&str]) -> Option<String> {
    args.windows(2)
        .find(|pair| flags.contains(&pair[0].as_str()))
        .map(|pair| pair[1].clone())
}
