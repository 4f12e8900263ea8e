//! config/app_config.rs
//! Reads the service configuration from the environment (`.env` is loaded by main).

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:9093";
const DEFAULT_DATABASE_URL: &str = "sqlite:data/postmaster.db";
const DEFAULT_ENVIRONMENT: &str = "dev";
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_CONSUMER_BACKOFF_SECS: u64 = 10;

/// Credentials for the SMTP relay provider.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

/// Which provider outgoing mail is handed to.
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    SendGrid {
        api_key: String,
        ip_pool: Option<String>,
    },
    Smtp(SmtpConfig),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: String,
    /// `None` runs without a document store: consent checks fail open and
    /// sends go untracked.
    pub database_url: Option<String>,
    /// `None` runs the relay in direct mode.
    pub redis_url: Option<String>,
    pub environment: String,
    pub provider: ProviderConfig,
    pub webhook_password: Option<String>,
    pub consumer_backoff: Duration,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let consumer_backoff_secs = match non_empty("CONSUMER_BACKOFF_SECS") {
            Some(v) => v
                .parse::<u64>()
                .context("CONSUMER_BACKOFF_SECS must be a whole number of seconds")?,
            None => DEFAULT_CONSUMER_BACKOFF_SECS,
        };

        Ok(Self {
            listen_addr: non_empty("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            database_url: database_url_from(env::var("DATABASE_URL").ok()),
            redis_url: non_empty("REDIS_URL"),
            environment: non_empty("PM_ENVIRONMENT")
                .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
            provider: provider_from_env()?,
            webhook_password: non_empty("WEBHOOK_PASSWORD"),
            consumer_backoff: Duration::from_secs(consumer_backoff_secs),
            log_level: non_empty("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn queue_configured(&self) -> bool {
        self.redis_url.is_some()
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Unset falls back to the local file; explicitly empty disables the store.
fn database_url_from(raw: Option<String>) -> Option<String> {
    match raw {
        None => Some(DEFAULT_DATABASE_URL.to_string()),
        Some(v) if v.trim().is_empty() => None,
        Some(v) => Some(v.trim().to_string()),
    }
}

fn provider_from_env() -> Result<ProviderConfig> {
    if let Some(api_key) = non_empty("SENDGRID_API_KEY") {
        return Ok(ProviderConfig::SendGrid {
            api_key,
            ip_pool: non_empty("SENDGRID_IP_POOL"),
        });
    }

    let host = non_empty("SMTP_HOST")
        .ok_or_else(|| anyhow!("either SENDGRID_API_KEY or SMTP_HOST must be set"))?;
    let port = match non_empty("SMTP_PORT") {
        Some(p) => p.parse::<u16>().context("SMTP_PORT must be a port number")?,
        None => DEFAULT_SMTP_PORT,
    };

    Ok(ProviderConfig::Smtp(SmtpConfig {
        host,
        port,
        user: non_empty("SMTP_USER").unwrap_or_default(),
        pass: non_empty("SMTP_PASS").unwrap_or_default(),
    }))
}
