use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

/// Runtime configuration resolved from the process environment.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub bind_addr: SocketAddr,
    pub master_secret: String,
    pub kdf_salt: String,
    pub vault_url: String,
    pub vault_token: String,
    pub events_api_url: Option<String>,
    pub events_api_token: Option<String>,
    pub audit_fallback_path: PathBuf,
    pub vault_fetch_timeout: Duration,
}

impl BrokerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = optional_env("BROKER_BIND_ADDRESS")
            .unwrap_or_else(|| "0.0.0.0:8080".into())
            .parse()
            .context("BROKER_BIND_ADDRESS is not a valid socket address")?;

        let master_secret =
            std::env::var("BROKER_MASTER_SECRET").context("BROKER_MASTER_SECRET is required")?;
        let kdf_salt = std::env::var("BROKER_KDF_SALT").context("BROKER_KDF_SALT is required")?;

        let vault_url = std::env::var("VAULT_API_URL").context("VAULT_API_URL is required")?;
        let vault_token = std::env::var("VAULT_API_TOKEN").context("VAULT_API_TOKEN is required")?;

        let events_api_url = optional_env("EVENTS_API_URL");
        let events_api_token = optional_env("EVENTS_API_TOKEN");

        let audit_fallback_path = optional_env("AUDIT_FALLBACK_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("logs/audit.log"));

        let vault_fetch_timeout = match optional_env("VAULT_FETCH_TIMEOUT_SECS") {
            Some(value) => Duration::from_secs(
                value
                    .parse()
                    .context("VAULT_FETCH_TIMEOUT_SECS must be an integer")?,
            ),
            None => Duration::from_secs(10),
        };

        Ok(Self {
            bind_addr,
            master_secret,
            kdf_salt,
            vault_url,
            vault_token,
            events_api_url,
            events_api_token,
            audit_fallback_path,
            vault_fetch_timeout,
        })
    }

    /// True when an external events sink is fully configured; the
    /// audit trail runs local-only otherwise.
    pub fn events_sink(&self) -> Option<(&str, &str)> {
        match (self.events_api_url.as_deref(), self.events_api_token.as_deref()) {
            (Some(url), Some(token)) => Some((url, token)),
            _ => None,
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}
