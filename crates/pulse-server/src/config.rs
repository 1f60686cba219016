use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use pulse_api::state::ServiceConfig;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// How often the presence reaper runs.
    pub presence_heartbeat: Duration,
    /// Idle time after which a presence session is dropped.
    pub presence_ttl: Duration,
    pub store_timeout: Duration,
    pub broadcast_batch_size: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("PULSE_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PULSE_JWT_SECRET is unset or still a placeholder; it must match the identity provider's secret");
        }

        let config = Self {
            jwt_secret,
            db_path: lookup("PULSE_DB_PATH").unwrap_or_else(|| "pulse.db".into()).into(),
            host: lookup("PULSE_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "PULSE_PORT", 3000)?,
            presence_heartbeat: Duration::from_secs(parse_or(&lookup, "PULSE_PRESENCE_HEARTBEAT_SECS", 30)?),
            presence_ttl: Duration::from_secs(parse_or(&lookup, "PULSE_PRESENCE_TTL_SECS", 60)?),
            store_timeout: Duration::from_secs(parse_or(&lookup, "PULSE_STORE_TIMEOUT_SECS", 10)?),
            broadcast_batch_size: parse_or(&lookup, "PULSE_BROADCAST_BATCH", 100)?,
        };

        if config.presence_ttl <= config.presence_heartbeat {
            bail!(
                "PULSE_PRESENCE_TTL_SECS ({:?}) must be longer than PULSE_PRESENCE_HEARTBEAT_SECS ({:?})",
                config.presence_ttl,
                config.presence_heartbeat
            );
        }
        if config.broadcast_batch_size == 0 {
            bail!("PULSE_BROADCAST_BATCH must be at least 1");
        }
        Ok(config)
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            jwt_secret: self.jwt_secret.clone(),
            store_timeout: self.store_timeout,
            broadcast_batch_size: self.broadcast_batch_size,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw.parse().with_context(|| format!("invalid {}: '{}'", key, raw)),
        None => Ok(default),
    }
}
