//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Top-level watcher configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Database file path.
    pub db_path: String,
    /// Bind address for the admin API.
    pub bind_addr: String,
    /// Interval between update cycles.
    pub poll_interval: Duration,
    /// How far back a cold cache will scan (the per-cycle watermark).
    pub lookback: Duration,
    /// How long dedup entries are retained. Must comfortably exceed
    /// `lookback` or an outage can turn into duplicate deliveries.
    pub retention: Duration,
    /// Upper bound on pages fetched per source per cycle.
    pub max_pages: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/trackwatch.db".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            poll_interval: Duration::from_secs(60),
            lookback: Duration::from_secs(3600),
            retention: Duration::from_secs(86_400),
            max_pages: 10,
        }
    }
}

impl WatchConfig {
    /// Build from `TRACKWATCH_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("TRACKWATCH_DB_PATH") {
            cfg.db_path = v;
        }
        if let Ok(v) = std::env::var("TRACKWATCH_BIND") {
            cfg.bind_addr = v;
        }
        cfg.poll_interval = duration_var("TRACKWATCH_POLL_INTERVAL_SECS", cfg.poll_interval)?;
        cfg.lookback = duration_var("TRACKWATCH_LOOKBACK_SECS", cfg.lookback)?;
        cfg.retention = duration_var("TRACKWATCH_RETENTION_SECS", cfg.retention)?;
        if let Ok(v) = std::env::var("TRACKWATCH_MAX_PAGES") {
            cfg.max_pages = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "TRACKWATCH_MAX_PAGES".into(),
                message: format!("not a number: {v}"),
            })?;
        }
        Ok(cfg)
    }
}

/// SoundCloud API credentials.
#[derive(Debug, Clone)]
pub struct SoundcloudConfig {
    pub client_id: String,
    /// OAuth token for the authenticated user's stream endpoint.
    pub oauth_token: SecretString,
}

impl SoundcloudConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            client_id: require_var("SOUNDCLOUD_CLIENT_ID")?,
            oauth_token: SecretString::from(require_var("SOUNDCLOUD_OAUTH_TOKEN")?),
        })
    }
}

/// Discord bot credentials.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub bot_token: SecretString,
}

impl DiscordConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bot_token: SecretString::from(require_var("DISCORD_BOT_TOKEN")?),
        })
    }
}

fn require_var(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn duration_var(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(v) => {
            let secs: u64 = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("not a number: {v}"),
            })?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}
