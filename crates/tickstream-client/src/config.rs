//! Application configuration.
//!
//! Layered TOML config with serde defaults. API keys merge from two
//! sources: the `[keys]` table and the `FINNHUB_API_KEY` family of
//! environment variables, so deployments can keep keys out of the file.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tickstream_core::Symbol;
use tickstream_keys::PoolConfig;
use tickstream_ws::ConnectionConfig;

/// Environment variables probed for API keys, in rotation order.
const KEY_ENV_VARS: [&str; 4] = [
    "FINNHUB_API_KEY",
    "FINNHUB_API_KEY_2",
    "FINNHUB_API_KEY_3",
    "FINNHUB_API_KEY_4",
];

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    /// Symbols subscribed at startup.
    #[serde(default)]
    pub watchlist: Vec<String>,
}

/// Stream connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Provider WebSocket URL without the token query parameter.
    #[serde(default = "default_url")]
    pub url: String,
    /// Inbound silence tolerated before the session is torn down (ms).
    #[serde(default = "default_staleness_timeout_ms")]
    pub staleness_timeout_ms: u64,
    /// Base delay for reconnect backoff (ms).
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for reconnect backoff (ms).
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// A session older than this resets the backoff sequence (ms).
    #[serde(default = "default_stable_reset_ms")]
    pub stable_reset_ms: u64,
    /// Maximum reconnect attempts (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
}

fn default_url() -> String {
    "wss://ws.finnhub.io".to_string()
}

fn default_staleness_timeout_ms() -> u64 {
    30_000
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_stable_reset_ms() -> u64 {
    60_000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            staleness_timeout_ms: default_staleness_timeout_ms(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            stable_reset_ms: default_stable_reset_ms(),
            max_reconnect_attempts: 0,
        }
    }
}

/// Credential pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    /// API keys listed directly in the file. Environment keys are appended.
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Base cooldown after the first rate-limit report (ms).
    #[serde(default = "default_cooldown_base_ms")]
    pub cooldown_base_ms: u64,
    /// Maximum cooldown regardless of consecutive rate limits (ms).
    #[serde(default = "default_cooldown_max_ms")]
    pub cooldown_max_ms: u64,
    /// How long a connect attempt waits for a credential (ms).
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_cooldown_base_ms() -> u64 {
    10_000
}

fn default_cooldown_max_ms() -> u64 {
    900_000
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            cooldown_base_ms: default_cooldown_base_ms(),
            cooldown_max_ms: default_cooldown_max_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration.
    ///
    /// Uses `TICKSTREAM_CONFIG` or `config/default.toml`; falls back to
    /// defaults if no file exists.
    pub fn load() -> AppResult<Self> {
        let config_path = std::env::var("TICKSTREAM_CONFIG")
            .unwrap_or_else(|_| "config/default.toml".to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Connection configuration for the WebSocket layer.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.stream.url.clone(),
            max_reconnect_attempts: self.stream.max_reconnect_attempts,
            reconnect_base_delay_ms: self.stream.reconnect_base_delay_ms,
            reconnect_max_delay_ms: self.stream.reconnect_max_delay_ms,
            stable_reset_ms: self.stream.stable_reset_ms,
            staleness_timeout_ms: self.stream.staleness_timeout_ms,
            acquire_timeout_ms: self.keys.acquire_timeout_ms,
        }
    }

    /// Pool configuration for the credential layer.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            cooldown_base_ms: self.keys.cooldown_base_ms,
            cooldown_max_ms: self.keys.cooldown_max_ms,
        }
    }

    /// Merge configured and environment API keys, in rotation order.
    /// Blank entries are skipped; duplicates keep their first position.
    pub fn resolve_api_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();

        let candidates = self
            .keys
            .api_keys
            .iter()
            .cloned()
            .chain(KEY_ENV_VARS.iter().filter_map(|var| std::env::var(var).ok()));

        for key in candidates {
            let key = key.trim().to_string();
            if !key.is_empty() && !keys.contains(&key) {
                keys.push(key);
            }
        }

        keys
    }

    /// Watchlist as typed symbols, blanks skipped.
    pub fn watchlist_symbols(&self) -> Vec<Symbol> {
        self.watchlist
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| Symbol::new(s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.stream.url, "wss://ws.finnhub.io");
        assert_eq!(config.stream.staleness_timeout_ms, 30_000);
        assert_eq!(config.keys.cooldown_base_ms, 10_000);
        assert!(config.watchlist.is_empty());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
            watchlist = ["AAPL", "msft"]

            [stream]
            staleness_timeout_ms = 15000

            [keys]
            api_keys = ["k1", "k2"]
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.stream.staleness_timeout_ms, 15_000);
        // Unspecified fields keep their defaults.
        assert_eq!(config.stream.reconnect_base_delay_ms, 1_000);
        assert_eq!(config.keys.api_keys, vec!["k1", "k2"]);
        assert_eq!(
            config.watchlist_symbols(),
            vec![Symbol::new("AAPL"), Symbol::new("MSFT")]
        );
    }

    #[test]
    fn test_resolve_api_keys_skips_blanks_and_duplicates() {
        let mut config = AppConfig::default();
        config.keys.api_keys = vec![
            "alpha".to_string(),
            "  ".to_string(),
            "beta".to_string(),
            "alpha".to_string(),
        ];

        assert_eq!(config.resolve_api_keys(), vec!["alpha", "beta"]);
    }
}
