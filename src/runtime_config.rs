// =============================================================================
// Runtime Configuration — service settings
// =============================================================================
//
// Every field carries `#[serde(default)]` so that adding new fields never
// breaks loading an older config file.  Environment variables are applied on
// top of the file by `apply_env_overrides`.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Prefix of env vars that register a Telegram bot token per channel.
const BOT_TOKEN_ENV_PREFIX: &str = "TELEGRAM_BOT_";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_binance_base_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_user_store_path() -> String {
    "data/user_store.json".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_oi_retention_secs() -> u64 {
    30 * 60
}

fn default_oi_lookup_tolerance_secs() -> u64 {
    60
}

fn default_oi_alert_cooldown_secs() -> u64 {
    5 * 60
}

fn default_oi_windows_mins() -> Vec<u64> {
    vec![15, 30]
}

// =============================================================================
// MonitorParams
// =============================================================================

/// Timing parameters shared by every monitoring session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorParams {
    /// Period of a session's tick loop.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// How long OI samples are retained per symbol.
    #[serde(default = "default_oi_retention_secs")]
    pub oi_retention_secs: u64,

    /// Width of the look-back window around each OI reference offset.
    #[serde(default = "default_oi_lookup_tolerance_secs")]
    pub oi_lookup_tolerance_secs: u64,

    /// Minimum spacing between two OI alerts for the same symbol.
    #[serde(default = "default_oi_alert_cooldown_secs")]
    pub oi_alert_cooldown_secs: u64,

    /// OI comparison offsets in minutes, checked in order.
    #[serde(default = "default_oi_windows_mins")]
    pub oi_windows_mins: Vec<u64>,
}

impl Default for MonitorParams {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            oi_retention_secs: default_oi_retention_secs(),
            oi_lookup_tolerance_secs: default_oi_lookup_tolerance_secs(),
            oi_alert_cooldown_secs: default_oi_alert_cooldown_secs(),
            oi_windows_mins: default_oi_windows_mins(),
        }
    }
}

impl MonitorParams {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn oi_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.oi_retention_secs as i64)
    }

    pub fn oi_lookup_tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.oi_lookup_tolerance_secs as i64)
    }

    pub fn oi_alert_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.oi_alert_cooldown_secs as i64)
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration for the OI Pulse service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Exchange -----------------------------------------------------------

    /// Base URL of the USDⓈ-M futures REST API.
    #[serde(default = "default_binance_base_url")]
    pub binance_base_url: String,

    /// Optional symbol allow-list. Empty means every tradable perpetual.
    #[serde(default)]
    pub symbols: Vec<String>,

    // --- Delivery -----------------------------------------------------------

    /// Channel name → Telegram bot token.
    #[serde(default)]
    pub bots: HashMap<String, String>,

    /// Channel name → bot username, for deep links.
    #[serde(default)]
    pub bot_usernames: HashMap<String, String>,

    // --- Storage ------------------------------------------------------------

    /// Location of the per-user settings file.
    #[serde(default = "default_user_store_path")]
    pub user_store_path: String,

    // --- Monitoring ---------------------------------------------------------

    #[serde(default)]
    pub monitor: MonitorParams,

    // --- Admin API ----------------------------------------------------------

    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,

    /// Bearer token for authenticated endpoints. Empty rejects all of them.
    #[serde(default)]
    pub admin_token: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binance_base_url: default_binance_base_url(),
            symbols: Vec::new(),
            bots: HashMap::new(),
            bot_usernames: HashMap::new(),
            user_store_path: default_user_store_path(),
            monitor: MonitorParams::default(),
            api_bind_addr: default_api_bind_addr(),
            admin_token: String::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            channels = ?config.bots.keys().collect::<Vec<_>>(),
            tick_secs = config.monitor.tick_interval_secs,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Apply process environment on top of the loaded file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `(key, value)` overrides. Split out of `apply_env_overrides` so it
    /// can be exercised without touching the process environment.
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "BINANCE_BASE_URL" if !value.is_empty() => {
                    self.binance_base_url = value.trim_end_matches('/').to_string();
                }
                "OI_PULSE_SYMBOLS" => {
                    self.symbols = value
                        .split(',')
                        .map(|s| s.trim().to_uppercase())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
                "OI_PULSE_BIND_ADDR" if !value.is_empty() => self.api_bind_addr = value,
                "OI_PULSE_ADMIN_TOKEN" => self.admin_token = value,
                _ => {
                    if let Some(name) = key.strip_prefix(BOT_TOKEN_ENV_PREFIX) {
                        if !name.is_empty() && !value.is_empty() {
                            self.bots.insert(name.to_lowercase(), value);
                        }
                    }
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.binance_base_url, "https://fapi.binance.com");
        assert!(cfg.symbols.is_empty());
        assert_eq!(cfg.monitor.tick_interval_secs, 60);
        assert_eq!(cfg.monitor.oi_retention_secs, 1800);
        assert_eq!(cfg.monitor.oi_lookup_tolerance_secs, 60);
        assert_eq!(cfg.monitor.oi_alert_cooldown_secs, 300);
        assert_eq!(cfg.monitor.oi_windows_mins, vec![15, 30]);
        assert!(cfg.admin_token.is_empty());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.user_store_path, "data/user_store.json");
        assert_eq!(cfg.api_bind_addr, "0.0.0.0:3001");
        assert_eq!(cfg.monitor, MonitorParams::default());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "bots": { "bot1": "123:abc" },
            "monitor": { "tick_interval_secs": 30 }
        }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.bots.get("bot1").map(String::as_str), Some("123:abc"));
        assert_eq!(cfg.monitor.tick_interval_secs, 30);
        assert_eq!(cfg.monitor.oi_alert_cooldown_secs, 300);
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(vec![
            ("OI_PULSE_SYMBOLS".to_string(), "btcusdt, ethusdt,,".to_string()),
            ("TELEGRAM_BOT_BOT2".to_string(), "999:zzz".to_string()),
            ("OI_PULSE_ADMIN_TOKEN".to_string(), "secret".to_string()),
            ("BINANCE_BASE_URL".to_string(), "http://localhost:9000/".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ]);
        assert_eq!(cfg.symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(cfg.bots.get("bot2").map(String::as_str), Some("999:zzz"));
        assert_eq!(cfg.admin_token, "secret");
        assert_eq!(cfg.binance_base_url, "http://localhost:9000");
    }

    #[test]
    fn tick_interval_never_zero() {
        let params = MonitorParams {
            tick_interval_secs: 0,
            ..MonitorParams::default()
        };
        assert_eq!(params.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn load_reads_file_and_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        assert!(RuntimeConfig::load(&path).is_err());

        std::fs::write(&path, r#"{"admin_token": "t", "symbols": ["BTCUSDT"]}"#).unwrap();
        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.admin_token, "t");
        assert_eq!(loaded.symbols, vec!["BTCUSDT".to_string()]);
        assert_eq!(loaded.monitor, MonitorParams::default());
    }
}
