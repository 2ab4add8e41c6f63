// =============================================================================
// Shared types used across the OI Pulse monitoring engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Chat / account identifier of a subscribed user.
pub type UserId = i64;

/// Binance kline interval tokens accepted by `/fapi/v1/klines`.
pub const SUPPORTED_TIMEFRAMES: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M",
];

/// Immutable per-user monitoring snapshot taken when a session starts.
///
/// Field names follow the on-disk user store so existing files keep loading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMonitorConfig {
    /// Kline timeframe for the price-change check, e.g. "5m".
    #[serde(default)]
    pub time_frame: String,

    /// Price-change threshold in percent. Zero disables the price check.
    #[serde(default)]
    pub change_threshold: f64,

    /// Whether open-interest tracking is requested.
    #[serde(default)]
    pub monitor_oi: bool,

    /// OI-change threshold in percent. Zero disables the OI check.
    #[serde(default)]
    pub oi_threshold: f64,

    /// Name of the delivery channel (bot) alerts go to.
    #[serde(default, rename = "target_bot", alias = "channel")]
    pub channel: String,
}

impl UserMonitorConfig {
    /// Price sub-monitor is on when a supported timeframe and a positive
    /// threshold are both set.
    pub fn price_monitor_enabled(&self) -> bool {
        self.change_threshold > 0.0 && SUPPORTED_TIMEFRAMES.contains(&self.time_frame.as_str())
    }

    pub fn oi_monitor_enabled(&self) -> bool {
        self.monitor_oi && self.oi_threshold > 0.0
    }

    /// A session is worth starting when at least one sub-monitor is on and
    /// there is somewhere to deliver alerts.
    pub fn is_eligible(&self) -> bool {
        !self.channel.trim().is_empty()
            && (self.price_monitor_enabled() || self.oi_monitor_enabled())
    }
}

/// Direction label for a price-change alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceMove {
    Pump,
    Dump,
}

impl PriceMove {
    pub fn from_change(change_pct: f64) -> Self {
        if change_pct > 0.0 {
            Self::Pump
        } else {
            Self::Dump
        }
    }

    pub fn marker(self) -> &'static str {
        match self {
            Self::Pump => "🟩",
            Self::Dump => "🟥",
        }
    }
}

impl std::fmt::Display for PriceMove {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pump => write!(f, "Pump"),
            Self::Dump => write!(f, "Dump"),
        }
    }
}
