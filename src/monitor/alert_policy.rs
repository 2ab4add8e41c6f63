// =============================================================================
// Alert Policy — magnitude gate + per-symbol cooldown gate
// =============================================================================
//
// Both gates must pass for an OI alert.  Price-change alerts only use the
// magnitude gate; they re-fire every tick while the move stays above the
// threshold.
// =============================================================================

use chrono::{DateTime, Duration, Utc};

use crate::monitor::oi_history::SymbolOiHistory;

/// Signed percent change from `reference` to `current`.
///
/// `None` when the reference is zero or either side is not finite.
pub fn percent_change(reference: f64, current: f64) -> Option<f64> {
    if reference == 0.0 || !reference.is_finite() || !current.is_finite() {
        return None;
    }
    Some((current - reference) / reference * 100.0)
}

/// Magnitude gate: the change when `|change| >= threshold`. Fails closed on a
/// zero reference.
pub fn significant_change(reference: f64, current: f64, threshold_pct: f64) -> Option<f64> {
    percent_change(reference, current).filter(|c| c.abs() >= threshold_pct)
}

/// Cooldown gate for a single (user, symbol) OI tracker.
///
/// The anchor lives on the symbol's history so that every OI window of that
/// symbol shares one cooldown.
#[derive(Debug, Clone, Copy)]
pub struct Cooldown {
    period: Duration,
}

impl Cooldown {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    /// True when no alert fired yet, or the last one is strictly more than
    /// one period ago.
    pub fn is_clear(&self, history: &SymbolOiHistory, now: DateTime<Utc>) -> bool {
        match history.last_alert_at() {
            None => true,
            Some(last) => now - last > self.period,
        }
    }

    /// Start a new cooldown period at `at`. Call only once the alert was
    /// actually handed to the sink.
    pub fn consume(&self, history: &mut SymbolOiHistory, at: DateTime<Utc>) {
        history.mark_alerted(at);
    }
}

// =============================================================================
// Tests
// =============================================================================
