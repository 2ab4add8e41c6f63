// =============================================================================
// Monitoring Session — one periodic observation loop per user
// =============================================================================
//
// Lifecycle:
//   1. Seed: one OI sample per symbol (failures are logged and skipped).
//   2. Every tick, strictly in this order:
//        a. Price branch: two-candle percent change per symbol, no cooldown.
//        b. OI branch:    record, prune, compare against the 15m / 30m
//                          references, cooldown-gated combined alert.
//   3. Exit when the session's cancellation token fires.
//
// The token is checked between symbols, never in the middle of an alert, so
// an alert is either fully handed to the sink or not attempted at all.
//
// All per-symbol OI state lives in `histories`, owned by this task alone.
// =============================================================================

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::alert_policy::{significant_change, Cooldown};
use super::oi_history::SymbolOiHistory;
use super::source::ExchangeDataSource;
use crate::notify::NotificationSink;
use crate::runtime_config::MonitorParams;
use crate::types::{PriceMove, UserId, UserMonitorConfig};

/// What a single tick did. Used for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub price_alerts: usize,
    pub oi_alerts: usize,
    pub fetch_failures: usize,
    pub cancelled: bool,
}

/// A window whose magnitude gate passed on this tick.
#[derive(Debug, Clone, Copy)]
struct OiTrigger {
    window_mins: u64,
    change_pct: f64,
}

pub struct MonitorSession {
    user_id: UserId,
    session_id: Uuid,
    config: UserMonitorConfig,
    symbols: Arc<Vec<String>>,
    source: Arc<dyn ExchangeDataSource>,
    sink: Arc<dyn NotificationSink>,
    params: MonitorParams,
    cooldown: Cooldown,
    histories: HashMap<String, SymbolOiHistory>,
}

impl MonitorSession {
    pub fn new(
        user_id: UserId,
        session_id: Uuid,
        config: UserMonitorConfig,
        symbols: Arc<Vec<String>>,
        source: Arc<dyn ExchangeDataSource>,
        sink: Arc<dyn NotificationSink>,
        params: MonitorParams,
    ) -> Self {
        let cooldown = Cooldown::new(params.oi_alert_cooldown());
        Self {
            user_id,
            session_id,
            config,
            symbols,
            source,
            sink,
            params,
            cooldown,
            histories: HashMap::new(),
        }
    }

    /// Seed, then tick every `tick_interval` until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            user_id = self.user_id,
            session_id = %self.session_id,
            symbols = self.symbols.len(),
            price = self.config.price_monitor_enabled(),
            oi = self.config.oi_monitor_enabled(),
            "monitoring session started"
        );

        self.seed(Utc::now(), &cancel).await;

        let period = self.params.tick_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let summary = self.tick(Utc::now(), &cancel).await;
            debug!(
                user_id = self.user_id,
                session_id = %self.session_id,
                price_alerts = summary.price_alerts,
                oi_alerts = summary.oi_alerts,
                fetch_failures = summary.fetch_failures,
                "tick complete"
            );
            if summary.cancelled {
                break;
            }
        }

        info!(
            user_id = self.user_id,
            session_id = %self.session_id,
            "monitoring session stopped"
        );
    }

    /// Record one OI sample per symbol. A failed symbol is skipped; the first
    /// regular tick creates its history instead.
    pub async fn seed(&mut self, now: DateTime<Utc>, cancel: &CancellationToken) {
        if !self.config.oi_monitor_enabled() {
            return;
        }

        let symbols = Arc::clone(&self.symbols);
        let mut seeded = 0usize;
        for symbol in symbols.iter() {
            if cancel.is_cancelled() {
                return;
            }
            match self.source.open_interest(symbol).await {
                Ok(value) => {
                    self.histories
                        .insert(symbol.clone(), SymbolOiHistory::seeded(now, value));
                    seeded += 1;
                }
                Err(e) => {
                    warn!(
                        user_id = self.user_id,
                        symbol = %symbol,
                        error = %e,
                        "failed to seed open interest"
                    );
                }
            }
        }

        info!(
            user_id = self.user_id,
            session_id = %self.session_id,
            seeded,
            total = symbols.len(),
            "open interest seeded"
        );
    }

    /// Run both branches once against `now`.
    pub async fn tick(&mut self, now: DateTime<Utc>, cancel: &CancellationToken) -> TickSummary {
        let started = Instant::now();
        let mut summary = TickSummary::default();

        if self.config.price_monitor_enabled() {
            self.check_price_changes(cancel, &mut summary).await;
        }
        if !summary.cancelled && self.config.oi_monitor_enabled() {
            self.check_oi_changes(now, started, cancel, &mut summary).await;
        }

        summary
    }

    // -------------------------------------------------------------------------
    // Price branch
    // -------------------------------------------------------------------------

    async fn check_price_changes(&self, cancel: &CancellationToken, summary: &mut TickSummary) {
        let threshold = self.config.change_threshold;
        let timeframe = self.config.time_frame.as_str();

        for symbol in self.symbols.iter() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                return;
            }

            let (prev_close, curr_close) =
                match self.source.two_candle_closes(symbol, timeframe).await {
                    Ok(closes) => closes,
                    Err(e) => {
                        warn!(
                            user_id = self.user_id,
                            symbol = %symbol,
                            timeframe,
                            error = %e,
                            "failed to fetch candles"
                        );
                        summary.fetch_failures += 1;
                        continue;
                    }
                };

            let Some(change_pct) = significant_change(prev_close, curr_close, threshold) else {
                continue;
            };

            info!(
                user_id = self.user_id,
                symbol = %symbol,
                change_pct,
                "price change alert"
            );
            let text = format_price_alert(symbol, change_pct, curr_close);
            self.deliver(&text).await;
            summary.price_alerts += 1;
        }
    }

    // -------------------------------------------------------------------------
    // OI branch
    // -------------------------------------------------------------------------

    async fn check_oi_changes(
        &mut self,
        now: DateTime<Utc>,
        started: Instant,
        cancel: &CancellationToken,
        summary: &mut TickSummary,
    ) {
        let symbols = Arc::clone(&self.symbols);

        for symbol in symbols.iter() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                return;
            }

            let current = match self.source.open_interest(symbol).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        user_id = self.user_id,
                        symbol = %symbol,
                        error = %e,
                        "failed to fetch open interest"
                    );
                    summary.fetch_failures += 1;
                    continue;
                }
            };

            let triggers = self.observe_oi(symbol, now, current);
            if triggers.is_empty() {
                continue;
            }

            let price = match self.source.current_price(symbol).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(
                        user_id = self.user_id,
                        symbol = %symbol,
                        error = %e,
                        "failed to fetch price for OI alert"
                    );
                    summary.fetch_failures += 1;
                    continue;
                }
            };

            info!(
                user_id = self.user_id,
                symbol = %symbol,
                windows = ?triggers.iter().map(|t| t.window_mins).collect::<Vec<_>>(),
                "open interest alert"
            );
            let text = format_oi_alert(symbol, &triggers, price);
            self.deliver(&text).await;

            // Cooldown runs from the end of the send, on the tick's clock.
            let elapsed = Duration::from_std(started.elapsed()).unwrap_or(Duration::zero());
            let sent_at = now + elapsed;
            if let Some(history) = self.histories.get_mut(symbol) {
                self.cooldown.consume(history, sent_at);
            }
            summary.oi_alerts += 1;
        }
    }

    /// Record `current`, prune, and return the windows that should alert.
    ///
    /// Empty when no reference is present yet, no window crosses the
    /// threshold, or the symbol is cooling down.
    fn observe_oi(&mut self, symbol: &str, now: DateTime<Utc>, current: f64) -> Vec<OiTrigger> {
        let history = self.histories.entry(symbol.to_string()).or_default();
        history.record(now, current);
        history.prune(now, self.params.oi_retention());

        let tolerance = self.params.oi_lookup_tolerance();
        let threshold = self.config.oi_threshold;

        let triggers: Vec<OiTrigger> = self
            .params
            .oi_windows_mins
            .iter()
            .filter_map(|&window_mins| {
                let offset = Duration::minutes(window_mins as i64);
                let reference = history.value_near(now, offset, tolerance)?;
                let change_pct = significant_change(reference.value, current, threshold)?;
                Some(OiTrigger {
                    window_mins,
                    change_pct,
                })
            })
            .collect();

        if !triggers.is_empty() && !self.cooldown.is_clear(history, now) {
            debug!(
                user_id = self.user_id,
                symbol,
                "open interest alert suppressed by cooldown"
            );
            return Vec::new();
        }

        triggers
    }

    async fn deliver(&self, text: &str) {
        if let Err(e) = self.sink.send(self.user_id, &self.config.channel, text).await {
            warn!(
                user_id = self.user_id,
                channel = %self.config.channel,
                error = %e,
                "alert delivery failed"
            );
        }
    }

    #[cfg(test)]
    fn history_mut(&mut self, symbol: &str) -> &mut SymbolOiHistory {
        self.histories.entry(symbol.to_string()).or_default()
    }
}

// -----------------------------------------------------------------------------
// Message formatting
// -----------------------------------------------------------------------------

fn format_price_alert(symbol: &str, change_pct: f64, price: f64) -> String {
    let direction = PriceMove::from_change(change_pct);
    format!(
        "{} {}: {}\nPrice change: {:.2}%\nCurrent price: {:.4} USDT",
        direction.marker(),
        direction,
        symbol,
        change_pct,
        price
    )
}

fn format_oi_alert(symbol: &str, triggers: &[OiTrigger], price: f64) -> String {
    let mut text = format!("🎰 OI Alert\n`{symbol}` Binance\n");
    for t in triggers {
        let _ = writeln!(text, "OI Change ({}m): {:.2}%", t.window_mins, t.change_pct);
    }
    let _ = write!(text, "Current price: {price:.5} USDT");
    text
}

// =============================================================================
// Tests
// =============================================================================
