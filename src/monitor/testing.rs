//! In-memory stand-ins for the exchange and the notification transport.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::ExchangeDataSource;
use crate::notify::NotificationSink;
use crate::types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Candles,
    OpenInterest,
    Price,
}

/// Scripted exchange. Values are set per symbol and returned until changed.
#[derive(Default)]
pub struct FakeExchange {
    symbols: Mutex<Vec<String>>,
    closes: Mutex<HashMap<String, (f64, f64)>>,
    open_interest: Mutex<HashMap<String, f64>>,
    prices: Mutex<HashMap<String, f64>>,
    failing: Mutex<HashSet<(String, Op)>>,
    fail_listing: Mutex<bool>,
    calls: Mutex<HashMap<Op, usize>>,
}

impl FakeExchange {
    pub fn with_symbols(symbols: &[&str]) -> Self {
        let fake = Self::default();
        *fake.symbols.lock() = symbols.iter().map(|s| s.to_string()).collect();
        fake
    }

    pub fn set_closes(&self, symbol: &str, prev: f64, curr: f64) {
        self.closes.lock().insert(symbol.to_string(), (prev, curr));
    }

    pub fn set_oi(&self, symbol: &str, value: f64) {
        self.open_interest.lock().insert(symbol.to_string(), value);
    }

    pub fn set_price(&self, symbol: &str, value: f64) {
        self.prices.lock().insert(symbol.to_string(), value);
    }

    pub fn fail(&self, symbol: &str, op: Op) {
        self.failing.lock().insert((symbol.to_string(), op));
    }

    pub fn recover(&self, symbol: &str, op: Op) {
        self.failing.lock().remove(&(symbol.to_string(), op));
    }

    pub fn fail_listing(&self) {
        *self.fail_listing.lock() = true;
    }

    pub fn calls(&self, op: Op) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    fn lookup(&self, symbol: &str, op: Op, table: &Mutex<HashMap<String, f64>>) -> Result<f64> {
        self.check(symbol, op)?;
        table
            .lock()
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no {op:?} scripted for {symbol}"))
    }

    fn check(&self, symbol: &str, op: Op) -> Result<()> {
        *self.calls.lock().entry(op).or_default() += 1;
        if self.failing.lock().contains(&(symbol.to_string(), op)) {
            anyhow::bail!("injected {op:?} failure for {symbol}");
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeDataSource for FakeExchange {
    async fn list_tradable_symbols(&self) -> Result<Vec<String>> {
        if *self.fail_listing.lock() {
            anyhow::bail!("injected listing failure");
        }
        Ok(self.symbols.lock().clone())
    }

    async fn two_candle_closes(&self, symbol: &str, _timeframe: &str) -> Result<(f64, f64)> {
        self.check(symbol, Op::Candles)?;
        self.closes
            .lock()
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("not enough klines received"))
    }

    async fn open_interest(&self, symbol: &str) -> Result<f64> {
        self.lookup(symbol, Op::OpenInterest, &self.open_interest)
    }

    async fn current_price(&self, symbol: &str) -> Result<f64> {
        self.lookup(symbol, Op::Price, &self.prices)
    }
}

/// A message handed to the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub user_id: UserId,
    pub channel: String,
    pub text: String,
}

/// Records every send; optionally fails all of them or delays each one.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Sent>>,
    failing: Mutex<bool>,
    delay: Option<Duration>,
    attempts: AtomicUsize,
}

impl RecordingSink {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        let sink = Self::default();
        *sink.failing.lock() = true;
        sink
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, user_id: UserId, channel: &str, text: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if *self.failing.lock() {
            anyhow::bail!("injected delivery failure");
        }
        self.sent.lock().push(Sent {
            user_id,
            channel: channel.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}
