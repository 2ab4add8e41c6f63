use anyhow::Result;
use async_trait::async_trait;

/// Market data the monitoring engine pulls on every tick.
///
/// Every method may fail transiently; callers log the error and skip the
/// symbol for the current tick.
#[async_trait]
pub trait ExchangeDataSource: Send + Sync {
    /// Symbols eligible for monitoring.
    async fn list_tradable_symbols(&self) -> Result<Vec<String>>;

    /// Closes of the two most recent candles for `timeframe`, oldest first.
    async fn two_candle_closes(&self, symbol: &str, timeframe: &str) -> Result<(f64, f64)>;

    async fn open_interest(&self, symbol: &str) -> Result<f64>;

    async fn current_price(&self, symbol: &str) -> Result<f64>;
}
