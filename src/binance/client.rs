// =============================================================================
// Binance USDⓈ-M Futures REST Client — public market data
// =============================================================================
//
// Only unsigned market-data endpoints are used, so no API key is required.
// Every response feeds the shared `RateLimitTracker`; a request that would
// push the minute weight past the hard cap is refused locally and surfaces as
// an ordinary error, which the monitoring sessions treat as transient.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, instrument};

use super::rate_limit::RateLimitTracker;
use crate::monitor::ExchangeDataSource;

/// Request weight of every endpoint used here (single symbol, limit < 100).
const ENDPOINT_WEIGHT: u32 = 1;

/// Binance Futures market-data client.
#[derive(Clone)]
pub struct BinanceFuturesClient {
    base_url: String,
    client: reqwest::Client,
    rate_limit: Arc<RateLimitTracker>,
}

impl BinanceFuturesClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a client against `base_url` (e.g. `https://fapi.binance.com`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!(%base_url, "BinanceFuturesClient initialised");

        Self {
            base_url,
            client,
            rate_limit: Arc::new(RateLimitTracker::new()),
        }
    }

    pub fn rate_limit(&self) -> &RateLimitTracker {
        &self.rate_limit
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    /// GET `path` and return the JSON body, failing on non-2xx status.
    async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        if !self.rate_limit.can_send_request(ENDPOINT_WEIGHT) {
            anyhow::bail!("local rate-limit cap reached, skipping GET {path}");
        }

        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        self.rate_limit.update_from_headers(resp.headers());

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse GET {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("Binance GET {} returned {}: {}", path, status, body);
        }

        Ok(body)
    }
}

// -----------------------------------------------------------------------------
// Response parsing
// -----------------------------------------------------------------------------

/// USDT-margined perpetuals that are currently trading.
fn parse_tradable_symbols(body: &serde_json::Value) -> Result<Vec<String>> {
    let symbols = body["symbols"]
        .as_array()
        .context("exchangeInfo response missing 'symbols' array")?;

    Ok(symbols
        .iter()
        .filter(|s| {
            s["contractType"].as_str() == Some("PERPETUAL")
                && s["quoteAsset"].as_str() == Some("USDT")
                && s["status"].as_str() == Some("TRADING")
        })
        .filter_map(|s| s["symbol"].as_str().map(str::to_string))
        .collect())
}

/// Close prices of the first two klines, oldest first.
///
/// Kline array index [4] is the close, encoded as a string.
fn parse_two_closes(body: &serde_json::Value) -> Result<(f64, f64)> {
    let klines = body.as_array().context("klines response is not an array")?;
    if klines.len() < 2 {
        anyhow::bail!("not enough klines received ({} < 2)", klines.len());
    }

    let close = |i: usize| -> Result<f64> {
        let entry = klines[i]
            .as_array()
            .with_context(|| format!("kline entry {i} is not an array"))?;
        let value = entry
            .get(4)
            .with_context(|| format!("kline entry {i} has no close field"))?;
        parse_str_f64(value).with_context(|| format!("failed to parse close of kline {i}"))
    };

    Ok((close(0)?, close(1)?))
}

/// Parse a JSON value that may be either a string or a number into `f64`.
fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

// -----------------------------------------------------------------------------
// ExchangeDataSource
// -----------------------------------------------------------------------------

#[async_trait]
impl ExchangeDataSource for BinanceFuturesClient {
    /// GET /fapi/v1/exchangeInfo.
    #[instrument(skip(self), name = "binance::list_tradable_symbols")]
    async fn list_tradable_symbols(&self) -> Result<Vec<String>> {
        let body = self.get_json("/fapi/v1/exchangeInfo").await?;
        let symbols = parse_tradable_symbols(&body)?;
        debug!(count = symbols.len(), "tradable symbols listed");
        Ok(symbols)
    }

    /// GET /fapi/v1/klines with limit=2.
    #[instrument(skip(self), name = "binance::two_candle_closes")]
    async fn two_candle_closes(&self, symbol: &str, timeframe: &str) -> Result<(f64, f64)> {
        let path = format!("/fapi/v1/klines?symbol={symbol}&interval={timeframe}&limit=2");
        let body = self.get_json(&path).await?;
        parse_two_closes(&body)
    }

    /// GET /fapi/v1/openInterest.
    #[instrument(skip(self), name = "binance::open_interest")]
    async fn open_interest(&self, symbol: &str) -> Result<f64> {
        let path = format!("/fapi/v1/openInterest?symbol={symbol}");
        let body = self.get_json(&path).await?;
        parse_str_f64(&body["openInterest"])
            .with_context(|| format!("bad openInterest value for {symbol}"))
    }

    /// GET /fapi/v1/ticker/price.
    #[instrument(skip(self), name = "binance::current_price")]
    async fn current_price(&self, symbol: &str) -> Result<f64> {
        let path = format!("/fapi/v1/ticker/price?symbol={symbol}");
        let body = self.get_json(&path).await?;
        parse_str_f64(&body["price"]).with_context(|| format!("bad price value for {symbol}"))
    }
}

impl std::fmt::Debug for BinanceFuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceFuturesClient")
            .field("base_url", &self.base_url)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exchange_info_keeps_trading_usdt_perpetuals() {
        let body = json!({
            "symbols": [
                { "symbol": "BTCUSDT", "contractType": "PERPETUAL", "quoteAsset": "USDT", "status": "TRADING" },
                { "symbol": "ETHUSDC", "contractType": "PERPETUAL", "quoteAsset": "USDC", "status": "TRADING" },
                { "symbol": "BTCUSDT_240628", "contractType": "CURRENT_QUARTER", "quoteAsset": "USDT", "status": "TRADING" },
                { "symbol": "OLDUSDT", "contractType": "PERPETUAL", "quoteAsset": "USDT", "status": "SETTLING" },
                { "symbol": "SOLUSDT", "contractType": "PERPETUAL", "quoteAsset": "USDT", "status": "TRADING" }
            ]
        });
        assert_eq!(parse_tradable_symbols(&body).unwrap(), vec!["BTCUSDT", "SOLUSDT"]);
    }

    #[test]
    fn exchange_info_without_symbols_is_error() {
        assert!(parse_tradable_symbols(&json!({})).is_err());
    }

    #[test]
    fn two_closes_parsed_oldest_first() {
        let body = json!([
            [1700000000000_i64, "99.0", "101.0", "98.0", "100.0", "10", 1700000299999_i64],
            [1700000300000_i64, "100.0", "105.0", "99.5", "104.0", "12", 1700000599999_i64]
        ]);
        assert_eq!(parse_two_closes(&body).unwrap(), (100.0, 104.0));
    }

    #[test]
    fn single_kline_is_insufficient() {
        let body = json!([[0, "1", "1", "1", "1", "1", 0]]);
        let err = parse_two_closes(&body).unwrap_err();
        assert!(err.to_string().contains("not enough klines"));
    }

    #[test]
    fn malformed_close_is_error() {
        let body = json!([[0, "1", "1", "1", "abc"], [0, "1", "1", "1", "2"]]);
        assert!(parse_two_closes(&body).is_err());
    }

    #[test]
    fn str_or_number_parses() {
        assert_eq!(parse_str_f64(&json!("12.5")).unwrap(), 12.5);
        assert_eq!(parse_str_f64(&json!(3)).unwrap(), 3.0);
        assert!(parse_str_f64(&json!(null)).is_err());
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let c = BinanceFuturesClient::new("http://localhost:1/");
        assert!(format!("{c:?}").contains("\"http://localhost:1\""));
    }
}
