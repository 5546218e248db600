use std::time::Duration;

use serde_json::Value;

use mercato_core::PluginError;
use mercato_types::{
    InstrumentLimits, InstrumentTradingDetails, OhlcvBar, OrderBook, Precision, Ticker, Timeframe,
};

use crate::http::{RestClient, as_f64, parse_levels};

pub(crate) const REST_BASE: &str = "https://api.kraken.com";

/// Interval minutes the venue's OHLC endpoint accepts.
pub(crate) const NATIVE_TIMEFRAMES: &[&str] = &["1m", "5m", "15m", "30m", "1h", "4h", "1d", "1w"];

/// REST-only venue adapter. No native streams; the streaming layer falls
/// back to polling these endpoints.
pub(crate) struct KrakenAdapter {
    rest: RestClient,
    rest_base: String,
    provider: String,
}

fn venue_pair(display: &str) -> String {
    display.replace(['/', '-'], "").to_uppercase()
}

impl KrakenAdapter {
    pub(crate) fn new(
        provider: &str,
        request_timeout: Duration,
        rest_base_override: Option<&str>,
    ) -> Result<Self, PluginError> {
        Ok(Self {
            rest: RestClient::new(provider, request_timeout)?,
            rest_base: rest_base_override.map_or_else(|| REST_BASE.to_string(), str::to_string),
            provider: provider.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.rest_base)
    }

    /// Kraken wraps every response in `{ "error": [...], "result": ... }`.
    fn unwrap_result(&self, raw: Value) -> Result<Value, PluginError> {
        let errors = raw["error"].as_array().cloned().unwrap_or_default();
        if let Some(first) = errors.first().and_then(Value::as_str) {
            let lowered = first.to_lowercase();
            return Err(if lowered.contains("rate limit") {
                PluginError::network(&self.provider, first)
            } else if lowered.contains("invalid key") || lowered.contains("permission denied") {
                PluginError::auth(&self.provider, first)
            } else {
                PluginError::venue(&self.provider, first)
            });
        }
        Ok(raw["result"].clone())
    }

    /// First value in a result object, skipping the pagination cursor. The
    /// venue echoes its canonical pair name as the key, which rarely matches
    /// the requested form.
    fn first_pair_value(result: &Value) -> Option<&Value> {
        result
            .as_object()?
            .iter()
            .find(|(k, _)| k.as_str() != "last")
            .map(|(_, v)| v)
    }

    pub(crate) async fn get_symbols(&self, _market: &str) -> Result<Vec<String>, PluginError> {
        let raw = self
            .rest
            .get_json(&self.url("/0/public/AssetPairs"), &[])
            .await?;
        let result = self.unwrap_result(raw)?;
        let mut symbols: Vec<String> = result
            .as_object()
            .map(|pairs| {
                pairs
                    .values()
                    .filter_map(|pair| pair["wsname"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        symbols.sort();
        Ok(symbols)
    }

    pub(crate) async fn fetch_historical_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: Option<usize>,
        until_ms: Option<i64>,
    ) -> Result<Vec<OhlcvBar>, PluginError> {
        let minutes = timeframe.period_ms() / 60_000;
        let mut query: Vec<(&str, String)> = vec![
            ("pair", venue_pair(symbol)),
            ("interval", minutes.to_string()),
        ];
        if let Some(since) = since_ms {
            // The venue cursor is in seconds and exclusive.
            query.push(("since", (since / 1_000 - 1).to_string()));
        }
        let raw = self.rest.get_json(&self.url("/0/public/OHLC"), &query).await?;
        let result = self.unwrap_result(raw)?;
        let rows = Self::first_pair_value(&result)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut bars: Vec<OhlcvBar> = rows
            .iter()
            .filter_map(|row| {
                let cols = row.as_array()?;
                Some(OhlcvBar {
                    timestamp_ms: cols.first()?.as_i64()? * 1_000,
                    open: as_f64(cols.get(1)?)?,
                    high: as_f64(cols.get(2)?)?,
                    low: as_f64(cols.get(3)?)?,
                    close: as_f64(cols.get(4)?)?,
                    volume: as_f64(cols.get(6)?)?,
                })
            })
            .filter(|b| since_ms.is_none_or(|s| b.timestamp_ms >= s))
            .filter(|b| until_ms.is_none_or(|u| b.timestamp_ms < u))
            .collect();
        bars.sort_by_key(|b| b.timestamp_ms);
        if let Some(limit) = limit {
            bars.truncate(limit);
        }
        Ok(bars)
    }

    pub(crate) async fn fetch_latest_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<OhlcvBar>, PluginError> {
        let bars = self
            .fetch_historical_ohlcv(symbol, timeframe, None, None, None)
            .await?;
        // The trailing row is the still-forming bucket.
        Ok(match bars.len() {
            0 => None,
            1 => Some(bars[0]),
            n => Some(bars[n - 2]),
        })
    }

    pub(crate) async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, PluginError> {
        let query = vec![("pair", venue_pair(symbol))];
        let raw = self
            .rest
            .get_json(&self.url("/0/public/Ticker"), &query)
            .await?;
        let result = self.unwrap_result(raw)?;
        let entry = Self::first_pair_value(&result).ok_or_else(|| {
            PluginError::venue(&self.provider, format!("no ticker for {symbol}"))
        })?;
        let leg = |field: &str| entry[field].as_array().and_then(|a| a.first()).and_then(as_f64);
        Ok(Ticker {
            symbol: symbol.to_string(),
            timestamp_ms: None,
            bid: leg("b"),
            ask: leg("a"),
            last: leg("c"),
            high: leg("h"),
            low: leg("l"),
            base_volume: leg("v"),
        })
    }

    pub(crate) async fn fetch_order_book(
        &self,
        symbol: &str,
        depth: Option<usize>,
    ) -> Result<OrderBook, PluginError> {
        let query = vec![
            ("pair", venue_pair(symbol)),
            ("count", depth.unwrap_or(20).min(500).to_string()),
        ];
        let raw = self
            .rest
            .get_json(&self.url("/0/public/Depth"), &query)
            .await?;
        let result = self.unwrap_result(raw)?;
        let entry = Self::first_pair_value(&result).ok_or_else(|| {
            PluginError::venue(&self.provider, format!("no order book for {symbol}"))
        })?;
        Ok(OrderBook {
            symbol: symbol.to_string(),
            timestamp_ms: None,
            bids: parse_levels(entry.get("bids")),
            asks: parse_levels(entry.get("asks")),
            nonce: None,
        })
    }

    pub(crate) async fn instrument_trading_details(
        &self,
        symbol: &str,
    ) -> Result<InstrumentTradingDetails, PluginError> {
        let query = vec![("pair", venue_pair(symbol))];
        let raw = self
            .rest
            .get_json(&self.url("/0/public/AssetPairs"), &query)
            .await?;
        let result = self.unwrap_result(raw)?;
        let entry = Self::first_pair_value(&result).ok_or_else(|| {
            PluginError::venue(&self.provider, format!("unknown instrument: {symbol}"))
        })?;
        Ok(InstrumentTradingDetails {
            symbol: symbol.to_string(),
            market_type: "spot".into(),
            base: entry["base"].as_str().map(str::to_string),
            quote: entry["quote"].as_str().map(str::to_string),
            is_active: entry["status"].as_str().map(|s| s == "online"),
            precision: Precision {
                price: entry["pair_decimals"].as_u64().and_then(|v| v.try_into().ok()),
                amount: entry["lot_decimals"].as_u64().and_then(|v| v.try_into().ok()),
            },
            limits: InstrumentLimits {
                min_amount: as_f64(&entry["ordermin"]),
                max_amount: None,
                min_cost: as_f64(&entry["costmin"]),
            },
        })
    }
}
