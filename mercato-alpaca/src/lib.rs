//! mercato-alpaca
//!
//! Bespoke connector for one equities venue (Alpaca). REST-only: the data
//! API serves bars and snapshots, the broker API serves orders and account
//! state. Live views over this venue run on the polling fallback.
#![warn(missing_docs)]

mod client;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use mercato_core::plugin::{
    InstanceSpec, InstrumentDetailsProvider, MarketPlugin, OpenOrdersProvider, PluginFactory,
    TickerProvider, TradingProvider,
};
use mercato_core::PluginError;
use mercato_types::{
    Balance, InstrumentLimits, InstrumentTradingDetails, OhlcvBar, Order, Position, Precision,
    Ticker, Timeframe, TimeframeUnit,
};

use client::{AlpacaClient, as_f64, ms_to_rfc3339, rfc3339_to_ms};

const DATA_BASE: &str = "https://data.alpaca.markets";
const BROKER_BASE: &str = "https://api.alpaca.markets";
const PAPER_BROKER_BASE: &str = "https://paper-api.alpaca.markets";

/// Timeframes the venue's bar endpoint accepts without resampling upstream.
const NATIVE_TIMEFRAMES: &[&str] = &["1m", "5m", "15m", "30m", "1h", "1d", "1w"];

/// A configured connector for the Alpaca venue.
pub struct AlpacaPlugin {
    client: AlpacaClient,
    data_base: String,
    broker_base: String,
}

fn venue_timeframe(tf: Timeframe) -> String {
    match tf.unit() {
        TimeframeUnit::Minute => format!("{}Min", tf.amount()),
        TimeframeUnit::Hour => format!("{}Hour", tf.amount()),
        TimeframeUnit::Day => format!("{}Day", tf.amount()),
        TimeframeUnit::Week => format!("{}Week", tf.amount()),
        TimeframeUnit::Month => format!("{}Month", tf.amount()),
        // No year cadence upstream; 12 months is the closest the venue has.
        TimeframeUnit::Year => format!("{}Month", tf.amount().saturating_mul(12)),
    }
}

fn parse_bar(raw: &Value) -> Option<OhlcvBar> {
    Some(OhlcvBar {
        timestamp_ms: rfc3339_to_ms(raw["t"].as_str()?)?,
        open: as_f64(&raw["o"])?,
        high: as_f64(&raw["h"])?,
        low: as_f64(&raw["l"])?,
        close: as_f64(&raw["c"])?,
        volume: as_f64(&raw["v"])?,
    })
}

fn parse_order(raw: &Value) -> Option<Order> {
    let amount = as_f64(&raw["qty"]).unwrap_or(0.0);
    let filled = as_f64(&raw["filled_qty"]).unwrap_or(0.0);
    Some(Order {
        id: raw["id"].as_str()?.to_string(),
        client_order_id: raw["client_order_id"].as_str().map(str::to_string),
        timestamp_ms: raw["created_at"]
            .as_str()
            .and_then(rfc3339_to_ms)
            .unwrap_or(0),
        symbol: raw["symbol"].as_str().unwrap_or_default().to_string(),
        order_type: raw["type"].as_str().unwrap_or("limit").to_string(),
        side: raw["side"].as_str().unwrap_or_default().to_string(),
        price: as_f64(&raw["limit_price"]),
        average: as_f64(&raw["filled_avg_price"]),
        amount,
        filled,
        remaining: (amount - filled).max(0.0),
        status: raw["status"].as_str().unwrap_or("open").to_string(),
    })
}

impl AlpacaPlugin {
    /// Build an instance from a construction spec.
    ///
    /// Recognized extras: `data_base_url` and `broker_base_url` override the
    /// venue endpoints (integration tests point these at local mocks).
    ///
    /// # Errors
    /// [`PluginError::Venue`] when construction fails.
    pub fn from_spec(spec: &InstanceSpec) -> Result<Self, PluginError> {
        let provider = spec.provider_id.to_lowercase();
        let broker_default = if spec.is_testnet {
            PAPER_BROKER_BASE
        } else {
            BROKER_BASE
        };
        Ok(Self {
            client: AlpacaClient::new(&provider, spec.credentials.clone(), spec.request_timeout)?,
            data_base: spec
                .extras
                .get("data_base_url")
                .cloned()
                .unwrap_or_else(|| DATA_BASE.to_string()),
            broker_base: spec
                .extras
                .get("broker_base_url")
                .cloned()
                .unwrap_or_else(|| broker_default.to_string()),
        })
    }

    fn data_url(&self, path: &str) -> String {
        format!("{}{path}", self.data_base)
    }

    fn broker_url(&self, path: &str) -> String {
        format!("{}{path}", self.broker_base)
    }
}

#[async_trait]
impl MarketPlugin for AlpacaPlugin {
    fn provider_id(&self) -> &str {
        self.client.provider()
    }

    async fn get_symbols(&self, _market: &str) -> Result<Vec<String>, PluginError> {
        let query = vec![
            ("status", "active".to_string()),
            ("asset_class", "us_equity".to_string()),
        ];
        let raw = self
            .client
            .get_json(&self.broker_url("/v2/assets"), &query)
            .await?;
        Ok(raw
            .as_array()
            .into_iter()
            .flatten()
            .filter(|asset| asset["tradable"].as_bool().unwrap_or(false))
            .filter_map(|asset| asset["symbol"].as_str().map(str::to_string))
            .collect())
    }

    async fn fetch_historical_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: Option<usize>,
        until_ms: Option<i64>,
    ) -> Result<Vec<OhlcvBar>, PluginError> {
        let mut query: Vec<(&str, String)> = vec![
            ("timeframe", venue_timeframe(timeframe)),
            ("adjustment", "raw".to_string()),
        ];
        if let Some(since) = since_ms {
            query.push(("start", ms_to_rfc3339(since)));
        }
        if let Some(until) = until_ms {
            query.push(("end", ms_to_rfc3339(until - 1)));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.min(10_000).to_string()));
        }
        let raw = self
            .client
            .get_json(&self.data_url(&format!("/v2/stocks/{symbol}/bars")), &query)
            .await?;
        let mut bars: Vec<OhlcvBar> = raw["bars"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(parse_bar)
            .collect();
        bars.sort_by_key(|b| b.timestamp_ms);
        Ok(bars)
    }

    async fn fetch_latest_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<OhlcvBar>, PluginError> {
        if timeframe.is_one_minute() {
            let raw = self
                .client
                .get_json(
                    &self.data_url(&format!("/v2/stocks/{symbol}/bars/latest")),
                    &[],
                )
                .await?;
            return Ok(parse_bar(&raw["bar"]));
        }
        // Coarser cadences: pull the last closed bucket from the bar range.
        let bars = self
            .fetch_historical_ohlcv(symbol, timeframe, None, Some(2), None)
            .await?;
        Ok(bars.last().copied())
    }

    fn supported_timeframes(&self) -> Option<&'static [&'static str]> {
        Some(NATIVE_TIMEFRAMES)
    }

    async fn close(&self) -> Result<(), PluginError> {
        tracing::debug!(provider = %self.client.provider(), "alpaca plugin closed");
        Ok(())
    }

    fn as_ticker_provider(&self) -> Option<&dyn TickerProvider> {
        Some(self as &dyn TickerProvider)
    }
    fn as_open_orders_provider(&self) -> Option<&dyn OpenOrdersProvider> {
        Some(self as &dyn OpenOrdersProvider)
    }
    fn as_trading_provider(&self) -> Option<&dyn TradingProvider> {
        Some(self as &dyn TradingProvider)
    }
    fn as_instrument_details_provider(&self) -> Option<&dyn InstrumentDetailsProvider> {
        Some(self as &dyn InstrumentDetailsProvider)
    }
}

#[async_trait]
impl TickerProvider for AlpacaPlugin {
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, PluginError> {
        let raw = self
            .client
            .get_json(&self.data_url(&format!("/v2/stocks/{symbol}/snapshot")), &[])
            .await?;
        let trade = &raw["latestTrade"];
        let quote = &raw["latestQuote"];
        let daily = &raw["dailyBar"];
        Ok(Ticker {
            symbol: symbol.to_string(),
            timestamp_ms: trade["t"].as_str().and_then(rfc3339_to_ms),
            bid: as_f64(&quote["bp"]),
            ask: as_f64(&quote["ap"]),
            last: as_f64(&trade["p"]),
            high: as_f64(&daily["h"]),
            low: as_f64(&daily["l"]),
            base_volume: as_f64(&daily["v"]),
        })
    }
}

#[async_trait]
impl OpenOrdersProvider for AlpacaPlugin {
    async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>, PluginError> {
        let mut query: Vec<(&str, String)> = vec![("status", "open".to_string())];
        if let Some(symbol) = symbol {
            query.push(("symbols", symbol.to_string()));
        }
        let raw = self
            .client
            .get_json(&self.broker_url("/v2/orders"), &query)
            .await?;
        Ok(raw
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(parse_order)
            .collect())
    }
}

#[async_trait]
impl TradingProvider for AlpacaPlugin {
    async fn place_order(
        &self,
        symbol: &str,
        order_type: &str,
        side: &str,
        amount: f64,
        price: Option<f64>,
    ) -> Result<Order, PluginError> {
        let mut body = json!({
            "symbol": symbol,
            "qty": amount.to_string(),
            "side": side,
            "type": order_type,
            "time_in_force": "gtc",
        });
        if order_type.eq_ignore_ascii_case("limit") {
            let price = price.ok_or_else(|| {
                PluginError::venue(self.client.provider(), "limit orders require a price")
            })?;
            body["limit_price"] = json!(price.to_string());
        }
        let raw = self
            .client
            .post_json(&self.broker_url("/v2/orders"), body)
            .await?;
        parse_order(&raw).ok_or_else(|| {
            PluginError::venue(
                self.client.provider(),
                "unparseable order placement response",
            )
        })
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        _symbol: Option<&str>,
    ) -> Result<(), PluginError> {
        self.client
            .delete(&self.broker_url(&format!("/v2/orders/{order_id}")))
            .await
    }

    async fn get_account_balance(&self) -> Result<HashMap<String, Balance>, PluginError> {
        let raw = self
            .client
            .get_json(&self.broker_url("/v2/account"), &[])
            .await?;
        let mut balances = HashMap::new();
        let cash = as_f64(&raw["cash"]).unwrap_or(0.0);
        let equity = as_f64(&raw["equity"]).unwrap_or(cash);
        balances.insert(
            raw["currency"].as_str().unwrap_or("USD").to_string(),
            Balance {
                free: cash,
                used: (equity - cash).max(0.0),
                total: equity,
            },
        );
        Ok(balances)
    }

    async fn get_open_positions(
        &self,
        symbols: Option<&[String]>,
    ) -> Result<Vec<Position>, PluginError> {
        let raw = self
            .client
            .get_json(&self.broker_url("/v2/positions"), &[])
            .await?;
        Ok(raw
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|entry| {
                let symbol = entry["symbol"].as_str()?.to_string();
                if let Some(wanted) = symbols
                    && !wanted.contains(&symbol)
                {
                    return None;
                }
                Some(Position {
                    symbol,
                    side: entry["side"].as_str().unwrap_or("long").to_string(),
                    amount: as_f64(&entry["qty"])?,
                    entry_price: as_f64(&entry["avg_entry_price"]),
                    unrealized_pnl: as_f64(&entry["unrealized_pl"]),
                })
            })
            .collect())
    }
}

#[async_trait]
impl InstrumentDetailsProvider for AlpacaPlugin {
    async fn instrument_trading_details(
        &self,
        symbol: &str,
    ) -> Result<InstrumentTradingDetails, PluginError> {
        let raw = self
            .client
            .get_json(&self.broker_url(&format!("/v2/assets/{symbol}")), &[])
            .await?;
        Ok(InstrumentTradingDetails {
            symbol: symbol.to_string(),
            market_type: "spot".into(),
            base: raw["symbol"].as_str().map(str::to_string),
            quote: Some("USD".to_string()),
            is_active: raw["status"]
                .as_str()
                .map(|s| s == "active" && raw["tradable"].as_bool().unwrap_or(false)),
            precision: Precision {
                price: Some(2),
                amount: raw["fractionable"]
                    .as_bool()
                    .map(|f| if f { 9 } else { 0 }),
            },
            limits: InstrumentLimits::default(),
        })
    }
}

/// Factory registering the Alpaca connector.
pub struct AlpacaFactory;

impl PluginFactory for AlpacaFactory {
    fn plugin_key(&self) -> &'static str {
        "alpaca"
    }

    fn supported_markets(&self) -> &'static [&'static str] {
        &["us_equity", "stocks"]
    }

    fn configurable_providers(&self) -> Vec<String> {
        vec!["alpaca".to_string()]
    }

    fn build(&self, spec: &InstanceSpec) -> Result<Arc<dyn MarketPlugin>, PluginError> {
        if !spec.provider_id.eq_ignore_ascii_case("alpaca") {
            return Err(PluginError::venue(
                spec.provider_id.clone(),
                "provider not handled by the alpaca plugin",
            ));
        }
        Ok(Arc::new(AlpacaPlugin::from_spec(spec)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframes_map_to_venue_strings() {
        let tf = |s: &str| -> Timeframe { s.parse().unwrap() };
        assert_eq!(venue_timeframe(tf("1m")), "1Min");
        assert_eq!(venue_timeframe(tf("30m")), "30Min");
        assert_eq!(venue_timeframe(tf("1h")), "1Hour");
        assert_eq!(venue_timeframe(tf("1d")), "1Day");
        assert_eq!(venue_timeframe(tf("1w")), "1Week");
        assert_eq!(venue_timeframe(tf("1y")), "12Month");
    }
}
