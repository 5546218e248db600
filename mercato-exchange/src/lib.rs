//! mercato-exchange
//!
//! Multi-venue crypto connector. One plugin key covers several venues; the
//! concrete adapter is chosen by `provider_id` at construction time, and
//! each adapter implements only what its venue actually supports:
//!
//! - `binance`: full REST surface, signed account endpoints, and native
//!   kline/trade/depth WebSocket streams.
//! - `kraken`: public REST only. Live views over this venue run on the
//!   polling fallback.
#![warn(missing_docs)]

mod binance;
mod http;
mod kraken;
mod sign;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tokio::sync::mpsc;

use mercato_core::plugin::{
    InstanceSpec, InstrumentDetailsProvider, MarketPlugin, OhlcvStreamProvider,
    OpenOrdersProvider, OrderBookProvider, OrderBookStreamProvider, PluginFactory, TickerProvider,
    TradeStreamProvider, TradingProvider,
};
use mercato_core::{PluginError, StreamHandle};
use mercato_types::{
    Balance, Features, InstrumentTradingDetails, OhlcvBar, Order, OrderBook, Position, Ticker,
    Timeframe, Trade,
};

use binance::BinanceAdapter;
use kraken::KrakenAdapter;

const DETAILS_CACHE_TTL: Duration = Duration::from_secs(3_600);
const DETAILS_CACHE_CAPACITY: u64 = 10_000;

enum VenueAdapter {
    Binance(BinanceAdapter),
    Kraken(KrakenAdapter),
}

/// Static capability table per venue.
fn venue_features(provider: &str) -> Features {
    match provider {
        "binance" => {
            Features::STREAM_OHLCV
                | Features::STREAM_TRADES
                | Features::STREAM_ORDER_BOOK
                | Features::FETCH_TICKER
                | Features::FETCH_ORDER_BOOK
                | Features::FETCH_OPEN_ORDERS
                | Features::TRADING
                | Features::INSTRUMENT_DETAILS
        }
        "kraken" => {
            Features::FETCH_TICKER | Features::FETCH_ORDER_BOOK | Features::INSTRUMENT_DETAILS
        }
        _ => Features::empty(),
    }
}

/// A configured connector for one crypto venue.
pub struct ExchangePlugin {
    provider: String,
    features: Features,
    adapter: VenueAdapter,
    details_cache: Cache<String, InstrumentTradingDetails>,
}

impl ExchangePlugin {
    /// Build an instance from a construction spec.
    ///
    /// Recognized extras: `rest_base_url` and `ws_base_url` override the
    /// venue endpoints (integration tests point these at local mocks).
    ///
    /// # Errors
    /// [`PluginError::Venue`] for providers this plugin does not configure.
    pub fn from_spec(spec: &InstanceSpec) -> Result<Self, PluginError> {
        let provider = spec.provider_id.to_lowercase();
        let rest_base = spec.extras.get("rest_base_url").map(String::as_str);
        let ws_base = spec.extras.get("ws_base_url").map(String::as_str);
        let adapter = match provider.as_str() {
            "binance" => VenueAdapter::Binance(BinanceAdapter::new(
                &provider,
                spec.credentials.clone(),
                spec.is_testnet,
                spec.request_timeout,
                rest_base,
                ws_base,
            )?),
            "kraken" => {
                VenueAdapter::Kraken(KrakenAdapter::new(&provider, spec.request_timeout, rest_base)?)
            }
            other => {
                return Err(PluginError::venue(
                    other.to_string(),
                    "provider not handled by the exchange plugin",
                ));
            }
        };
        Ok(Self {
            features: venue_features(&provider),
            provider,
            adapter,
            details_cache: Cache::builder()
                .max_capacity(DETAILS_CACHE_CAPACITY)
                .time_to_live(DETAILS_CACHE_TTL)
                .build(),
        })
    }

    fn unsupported(&self, operation: &'static str) -> PluginError {
        PluginError::unsupported(self.provider.clone(), operation)
    }
}

#[async_trait]
impl MarketPlugin for ExchangePlugin {
    fn provider_id(&self) -> &str {
        &self.provider
    }

    async fn get_symbols(&self, market: &str) -> Result<Vec<String>, PluginError> {
        match &self.adapter {
            VenueAdapter::Binance(b) => b.get_symbols(market).await,
            VenueAdapter::Kraken(k) => k.get_symbols(market).await,
        }
    }

    async fn fetch_historical_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: Option<usize>,
        until_ms: Option<i64>,
    ) -> Result<Vec<OhlcvBar>, PluginError> {
        match &self.adapter {
            VenueAdapter::Binance(b) => {
                b.fetch_historical_ohlcv(symbol, timeframe, since_ms, limit, until_ms)
                    .await
            }
            VenueAdapter::Kraken(k) => {
                k.fetch_historical_ohlcv(symbol, timeframe, since_ms, limit, until_ms)
                    .await
            }
        }
    }

    async fn fetch_latest_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<OhlcvBar>, PluginError> {
        match &self.adapter {
            VenueAdapter::Binance(b) => b.fetch_latest_ohlcv(symbol, timeframe).await,
            VenueAdapter::Kraken(k) => k.fetch_latest_ohlcv(symbol, timeframe).await,
        }
    }

    fn supported_timeframes(&self) -> Option<&'static [&'static str]> {
        Some(match &self.adapter {
            VenueAdapter::Binance(_) => binance::NATIVE_TIMEFRAMES,
            VenueAdapter::Kraken(_) => kraken::NATIVE_TIMEFRAMES,
        })
    }

    async fn close(&self) -> Result<(), PluginError> {
        // REST sessions are pooled inside reqwest and released on drop;
        // stream sessions are owned by their handles. Nothing held here.
        tracing::debug!(provider = %self.provider, "exchange plugin closed");
        Ok(())
    }

    fn as_ticker_provider(&self) -> Option<&dyn TickerProvider> {
        self.features
            .contains(Features::FETCH_TICKER)
            .then_some(self as &dyn TickerProvider)
    }
    fn as_order_book_provider(&self) -> Option<&dyn OrderBookProvider> {
        self.features
            .contains(Features::FETCH_ORDER_BOOK)
            .then_some(self as &dyn OrderBookProvider)
    }
    fn as_open_orders_provider(&self) -> Option<&dyn OpenOrdersProvider> {
        self.features
            .contains(Features::FETCH_OPEN_ORDERS)
            .then_some(self as &dyn OpenOrdersProvider)
    }
    fn as_trading_provider(&self) -> Option<&dyn TradingProvider> {
        self.features
            .contains(Features::TRADING)
            .then_some(self as &dyn TradingProvider)
    }
    fn as_instrument_details_provider(&self) -> Option<&dyn InstrumentDetailsProvider> {
        self.features
            .contains(Features::INSTRUMENT_DETAILS)
            .then_some(self as &dyn InstrumentDetailsProvider)
    }
    fn as_ohlcv_stream_provider(&self) -> Option<&dyn OhlcvStreamProvider> {
        self.features
            .contains(Features::STREAM_OHLCV)
            .then_some(self as &dyn OhlcvStreamProvider)
    }
    fn as_trade_stream_provider(&self) -> Option<&dyn TradeStreamProvider> {
        self.features
            .contains(Features::STREAM_TRADES)
            .then_some(self as &dyn TradeStreamProvider)
    }
    fn as_order_book_stream_provider(&self) -> Option<&dyn OrderBookStreamProvider> {
        self.features
            .contains(Features::STREAM_ORDER_BOOK)
            .then_some(self as &dyn OrderBookStreamProvider)
    }
}

#[async_trait]
impl TickerProvider for ExchangePlugin {
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, PluginError> {
        match &self.adapter {
            VenueAdapter::Binance(b) => b.fetch_ticker(symbol).await,
            VenueAdapter::Kraken(k) => k.fetch_ticker(symbol).await,
        }
    }
}

#[async_trait]
impl OrderBookProvider for ExchangePlugin {
    async fn fetch_order_book(
        &self,
        symbol: &str,
        depth: Option<usize>,
    ) -> Result<OrderBook, PluginError> {
        match &self.adapter {
            VenueAdapter::Binance(b) => b.fetch_order_book(symbol, depth).await,
            VenueAdapter::Kraken(k) => k.fetch_order_book(symbol, depth).await,
        }
    }
}

#[async_trait]
impl OpenOrdersProvider for ExchangePlugin {
    async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>, PluginError> {
        match &self.adapter {
            VenueAdapter::Binance(b) => b.fetch_open_orders(symbol).await,
            VenueAdapter::Kraken(_) => Err(self.unsupported("fetch_open_orders")),
        }
    }
}

#[async_trait]
impl TradingProvider for ExchangePlugin {
    async fn place_order(
        &self,
        symbol: &str,
        order_type: &str,
        side: &str,
        amount: f64,
        price: Option<f64>,
    ) -> Result<Order, PluginError> {
        match &self.adapter {
            VenueAdapter::Binance(b) => {
                b.place_order(symbol, order_type, side, amount, price).await
            }
            VenueAdapter::Kraken(_) => Err(self.unsupported("place_order")),
        }
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        symbol: Option<&str>,
    ) -> Result<(), PluginError> {
        match &self.adapter {
            VenueAdapter::Binance(b) => b.cancel_order(order_id, symbol).await,
            VenueAdapter::Kraken(_) => Err(self.unsupported("cancel_order")),
        }
    }

    async fn get_account_balance(&self) -> Result<HashMap<String, Balance>, PluginError> {
        match &self.adapter {
            VenueAdapter::Binance(b) => b.get_account_balance().await,
            VenueAdapter::Kraken(_) => Err(self.unsupported("get_account_balance")),
        }
    }

    async fn get_open_positions(
        &self,
        symbols: Option<&[String]>,
    ) -> Result<Vec<Position>, PluginError> {
        match &self.adapter {
            VenueAdapter::Binance(b) => b.get_open_positions(symbols).await,
            VenueAdapter::Kraken(_) => Err(self.unsupported("get_open_positions")),
        }
    }
}

#[async_trait]
impl InstrumentDetailsProvider for ExchangePlugin {
    async fn instrument_trading_details(
        &self,
        symbol: &str,
    ) -> Result<InstrumentTradingDetails, PluginError> {
        if let Some(cached) = self.details_cache.get(symbol).await {
            return Ok(cached);
        }
        let details = match &self.adapter {
            VenueAdapter::Binance(b) => b.instrument_trading_details(symbol).await?,
            VenueAdapter::Kraken(k) => k.instrument_trading_details(symbol).await?,
        };
        self.details_cache
            .insert(symbol.to_string(), details.clone())
            .await;
        Ok(details)
    }
}

#[async_trait]
impl OhlcvStreamProvider for ExchangePlugin {
    async fn stream_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<(StreamHandle, mpsc::Receiver<OhlcvBar>), PluginError> {
        match &self.adapter {
            VenueAdapter::Binance(b) => Ok(b.stream_ohlcv(symbol, timeframe)),
            VenueAdapter::Kraken(_) => Err(self.unsupported("stream_ohlcv")),
        }
    }
}

#[async_trait]
impl TradeStreamProvider for ExchangePlugin {
    async fn stream_trades(
        &self,
        symbol: &str,
    ) -> Result<(StreamHandle, mpsc::Receiver<Trade>), PluginError> {
        match &self.adapter {
            VenueAdapter::Binance(b) => Ok(b.stream_trades(symbol)),
            VenueAdapter::Kraken(_) => Err(self.unsupported("stream_trades")),
        }
    }
}

#[async_trait]
impl OrderBookStreamProvider for ExchangePlugin {
    async fn stream_order_book(
        &self,
        symbol: &str,
    ) -> Result<(StreamHandle, mpsc::Receiver<OrderBook>), PluginError> {
        match &self.adapter {
            VenueAdapter::Binance(b) => Ok(b.stream_order_book(symbol)),
            VenueAdapter::Kraken(_) => Err(self.unsupported("stream_order_book")),
        }
    }
}

/// Factory registering the multi-venue crypto plugin.
pub struct ExchangeFactory;

impl PluginFactory for ExchangeFactory {
    fn plugin_key(&self) -> &'static str {
        "exchange"
    }

    fn supported_markets(&self) -> &'static [&'static str] {
        &["crypto"]
    }

    fn configurable_providers(&self) -> Vec<String> {
        vec!["binance".to_string(), "kraken".to_string()]
    }

    fn build(&self, spec: &InstanceSpec) -> Result<Arc<dyn MarketPlugin>, PluginError> {
        Ok(Arc::new(ExchangePlugin::from_spec(spec)?))
    }
}
