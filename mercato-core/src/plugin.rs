use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use mercato_types::{
    Balance, Features, InstrumentTradingDetails, OhlcvBar, Order, OrderBook, Position, Ticker,
    Timeframe, Trade,
};

use crate::error::PluginError;
use crate::stream::StreamHandle;

/// API credentials for authenticated venue access.
#[derive(Clone)]
pub struct Credentials {
    /// API key.
    pub api_key: String,
    /// API secret.
    pub api_secret: String,
    /// Extra passphrase, required by some venues.
    pub passphrase: Option<String>,
}

impl Credentials {
    /// Stable fingerprint used to key pooled instances. Never reveals the
    /// underlying material.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.api_key.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.api_secret.as_bytes());
        if let Some(p) = &self.passphrase {
            hasher.update(b"\x1f");
            hasher.update(p.as_bytes());
        }
        hex::encode(&hasher.finalize()[..12])
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"***")
            .field("api_secret", &"***")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Everything needed to construct a plugin instance for one provider.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    /// Concrete venue this instance talks to (`binance`, `alpaca`, ...).
    pub provider_id: String,
    /// Credentials, when the caller is authenticated.
    pub credentials: Option<Credentials>,
    /// Connect to the venue sandbox instead of production.
    pub is_testnet: bool,
    /// Bound on every REST request made by the instance.
    pub request_timeout: Duration,
    /// Plugin-specific extra settings.
    pub extras: HashMap<String, String>,
}

impl InstanceSpec {
    /// Spec with defaults: no credentials, production, 30s request timeout.
    #[must_use]
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            credentials: None,
            is_testnet: false,
            request_timeout: Duration::from_millis(30_000),
            extras: HashMap::new(),
        }
    }

    /// Attach credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Target the venue sandbox.
    #[must_use]
    pub const fn testnet(mut self, yes: bool) -> Self {
        self.is_testnet = yes;
        self
    }

    /// Override the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Focused role trait: REST ticker snapshots.
#[async_trait]
pub trait TickerProvider: Send + Sync {
    /// Latest ticker for `symbol` (display form).
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, PluginError>;
}

/// Focused role trait: REST order book snapshots.
#[async_trait]
pub trait OrderBookProvider: Send + Sync {
    /// Current order book for `symbol`, optionally truncated per side.
    async fn fetch_order_book(
        &self,
        symbol: &str,
        depth: Option<usize>,
    ) -> Result<OrderBook, PluginError>;
}

/// Focused role trait: the authenticated user's open orders.
#[async_trait]
pub trait OpenOrdersProvider: Send + Sync {
    /// Open orders, optionally filtered by symbol.
    async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>, PluginError>;
}

/// Focused role trait: order placement and account state.
#[async_trait]
pub trait TradingProvider: Send + Sync {
    /// Place an order. `price` is required for limit orders.
    async fn place_order(
        &self,
        symbol: &str,
        order_type: &str,
        side: &str,
        amount: f64,
        price: Option<f64>,
    ) -> Result<Order, PluginError>;

    /// Cancel an open order. Some venues require the symbol.
    async fn cancel_order(&self, order_id: &str, symbol: Option<&str>)
    -> Result<(), PluginError>;

    /// Account balances by asset code.
    async fn get_account_balance(&self) -> Result<HashMap<String, Balance>, PluginError>;

    /// Open positions, optionally filtered by symbols.
    async fn get_open_positions(
        &self,
        symbols: Option<&[String]>,
    ) -> Result<Vec<Position>, PluginError>;
}

/// Focused role trait: instrument metadata.
#[async_trait]
pub trait InstrumentDetailsProvider: Send + Sync {
    /// Trading rules for one instrument.
    async fn instrument_trading_details(
        &self,
        symbol: &str,
    ) -> Result<InstrumentTradingDetails, PluginError>;
}

/// Focused role trait: native (push) OHLCV bar streams.
///
/// Streaming providers return a [`StreamHandle`] driving the venue session
/// plus the update receiver. Dropping or stopping the handle closes the
/// venue-side subscription; closing the receiver has the same effect once
/// the session notices the send failure.
#[async_trait]
pub trait OhlcvStreamProvider: Send + Sync {
    /// Start a live bar stream for one symbol and timeframe.
    async fn stream_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<(StreamHandle, mpsc::Receiver<OhlcvBar>), PluginError>;
}

/// Focused role trait: native trade streams.
#[async_trait]
pub trait TradeStreamProvider: Send + Sync {
    /// Start a live public-trade stream for one symbol.
    async fn stream_trades(
        &self,
        symbol: &str,
    ) -> Result<(StreamHandle, mpsc::Receiver<Trade>), PluginError>;
}

/// Focused role trait: native order book streams.
#[async_trait]
pub trait OrderBookStreamProvider: Send + Sync {
    /// Start a live order book stream for one symbol.
    async fn stream_order_book(
        &self,
        symbol: &str,
    ) -> Result<(StreamHandle, mpsc::Receiver<OrderBook>), PluginError>;
}

/// Focused role trait: native authenticated user-order streams.
#[async_trait]
pub trait UserOrderStreamProvider: Send + Sync {
    /// Start a live stream of the authenticated user's order events.
    async fn stream_user_orders(
        &self,
    ) -> Result<(StreamHandle, mpsc::Receiver<Order>), PluginError>;
}

/// A configured connector for one provider.
///
/// Mandatory operations are methods on this trait; optional capabilities are
/// advertised through the `as_*_provider` accessors, which return a usable
/// trait object when (and only when) the venue supports the operation.
/// Callers must gate on [`MarketPlugin::features`] or the accessors and
/// never assume an optional capability.
///
/// Instances own their HTTP/WebSocket sessions and must reuse connections
/// across calls, bound every request by the configured `request_timeout`,
/// and surface rate limiting and transient transport failures as
/// [`PluginError::Network`] so callers can apply backoff.
#[async_trait]
pub trait MarketPlugin: Send + Sync {
    /// The concrete venue this instance is configured for.
    fn provider_id(&self) -> &str;

    /// Tradable symbols for a market category, in display form.
    async fn get_symbols(&self, market: &str) -> Result<Vec<String>, PluginError>;

    /// Historical bars, ascending, at most `limit`, starting at the first
    /// bar with `timestamp_ms >= since_ms`. `until_ms` is an exclusive upper
    /// bound when the venue supports one.
    async fn fetch_historical_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: Option<usize>,
        until_ms: Option<i64>,
    ) -> Result<Vec<OhlcvBar>, PluginError>;

    /// The most recent complete bar, or `None` when the venue has nothing.
    async fn fetch_latest_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<OhlcvBar>, PluginError>;

    /// Timeframes the venue serves natively, in wire form (`"1m"`, `"1h"`).
    /// `None` means unknown; callers then pass requests through untouched.
    fn supported_timeframes(&self) -> Option<&'static [&'static str]> {
        None
    }

    /// Release sessions and sockets. Idempotent.
    async fn close(&self) -> Result<(), PluginError>;

    /// Whether the venue reports `symbol` as tradable. The default goes
    /// through instrument details and reads the active flag.
    ///
    /// # Errors
    /// [`PluginError::NotSupported`] when the instance exposes no instrument
    /// metadata to validate against.
    async fn validate_symbol(&self, symbol: &str) -> Result<bool, PluginError> {
        match self.as_instrument_details_provider() {
            Some(details) => match details.instrument_trading_details(symbol).await {
                Ok(info) => Ok(info.is_active.unwrap_or(true)),
                Err(PluginError::NotSupported { .. }) => Ok(false),
                Err(err) => Err(err),
            },
            None => Err(PluginError::unsupported(
                self.provider_id().to_string(),
                "validate_symbol",
            )),
        }
    }

    /// The capability set, derived from the accessors so flags can never
    /// disagree with what is actually callable.
    fn features(&self) -> Features {
        let mut features = Features::empty();
        if self.as_ohlcv_stream_provider().is_some() {
            features |= Features::STREAM_OHLCV;
        }
        if self.as_trade_stream_provider().is_some() {
            features |= Features::STREAM_TRADES;
        }
        if self.as_order_book_stream_provider().is_some() {
            features |= Features::STREAM_ORDER_BOOK;
        }
        if self.as_user_order_stream_provider().is_some() {
            features |= Features::STREAM_USER_ORDERS;
        }
        if self.as_ticker_provider().is_some() {
            features |= Features::FETCH_TICKER;
        }
        if self.as_order_book_provider().is_some() {
            features |= Features::FETCH_ORDER_BOOK;
        }
        if self.as_open_orders_provider().is_some() {
            features |= Features::FETCH_OPEN_ORDERS;
        }
        if self.as_trading_provider().is_some() {
            features |= Features::TRADING;
        }
        if self.as_instrument_details_provider().is_some() {
            features |= Features::INSTRUMENT_DETAILS;
        }
        features
    }

    /// Advertise ticker snapshots when supported.
    fn as_ticker_provider(&self) -> Option<&dyn TickerProvider> {
        None
    }
    /// Advertise order book snapshots when supported.
    fn as_order_book_provider(&self) -> Option<&dyn OrderBookProvider> {
        None
    }
    /// Advertise open-orders listing when supported.
    fn as_open_orders_provider(&self) -> Option<&dyn OpenOrdersProvider> {
        None
    }
    /// Advertise trading when supported.
    fn as_trading_provider(&self) -> Option<&dyn TradingProvider> {
        None
    }
    /// Advertise instrument metadata when supported.
    fn as_instrument_details_provider(&self) -> Option<&dyn InstrumentDetailsProvider> {
        None
    }
    /// Advertise native OHLCV streaming when supported.
    fn as_ohlcv_stream_provider(&self) -> Option<&dyn OhlcvStreamProvider> {
        None
    }
    /// Advertise native trade streaming when supported.
    fn as_trade_stream_provider(&self) -> Option<&dyn TradeStreamProvider> {
        None
    }
    /// Advertise native order book streaming when supported.
    fn as_order_book_stream_provider(&self) -> Option<&dyn OrderBookStreamProvider> {
        None
    }
    /// Advertise native user-order streaming when supported.
    fn as_user_order_stream_provider(&self) -> Option<&dyn UserOrderStreamProvider> {
        None
    }
}

impl fmt::Debug for dyn MarketPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MarketPlugin")
            .field(&self.provider_id())
            .finish()
    }
}

/// Class-level surface of a plugin implementation: discovery metadata plus
/// instance construction. Factories are registered once at process start.
pub trait PluginFactory: Send + Sync {
    /// Unique key identifying the plugin implementation.
    fn plugin_key(&self) -> &'static str;

    /// Market categories this implementation can serve.
    fn supported_markets(&self) -> &'static [&'static str];

    /// Every provider id this implementation can be configured for.
    fn configurable_providers(&self) -> Vec<String>;

    /// Construct an instance for one provider.
    ///
    /// # Errors
    /// [`PluginError::Venue`] when the spec names a provider this factory
    /// does not configure, or construction fails.
    fn build(&self, spec: &InstanceSpec) -> Result<Arc<dyn MarketPlugin>, PluginError>;
}
