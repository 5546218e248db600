//! Deterministic scriptable plugin for integration tests.
//!
//! Behavior is configured through builder methods before the instance is
//! shared; counters and recorded calls let tests assert exactly what the
//! service layers did. The factory hands out pre-registered instances so a
//! test can keep scripting the same object the pool serves.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use mercato_core::plugin::{
    InstanceSpec, InstrumentDetailsProvider, MarketPlugin, OhlcvStreamProvider,
    OpenOrdersProvider, OrderBookProvider, PluginFactory, TickerProvider, TradeStreamProvider,
};
use mercato_core::{PluginError, StreamHandle};
use mercato_types::{
    InstrumentTradingDetails, OhlcvBar, Order, OrderBook, Ticker, Timeframe, Trade,
};

/// One scripted outcome for a polled fetch.
#[derive(Debug, Clone)]
pub enum PollStep {
    /// Return this bar.
    Bar(OhlcvBar),
    /// Return no data.
    Empty,
    /// Fail with a transient network error.
    NetworkError,
    /// Fail with a venue error.
    VenueError,
    /// Fail terminally unsupported.
    NotSupported,
}

/// Counters recording plugin activity.
#[derive(Debug, Default)]
pub struct MockCounters {
    /// Native stream sessions started.
    pub stream_starts: AtomicUsize,
    /// `fetch_latest_ohlcv` calls.
    pub latest_fetches: AtomicUsize,
    /// `fetch_ticker` calls.
    pub ticker_fetches: AtomicUsize,
    /// `fetch_historical_ohlcv` calls.
    pub history_fetches: AtomicUsize,
    /// `close` calls.
    pub closes: AtomicUsize,
}

impl MockCounters {
    fn bump(counter: &AtomicUsize) -> usize {
        counter.fetch_add(1, Ordering::SeqCst)
    }
}

/// A scriptable in-memory venue.
pub struct MockPlugin {
    provider: String,
    symbols: Vec<String>,
    history: Mutex<Vec<OhlcvBar>>,
    history_requests: Mutex<Vec<(Option<i64>, Option<usize>, Option<i64>)>>,
    latest_steps: Mutex<VecDeque<PollStep>>,
    repeat_last_poll: Mutex<Option<PollStep>>,
    ticker: Mutex<Option<Ticker>>,
    open_orders: Mutex<Vec<Order>>,
    native_ohlcv: Option<Vec<OhlcvBar>>,
    native_trades: Option<Vec<Trade>>,
    native_timeframes: Option<&'static [&'static str]>,
    with_ticker: bool,
    with_order_book: bool,
    with_open_orders: bool,
    with_details: bool,
    /// Counters shared with the test.
    pub counters: Arc<MockCounters>,
}

impl MockPlugin {
    /// A plugin named `provider` with no optional capabilities.
    #[must_use]
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            symbols: vec!["BTC/USDT".into(), "ETH/USDT".into()],
            history: Mutex::new(Vec::new()),
            history_requests: Mutex::new(Vec::new()),
            latest_steps: Mutex::new(VecDeque::new()),
            repeat_last_poll: Mutex::new(None),
            ticker: Mutex::new(None),
            open_orders: Mutex::new(Vec::new()),
            native_ohlcv: None,
            native_trades: None,
            native_timeframes: None,
            with_ticker: false,
            with_order_book: false,
            with_open_orders: false,
            with_details: false,
            counters: Arc::new(MockCounters::default()),
        }
    }

    /// Serve this full series from `fetch_historical_ohlcv`.
    #[must_use]
    pub fn with_history(self, bars: Vec<OhlcvBar>) -> Self {
        *self.history.lock().unwrap() = bars;
        self
    }

    /// Script `fetch_latest_ohlcv` outcomes; once exhausted the last step
    /// repeats.
    #[must_use]
    pub fn with_latest_script(self, steps: Vec<PollStep>) -> Self {
        *self.latest_steps.lock().unwrap() = steps.into();
        self
    }

    /// Expose a native OHLCV stream that emits `bars` then stays open.
    #[must_use]
    pub fn with_native_ohlcv(mut self, bars: Vec<OhlcvBar>) -> Self {
        self.native_ohlcv = Some(bars);
        self
    }

    /// Expose a native trade stream that emits `trades` then stays open.
    #[must_use]
    pub fn with_native_trades(mut self, trades: Vec<Trade>) -> Self {
        self.native_trades = Some(trades);
        self
    }

    /// Expose `fetch_ticker` returning this snapshot.
    #[must_use]
    pub fn with_ticker(mut self, ticker: Ticker) -> Self {
        self.with_ticker = true;
        *self.ticker.lock().unwrap() = Some(ticker);
        self
    }

    /// Expose `fetch_order_book` with an empty book.
    #[must_use]
    pub fn with_order_book(mut self) -> Self {
        self.with_order_book = true;
        self
    }

    /// Expose `fetch_open_orders` returning these orders.
    #[must_use]
    pub fn with_open_orders(mut self, orders: Vec<Order>) -> Self {
        self.with_open_orders = true;
        *self.open_orders.lock().unwrap() = orders;
        self
    }

    /// Expose instrument details (everything active).
    #[must_use]
    pub fn with_details(mut self) -> Self {
        self.with_details = true;
        self
    }

    /// Declare which timeframes the venue serves natively.
    #[must_use]
    pub fn with_native_timeframes(mut self, tfs: &'static [&'static str]) -> Self {
        self.native_timeframes = Some(tfs);
        self
    }

    /// Calls recorded against `fetch_historical_ohlcv` as
    /// `(since_ms, limit, until_ms)`.
    #[must_use]
    pub fn recorded_history_requests(&self) -> Vec<(Option<i64>, Option<usize>, Option<i64>)> {
        self.history_requests.lock().unwrap().clone()
    }

    fn next_poll_step(&self) -> PollStep {
        let mut steps = self.latest_steps.lock().unwrap();
        if let Some(step) = steps.pop_front() {
            if steps.is_empty() {
                *self.repeat_last_poll.lock().unwrap() = Some(step.clone());
            }
            step
        } else {
            self.repeat_last_poll
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(PollStep::Empty)
        }
    }

    fn spawn_feed<T: Send + 'static>(
        &self,
        items: Vec<T>,
    ) -> (StreamHandle, mpsc::Receiver<T>) {
        MockCounters::bump(&self.counters.stream_starts);
        let (tx, rx) = mpsc::channel(64);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            for item in items {
                if tx.send(item).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            // Hold the session open until stopped.
            let _ = (&mut stop_rx).await;
        });
        (StreamHandle::new(join, stop_tx), rx)
    }
}

#[async_trait]
impl MarketPlugin for MockPlugin {
    fn provider_id(&self) -> &str {
        &self.provider
    }

    async fn get_symbols(&self, _market: &str) -> Result<Vec<String>, PluginError> {
        Ok(self.symbols.clone())
    }

    async fn fetch_historical_ohlcv(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: Option<usize>,
        until_ms: Option<i64>,
    ) -> Result<Vec<OhlcvBar>, PluginError> {
        MockCounters::bump(&self.counters.history_fetches);
        self.history_requests
            .lock()
            .unwrap()
            .push((since_ms, limit, until_ms));
        let mut bars: Vec<OhlcvBar> = self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|b| since_ms.is_none_or(|s| b.timestamp_ms >= s))
            .filter(|b| until_ms.is_none_or(|u| b.timestamp_ms < u))
            .copied()
            .collect();
        bars.sort_by_key(|b| b.timestamp_ms);
        if let Some(limit) = limit {
            bars.truncate(limit);
        }
        Ok(bars)
    }

    async fn fetch_latest_ohlcv(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
    ) -> Result<Option<OhlcvBar>, PluginError> {
        MockCounters::bump(&self.counters.latest_fetches);
        match self.next_poll_step() {
            PollStep::Bar(bar) => Ok(Some(bar)),
            PollStep::Empty => Ok(None),
            PollStep::NetworkError => Err(PluginError::network(&self.provider, "scripted")),
            PollStep::VenueError => Err(PluginError::venue(&self.provider, "scripted")),
            PollStep::NotSupported => Err(PluginError::unsupported(
                self.provider.clone(),
                "fetch_latest_ohlcv",
            )),
        }
    }

    fn supported_timeframes(&self) -> Option<&'static [&'static str]> {
        self.native_timeframes
    }

    async fn close(&self) -> Result<(), PluginError> {
        MockCounters::bump(&self.counters.closes);
        Ok(())
    }

    fn as_ticker_provider(&self) -> Option<&dyn TickerProvider> {
        self.with_ticker.then_some(self as &dyn TickerProvider)
    }
    fn as_order_book_provider(&self) -> Option<&dyn OrderBookProvider> {
        self.with_order_book
            .then_some(self as &dyn OrderBookProvider)
    }
    fn as_open_orders_provider(&self) -> Option<&dyn OpenOrdersProvider> {
        self.with_open_orders
            .then_some(self as &dyn OpenOrdersProvider)
    }
    fn as_instrument_details_provider(&self) -> Option<&dyn InstrumentDetailsProvider> {
        self.with_details
            .then_some(self as &dyn InstrumentDetailsProvider)
    }
    fn as_ohlcv_stream_provider(&self) -> Option<&dyn OhlcvStreamProvider> {
        self.native_ohlcv
            .as_ref()
            .map(|_| self as &dyn OhlcvStreamProvider)
    }
    fn as_trade_stream_provider(&self) -> Option<&dyn TradeStreamProvider> {
        self.native_trades
            .as_ref()
            .map(|_| self as &dyn TradeStreamProvider)
    }
}

#[async_trait]
impl TickerProvider for MockPlugin {
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, PluginError> {
        MockCounters::bump(&self.counters.ticker_fetches);
        Ok(self.ticker.lock().unwrap().clone().unwrap_or(Ticker {
            symbol: symbol.to_string(),
            ..Ticker::default()
        }))
    }
}

#[async_trait]
impl OrderBookProvider for MockPlugin {
    async fn fetch_order_book(
        &self,
        symbol: &str,
        _depth: Option<usize>,
    ) -> Result<OrderBook, PluginError> {
        Ok(OrderBook {
            symbol: symbol.to_string(),
            timestamp_ms: None,
            bids: vec![(100.0, 1.0)],
            asks: vec![(101.0, 1.0)],
            nonce: None,
        })
    }
}

#[async_trait]
impl OpenOrdersProvider for MockPlugin {
    async fn fetch_open_orders(&self, _symbol: Option<&str>) -> Result<Vec<Order>, PluginError> {
        Ok(self.open_orders.lock().unwrap().clone())
    }
}

#[async_trait]
impl InstrumentDetailsProvider for MockPlugin {
    async fn instrument_trading_details(
        &self,
        symbol: &str,
    ) -> Result<InstrumentTradingDetails, PluginError> {
        Ok(InstrumentTradingDetails {
            symbol: symbol.to_string(),
            market_type: "spot".into(),
            base: None,
            quote: None,
            is_active: Some(true),
            precision: Default::default(),
            limits: Default::default(),
        })
    }
}

#[async_trait]
impl OhlcvStreamProvider for MockPlugin {
    async fn stream_ohlcv(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
    ) -> Result<(StreamHandle, mpsc::Receiver<OhlcvBar>), PluginError> {
        Ok(self.spawn_feed(self.native_ohlcv.clone().unwrap_or_default()))
    }
}

#[async_trait]
impl TradeStreamProvider for MockPlugin {
    async fn stream_trades(
        &self,
        _symbol: &str,
    ) -> Result<(StreamHandle, mpsc::Receiver<Trade>), PluginError> {
        Ok(self.spawn_feed(self.native_trades.clone().unwrap_or_default()))
    }
}

/// Factory serving pre-registered [`MockPlugin`] instances by provider id.
pub struct MockFactory {
    markets: &'static [&'static str],
    instances: Mutex<HashMap<String, Arc<MockPlugin>>>,
}

impl MockFactory {
    /// A factory for the given market categories.
    #[must_use]
    pub fn new(markets: &'static [&'static str]) -> Self {
        Self {
            markets,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Register the instance `build` should return for its provider id.
    #[must_use]
    pub fn with_instance(self, plugin: Arc<MockPlugin>) -> Self {
        self.instances
            .lock()
            .unwrap()
            .insert(plugin.provider_id().to_string(), plugin);
        self
    }
}

impl PluginFactory for MockFactory {
    fn plugin_key(&self) -> &'static str {
        "mock"
    }

    fn supported_markets(&self) -> &'static [&'static str] {
        self.markets
    }

    fn configurable_providers(&self) -> Vec<String> {
        self.instances.lock().unwrap().keys().cloned().collect()
    }

    fn build(&self, spec: &InstanceSpec) -> Result<Arc<dyn MarketPlugin>, PluginError> {
        let instance = self
            .instances
            .lock()
            .unwrap()
            .get(&spec.provider_id)
            .cloned();
        match instance {
            Some(plugin) => Ok(plugin),
            None => Err(PluginError::venue(
                spec.provider_id.clone(),
                "no mock instance registered for provider",
            )),
        }
    }
}
