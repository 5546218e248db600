#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use mercato::catalog::PluginCatalog;
use mercato::config::PollingConfig;
use mercato::credentials::NoCredentials;
use mercato::history::{HistoryConfig, HistoryService};
use mercato::pool::PluginPool;
use mercato::registry::ConnId;
use mercato::streaming::StreamingManager;
use mercato::subscription::{Outbox, OutboxReader, SubscriptionService};
use mercato::warehouse::MemoryCandleStore;
use mercato_core::{MemoryBus, MessageBus};
use mercato_mock::{MockFactory, MockPlugin};
use mercato_types::{OhlcvBar, StreamKind, ViewKey};

pub struct Harness {
    pub bus: Arc<MemoryBus>,
    pub store: Arc<MemoryCandleStore>,
    pub plugin: Arc<MockPlugin>,
    pub pool: Arc<PluginPool>,
    pub manager: Arc<StreamingManager>,
    pub history: Arc<HistoryService>,
    pub subscriptions: Arc<SubscriptionService>,
}

/// Wire the full service stack around one scripted mock venue registered as
/// provider `mock` on market `crypto`.
pub fn harness(plugin: MockPlugin, poll_interval: Duration) -> Harness {
    let plugin = Arc::new(plugin);
    let factory = MockFactory::new(&["crypto"]).with_instance(Arc::clone(&plugin));
    let mut catalog = PluginCatalog::new();
    catalog.register(Arc::new(factory));

    let pool = PluginPool::new(
        Arc::new(catalog),
        Arc::new(NoCredentials),
        Duration::from_secs(5),
        Duration::from_secs(300),
    );
    let bus = Arc::new(MemoryBus::new());
    let bus_for_manager: Arc<dyn MessageBus> = Arc::clone(&bus) as Arc<dyn MessageBus>;
    let bus_for_subs: Arc<dyn MessageBus> = Arc::clone(&bus) as Arc<dyn MessageBus>;
    let store = Arc::new(MemoryCandleStore::new());
    let store_for_history: Arc<dyn mercato_core::CandleStore> =
        Arc::clone(&store) as Arc<dyn mercato_core::CandleStore>;
    let manager = Arc::new(StreamingManager::new(
        bus_for_manager,
        Arc::clone(&pool),
        PollingConfig::uniform(poll_interval),
    ));
    let history = Arc::new(HistoryService::new(
        store_for_history,
        Arc::clone(&pool),
        HistoryConfig::default(),
    ));
    let subscriptions = Arc::new(SubscriptionService::new(
        Arc::clone(&manager),
        Arc::clone(&history),
        bus_for_subs,
        200,
    ));
    Harness {
        bus,
        store,
        plugin,
        pool,
        manager,
        history,
        subscriptions,
    }
}

impl Harness {
    /// Accept a synthetic client and return its id plus the outbound reader.
    pub fn connect(&self, user_id: Option<&str>) -> (ConnId, OutboxReader) {
        let conn = ConnId::next();
        let (outbox, reader) = Outbox::new(64);
        self.subscriptions
            .connect(conn, outbox, user_id.map(str::to_string));
        (conn, reader)
    }
}

/// Next outbound frame as JSON, within a bounded wait.
pub async fn next_frame(reader: &mut OutboxReader) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(5), reader.next())
        .await
        .expect("timed out waiting for an outbound frame")
        .expect("outbox closed unexpectedly");
    serde_json::from_str(&frame.text).expect("outbound frames are JSON")
}

/// Read frames until one with `type == wanted` arrives; panics on error
/// frames encountered on the way.
pub async fn frame_of_type(reader: &mut OutboxReader, wanted: &str) -> Value {
    loop {
        let frame = next_frame(reader).await;
        let kind = frame["type"].as_str().unwrap_or_default().to_string();
        if kind == wanted {
            return frame;
        }
        assert_ne!(kind, "error", "unexpected error frame: {frame}");
    }
}

pub fn bar(ts: i64, close: f64) -> OhlcvBar {
    OhlcvBar {
        timestamp_ms: ts,
        open: close,
        high: close + 0.5,
        low: close - 0.5,
        close,
        volume: 1.0,
    }
}

pub fn ohlcv_view(symbol: &str, tf: &str) -> ViewKey {
    ViewKey::new("crypto", "mock", symbol, StreamKind::Ohlcv, Some(tf), None).unwrap()
}

pub fn trades_view(symbol: &str) -> ViewKey {
    ViewKey::new("crypto", "mock", symbol, StreamKind::Trades, None, None).unwrap()
}

pub fn book_view(symbol: &str) -> ViewKey {
    ViewKey::new("crypto", "mock", symbol, StreamKind::OrderBook, None, None).unwrap()
}
