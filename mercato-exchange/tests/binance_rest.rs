use std::sync::Arc;

use httpmock::prelude::*;
use serde_json::json;

use mercato_core::plugin::{Credentials, InstanceSpec, MarketPlugin, PluginFactory};
use mercato_core::PluginError;
use mercato_exchange::ExchangeFactory;
use mercato_types::Timeframe;

fn spec_for(server: &MockServer) -> InstanceSpec {
    let mut spec = InstanceSpec::new("binance");
    spec.extras
        .insert("rest_base_url".to_string(), server.base_url());
    spec
}

fn build(server: &MockServer) -> Arc<dyn MarketPlugin> {
    ExchangeFactory.build(&spec_for(server)).unwrap()
}

fn tf(s: &str) -> Timeframe {
    s.parse().unwrap()
}

#[tokio::test]
async fn klines_map_to_ascending_bars() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v3/klines")
                .query_param("symbol", "BTCUSDT")
                .query_param("interval", "1m")
                .query_param("startTime", "1700000000000");
            then.status(200).json_body(json!([
                [1700000000000i64, "100.0", "110.0", "90.0", "105.0", "12.5", 1700000059999i64],
                [1700000060000i64, "105.0", "106.0", "101.0", "102.0", "3.25", 1700000119999i64],
            ]));
        })
        .await;

    let plugin = build(&server);
    let bars = plugin
        .fetch_historical_ohlcv("BTC/USDT", tf("1m"), Some(1_700_000_000_000), Some(500), None)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].timestamp_ms, 1_700_000_000_000);
    assert_eq!(bars[0].open, 100.0);
    assert_eq!(bars[0].volume, 12.5);
    assert!(bars[0].timestamp_ms < bars[1].timestamp_ms);
    assert!(bars.iter().all(mercato_types::OhlcvBar::is_coherent));
}

#[tokio::test]
async fn latest_bar_skips_the_forming_kline() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v3/klines")
                .query_param("limit", "2");
            then.status(200).json_body(json!([
                [1700000000000i64, "1", "2", "1", "2", "5"],
                [1700000060000i64, "2", "3", "2", "3", "1"],
            ]));
        })
        .await;

    let plugin = build(&server);
    let latest = plugin
        .fetch_latest_ohlcv("BTC/USDT", tf("1m"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.timestamp_ms, 1_700_000_000_000);
}

#[tokio::test]
async fn rate_limiting_surfaces_as_network_error_after_bounded_retries() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v3/klines");
            then.status(429).body("{\"code\":-1003,\"msg\":\"Too many requests.\"}");
        })
        .await;

    let plugin = build(&server);
    let err = plugin
        .fetch_historical_ohlcv("BTC/USDT", tf("1m"), None, None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, PluginError::Network { .. }), "{err}");
    assert_eq!(err.provider(), "binance");
    // Default policy: three attempts total, then give up.
    assert_eq!(mock.hits_async().await, 3);
}

#[tokio::test]
async fn auth_rejection_is_terminal() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v3/klines");
            then.status(401).body("{\"msg\":\"Invalid API-key\"}");
        })
        .await;

    let plugin = build(&server);
    let err = plugin
        .fetch_historical_ohlcv("BTC/USDT", tf("1m"), None, None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, PluginError::Auth { .. }), "{err}");
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn open_orders_require_credentials() {
    let server = MockServer::start_async().await;
    let plugin = build(&server);
    let err = plugin
        .as_open_orders_provider()
        .unwrap()
        .fetch_open_orders(Some("BTC/USDT"))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Auth { .. }), "{err}");
}

#[tokio::test]
async fn open_orders_are_signed_and_mapped() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v3/openOrders")
                .header("X-MBX-APIKEY", "key-1")
                .query_param_exists("signature")
                .query_param_exists("timestamp");
            then.status(200).json_body(json!([{
                "symbol": "BTCUSDT",
                "orderId": 42,
                "clientOrderId": "abc",
                "price": "95.50",
                "origQty": "2.0",
                "executedQty": "0.5",
                "status": "PARTIALLY_FILLED",
                "type": "LIMIT",
                "side": "BUY",
                "time": 1700000000000i64
            }]));
        })
        .await;

    let mut spec = spec_for(&server);
    spec.credentials = Some(Credentials {
        api_key: "key-1".into(),
        api_secret: "secret-1".into(),
        passphrase: None,
    });
    let plugin = ExchangeFactory.build(&spec).unwrap();
    let orders = plugin
        .as_open_orders_provider()
        .unwrap()
        .fetch_open_orders(Some("BTC/USDT"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(order.id, "42");
    assert_eq!(order.symbol, "BTC/USDT");
    assert_eq!(order.side, "buy");
    assert_eq!(order.status, "partially_filled");
    assert_eq!(order.remaining, 1.5);
}

#[tokio::test]
async fn trading_symbols_come_from_exchange_info() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v3/exchangeInfo");
            then.status(200).json_body(json!({
                "symbols": [
                    {"status": "TRADING", "baseAsset": "BTC", "quoteAsset": "USDT"},
                    {"status": "BREAK", "baseAsset": "OLD", "quoteAsset": "USDT"},
                    {"status": "TRADING", "baseAsset": "ETH", "quoteAsset": "USDT"}
                ]
            }));
        })
        .await;

    let plugin = build(&server);
    let symbols = plugin.get_symbols("crypto").await.unwrap();
    assert_eq!(symbols, vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()]);
}
