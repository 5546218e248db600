use std::sync::Arc;

use httpmock::prelude::*;
use serde_json::json;

use mercato_alpaca::AlpacaFactory;
use mercato_core::plugin::{Credentials, InstanceSpec, MarketPlugin, PluginFactory};
use mercato_core::PluginError;
use mercato_types::{StreamKind, Timeframe};

fn build(server: &MockServer) -> Arc<dyn MarketPlugin> {
    let mut spec = InstanceSpec::new("alpaca").with_credentials(Credentials {
        api_key: "key-id".into(),
        api_secret: "key-secret".into(),
        passphrase: None,
    });
    spec.extras
        .insert("data_base_url".to_string(), server.base_url());
    spec.extras
        .insert("broker_base_url".to_string(), server.base_url());
    AlpacaFactory.build(&spec).unwrap()
}

#[test]
fn the_venue_is_rest_only() {
    let server = MockServer::start();
    let plugin = build(&server);
    let features = plugin.features();
    assert!(!features.can_stream(StreamKind::Ohlcv));
    assert!(!features.can_stream(StreamKind::Trades));
    assert!(features.can_poll(StreamKind::Ohlcv));
    assert!(features.can_poll(StreamKind::Trades));
    assert!(features.can_poll(StreamKind::UserOrders));
    // No order book endpoint: that kind has no fallback either.
    assert!(!features.can_poll(StreamKind::OrderBook));
}

#[tokio::test]
async fn bars_parse_rfc3339_timestamps() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v2/stocks/AAPL/bars")
                .query_param("timeframe", "1Min")
                .header("APCA-API-KEY-ID", "key-id");
            then.status(200).json_body(json!({
                "bars": [
                    {"t": "2023-11-14T22:13:20Z", "o": 189.5, "h": 190.0, "l": 189.2, "c": 189.9, "v": 1000},
                    {"t": "2023-11-14T22:14:20Z", "o": 189.9, "h": 190.4, "l": 189.8, "c": 190.1, "v": 800}
                ],
                "next_page_token": null
            }));
        })
        .await;

    let plugin = build(&server);
    let tf: Timeframe = "1m".parse().unwrap();
    let bars = plugin
        .fetch_historical_ohlcv("AAPL", tf, Some(1_700_000_000_000), Some(100), None)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].timestamp_ms, 1_700_000_000_000);
    assert_eq!(bars[0].close, 189.9);
    assert!(bars[0].timestamp_ms < bars[1].timestamp_ms);
}

#[tokio::test]
async fn latest_minute_bar_uses_the_latest_endpoint() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v2/stocks/AAPL/bars/latest");
            then.status(200).json_body(json!({
                "bar": {"t": "2023-11-14T22:13:20Z", "o": 1.0, "h": 2.0, "l": 0.5, "c": 1.5, "v": 10}
            }));
        })
        .await;

    let plugin = build(&server);
    let tf: Timeframe = "1m".parse().unwrap();
    let bar = plugin.fetch_latest_ohlcv("AAPL", tf).await.unwrap().unwrap();
    assert_eq!(bar.timestamp_ms, 1_700_000_000_000);
    assert_eq!(bar.volume, 10.0);
}

#[tokio::test]
async fn snapshot_feeds_the_ticker() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v2/stocks/AAPL/snapshot");
            then.status(200).json_body(json!({
                "latestTrade": {"p": 189.9, "t": "2023-11-14T22:13:20Z"},
                "latestQuote": {"bp": 189.8, "ap": 190.0},
                "dailyBar": {"h": 191.0, "l": 188.0, "v": 500000}
            }));
        })
        .await;

    let plugin = build(&server);
    let ticker = plugin
        .as_ticker_provider()
        .unwrap()
        .fetch_ticker("AAPL")
        .await
        .unwrap();
    assert_eq!(ticker.last, Some(189.9));
    assert_eq!(ticker.bid, Some(189.8));
    assert_eq!(ticker.timestamp_ms, Some(1_700_000_000_000));
}

#[tokio::test]
async fn open_orders_map_broker_fields() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v2/orders")
                .query_param("status", "open");
            then.status(200).json_body(json!([{
                "id": "904837e3-3b76-47ec-b432-046db621571b",
                "client_order_id": "my-1",
                "created_at": "2023-11-14T22:13:20Z",
                "symbol": "AAPL",
                "qty": "5",
                "filled_qty": "1",
                "type": "limit",
                "side": "buy",
                "limit_price": "185.50",
                "status": "partially_filled"
            }]));
        })
        .await;

    let plugin = build(&server);
    let orders = plugin
        .as_open_orders_provider()
        .unwrap()
        .fetch_open_orders(None)
        .await
        .unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].id, "904837e3-3b76-47ec-b432-046db621571b");
    assert_eq!(orders[0].remaining, 4.0);
    assert_eq!(orders[0].price, Some(185.5));
}

#[tokio::test]
async fn missing_credentials_fail_before_any_request() {
    let server = MockServer::start_async().await;
    let mut spec = InstanceSpec::new("alpaca");
    spec.extras
        .insert("data_base_url".to_string(), server.base_url());
    let plugin = AlpacaFactory.build(&spec).unwrap();
    let tf: Timeframe = "1m".parse().unwrap();
    let err = plugin.fetch_latest_ohlcv("AAPL", tf).await.unwrap_err();
    assert!(matches!(err, PluginError::Auth { .. }), "{err}");
}
