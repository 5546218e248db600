use std::sync::Arc;

use httpmock::prelude::*;
use serde_json::json;

use mercato_core::plugin::{InstanceSpec, MarketPlugin, PluginFactory};
use mercato_core::PluginError;
use mercato_exchange::ExchangeFactory;
use mercato_types::Timeframe;

fn build(server: &MockServer) -> Arc<dyn MarketPlugin> {
    let mut spec = InstanceSpec::new("kraken");
    spec.extras
        .insert("rest_base_url".to_string(), server.base_url());
    ExchangeFactory.build(&spec).unwrap()
}

#[tokio::test]
async fn ohlc_rows_map_and_filter_by_bounds() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/0/public/OHLC")
                .query_param("pair", "XBTUSDT")
                .query_param("interval", "1");
            then.status(200).json_body(json!({
                "error": [],
                "result": {
                    "XXBTZUSDT": [
                        [1700000000, "100.0", "101.0", "99.0", "100.5", "100.2", "7.5", 12],
                        [1700000060, "100.5", "102.0", "100.0", "101.0", "101.0", "2.0", 4],
                        [1700000120, "101.0", "101.5", "100.5", "101.2", "101.1", "1.0", 2]
                    ],
                    "last": 1700000120
                }
            }));
        })
        .await;

    let plugin = build(&server);
    let tf: Timeframe = "1m".parse().unwrap();
    let bars = plugin
        .fetch_historical_ohlcv(
            "XBT/USDT",
            tf,
            Some(1_700_000_000_000),
            Some(10),
            Some(1_700_000_120_000),
        )
        .await
        .unwrap();

    // The third row is excluded by the exclusive upper bound.
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].timestamp_ms, 1_700_000_000_000);
    assert_eq!(bars[0].volume, 7.5);
    assert_eq!(bars[1].close, 101.0);
}

#[tokio::test]
async fn ticker_legs_are_extracted() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/0/public/Ticker");
            then.status(200).json_body(json!({
                "error": [],
                "result": {
                    "XXBTZUSDT": {
                        "a": ["50010.0", "1", "1.0"],
                        "b": ["50000.0", "2", "2.0"],
                        "c": ["50005.0", "0.1"],
                        "h": ["51000.0", "51500.0"],
                        "l": ["49000.0", "48800.0"],
                        "v": ["120.5", "340.1"]
                    }
                }
            }));
        })
        .await;

    let plugin = build(&server);
    let ticker = plugin
        .as_ticker_provider()
        .unwrap()
        .fetch_ticker("XBT/USDT")
        .await
        .unwrap();
    assert_eq!(ticker.symbol, "XBT/USDT");
    assert_eq!(ticker.bid, Some(50_000.0));
    assert_eq!(ticker.ask, Some(50_010.0));
    assert_eq!(ticker.last, Some(50_005.0));
    assert_eq!(ticker.base_volume, Some(120.5));
}

#[tokio::test]
async fn venue_errors_in_the_envelope_are_mapped() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/0/public/Ticker");
            then.status(200).json_body(json!({
                "error": ["EQuery:Unknown asset pair"],
                "result": {}
            }));
        })
        .await;

    let plugin = build(&server);
    let err = plugin
        .as_ticker_provider()
        .unwrap()
        .fetch_ticker("NOPE/USD")
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Venue { .. }), "{err}");
    assert_eq!(err.provider(), "kraken");
}

#[tokio::test]
async fn order_book_levels_parse_price_and_volume() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/0/public/Depth")
                .query_param("count", "5");
            then.status(200).json_body(json!({
                "error": [],
                "result": {
                    "XXBTZUSDT": {
                        "bids": [["50000.0", "1.5", 1700000000], ["49990.0", "0.4", 1700000001]],
                        "asks": [["50010.0", "2.0", 1700000002]]
                    }
                }
            }));
        })
        .await;

    let plugin = build(&server);
    let book = plugin
        .as_order_book_provider()
        .unwrap()
        .fetch_order_book("XBT/USDT", Some(5))
        .await
        .unwrap();
    assert_eq!(book.bids, vec![(50_000.0, 1.5), (49_990.0, 0.4)]);
    assert_eq!(book.asks, vec![(50_010.0, 2.0)]);
}

#[tokio::test]
async fn symbols_use_the_websocket_names() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/0/public/AssetPairs");
            then.status(200).json_body(json!({
                "error": [],
                "result": {
                    "XXBTZUSD": {"wsname": "XBT/USD"},
                    "XETHZUSD": {"wsname": "ETH/USD"}
                }
            }));
        })
        .await;

    let plugin = build(&server);
    let symbols = plugin.get_symbols("crypto").await.unwrap();
    assert_eq!(symbols, vec!["ETH/USD".to_string(), "XBT/USD".to_string()]);
}
