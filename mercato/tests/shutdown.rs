mod helpers;

use std::sync::atomic::Ordering;
use std::time::Duration;

use helpers::{bar, frame_of_type, harness};
use mercato_mock::{MockPlugin, PollStep};
use mercato_types::Ticker;

const T: i64 = 1_699_999_980_000;
const POLL: Duration = Duration::from_millis(25);

// Full-stack shutdown with many connections holding mixed native and
// polling views: every listener and feed task ends, all bookkeeping
// empties, and the plugin pool closes its instances.
#[tokio::test]
async fn shutdown_drains_everything_in_order() {
    let plugin = MockPlugin::new("mock")
        .with_native_ohlcv(vec![bar(T, 1.0)])
        .with_ticker(Ticker {
            symbol: "ETH/USDT".into(),
            last: Some(2.0),
            ..Ticker::default()
        })
        .with_order_book();
    let h = harness(plugin, POLL);

    let symbols = ["BTC/USDT", "ETH/USDT", "SOL/USDT"];
    let mut readers = Vec::new();
    for _ in 0..4 {
        let (conn, mut reader) = h.connect(None);
        for symbol in symbols {
            // One native view and two polling views per connection.
            h.subscriptions
                .handle_subscribe(conn, "crypto", "mock", symbol, "ohlcv", Some("1m"), Some(T))
                .await;
            h.subscriptions
                .handle_subscribe(conn, "crypto", "mock", symbol, "trades", None, None)
                .await;
            h.subscriptions
                .handle_subscribe(conn, "crypto", "mock", symbol, "order_book", None, None)
                .await;
        }
        frame_of_type(&mut reader, "data").await;
        readers.push(reader);
    }

    // 3 symbols x 3 kinds shared across 4 connections -> 9 feeds.
    assert_eq!(h.manager.active_feeds(), 9);
    assert_eq!(h.subscriptions.client_count(), 4);

    h.subscriptions.shutdown().await;
    assert_eq!(h.subscriptions.client_count(), 0);
    assert_eq!(h.subscriptions.registry().connection_count(), 0);
    assert_eq!(h.manager.active_feeds(), 0);

    h.manager.shutdown().await;
    h.pool.shutdown().await;
    assert_eq!(h.pool.live_instances(), 0);
    assert!(h.plugin.counters.closes.load(Ordering::SeqCst) >= 1);

    // Nothing keeps polling after the layered teardown.
    let settled = h.plugin.counters.latest_fetches.load(Ordering::SeqCst)
        + h.plugin.counters.ticker_fetches.load(Ordering::SeqCst);
    tokio::time::sleep(POLL * 4).await;
    let after = h.plugin.counters.latest_fetches.load(Ordering::SeqCst)
        + h.plugin.counters.ticker_fetches.load(Ordering::SeqCst);
    assert_eq!(settled, after, "a task survived shutdown");

    // Readers drain to completion: outboxes were closed.
    for mut reader in readers {
        while tokio::time::timeout(Duration::from_millis(200), reader.next())
            .await
            .ok()
            .flatten()
            .is_some()
        {}
    }
}
