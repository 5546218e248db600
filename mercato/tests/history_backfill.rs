mod helpers;

use std::sync::atomic::Ordering;
use std::time::Duration;

use helpers::{bar, harness};
use mercato_core::{CandleStore, SeriesKey};
use mercato_mock::MockPlugin;
use mercato_types::Timeframe;

const T: i64 = 1_699_999_980_000;
const M: i64 = 60_000;

fn tf(s: &str) -> Timeframe {
    s.parse().unwrap()
}

// A single missing bar becomes a single plugin chunk request bounded to the
// gap; the result is merged, ascending, and duplicate-free, and the repair
// is persisted.
#[tokio::test]
async fn gaps_trigger_bounded_backfill() {
    let plugin = MockPlugin::new("mock").with_history(vec![
        bar(T, 1.0),
        bar(T + M, 2.0),
        bar(T + 2 * M, 3.0),
        bar(T + 3 * M, 4.0),
    ]);
    let h = harness(plugin, Duration::from_millis(20));
    let key = SeriesKey::new("crypto", "mock", "BTC/USDT", tf("1m"));
    h.store
        .upsert(&key, &[bar(T, 1.0), bar(T + M, 2.0), bar(T + 3 * M, 4.0)])
        .await
        .unwrap();

    let bars = h
        .history
        .fetch_ohlcv(
            "crypto",
            "mock",
            "BTC/USDT",
            tf("1m"),
            Some(T),
            Some(T + 4 * M),
            10,
            None,
        )
        .await
        .unwrap();

    let ts: Vec<i64> = bars.iter().map(|b| b.timestamp_ms).collect();
    assert_eq!(ts, vec![T, T + M, T + 2 * M, T + 3 * M]);

    // Exactly one chunk request, bounded to the hole around T+2M.
    let requests = h.plugin.recorded_history_requests();
    assert_eq!(requests.len(), 1, "{requests:?}");
    assert_eq!(requests[0].0, Some(T + 2 * M));
    assert_eq!(requests[0].2, Some(T + 3 * M));

    // The repair was upserted: the full range now lives in the warehouse.
    let stored = h.store.range(&key, Some(T), Some(T + 4 * M), 10).await.unwrap();
    assert_eq!(stored.len(), 4);
}

// Once the warehouse covers the window, repeated fetches return identical
// data without touching the venue again.
#[tokio::test]
async fn fetch_is_idempotent_once_cached() {
    let plugin = MockPlugin::new("mock").with_history(vec![
        bar(T, 1.0),
        bar(T + M, 2.0),
        bar(T + 2 * M, 3.0),
    ]);
    let h = harness(plugin, Duration::from_millis(20));

    let fetch = || {
        h.history.fetch_ohlcv(
            "crypto",
            "mock",
            "BTC/USDT",
            tf("1m"),
            Some(T),
            Some(T + 3 * M),
            10,
            None,
        )
    };
    let first = fetch().await.unwrap();
    let calls_after_first = h.plugin.counters.history_fetches.load(Ordering::SeqCst);
    assert!(calls_after_first > 0);

    let second = fetch().await.unwrap();
    let third = fetch().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(
        h.plugin.counters.history_fetches.load(Ordering::SeqCst),
        calls_after_first,
        "cached window still hit the venue"
    );
}

// Timeframes the venue cannot serve natively are built from one-minute
// bars: buckets align, OHLC follows first/max/min/last, volumes sum, and
// only fully closed buckets are produced.
#[tokio::test]
async fn unsupported_timeframes_resample_from_minutes() {
    // Base aligned to the five-minute grid.
    const T5: i64 = 1_699_999_800_000;
    let minutes: Vec<_> = (0..10)
        .map(|i| {
            let mut b = bar(T5 + i * M, 10.0 + i as f64);
            b.volume = 2.0;
            b
        })
        .collect();
    let plugin = MockPlugin::new("mock")
        .with_history(minutes)
        .with_native_timeframes(&["1m"]);
    let h = harness(plugin, Duration::from_millis(20));

    let bars = h
        .history
        .fetch_ohlcv(
            "crypto",
            "mock",
            "BTC/USDT",
            tf("5m"),
            Some(T5),
            Some(T5 + 10 * M),
            10,
            None,
        )
        .await
        .unwrap();

    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].timestamp_ms, T5);
    assert_eq!(bars[1].timestamp_ms, T5 + 5 * M);
    // First bucket: minutes 0..5.
    assert_eq!(bars[0].open, 10.0);
    assert_eq!(bars[0].close, 14.0);
    assert_eq!(bars[0].volume, 10.0);
    // Second bucket: minutes 5..10.
    assert_eq!(bars[1].open, 15.0);
    assert_eq!(bars[1].close, 19.0);

    // The venue was asked for one-minute bars, not the target cadence.
    let requests = h.plugin.recorded_history_requests();
    assert!(!requests.is_empty());

    // The resampled series is cached under the target timeframe.
    let key = SeriesKey::new("crypto", "mock", "BTC/USDT", tf("5m"));
    let stored = h.store.range(&key, Some(T5), Some(T5 + 10 * M), 10).await.unwrap();
    assert_eq!(stored.len(), 2);
}

// Empty windows short-circuit: a zero limit or an inverted range fetches
// nothing and calls nobody.
#[tokio::test]
async fn degenerate_windows_return_empty() {
    let plugin = MockPlugin::new("mock");
    let h = harness(plugin, Duration::from_millis(20));

    let none = h
        .history
        .fetch_ohlcv("crypto", "mock", "BTC/USDT", tf("1m"), Some(T), Some(T), 10, None)
        .await
        .unwrap();
    assert!(none.is_empty());

    let zero_limit = h
        .history
        .fetch_ohlcv(
            "crypto",
            "mock",
            "BTC/USDT",
            tf("1m"),
            Some(T),
            Some(T + M),
            0,
            None,
        )
        .await
        .unwrap();
    assert!(zero_limit.is_empty());
    assert_eq!(h.plugin.counters.history_fetches.load(Ordering::SeqCst), 0);
}
