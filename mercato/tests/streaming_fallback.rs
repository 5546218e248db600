mod helpers;

use std::time::Duration;

use helpers::{bar, harness, ohlcv_view, trades_view};
use mercato::streaming::FeedKind;
use mercato_core::MessageBus;
use mercato_mock::{MockPlugin, PollStep};
use mercato_types::StreamMessage;

const T: i64 = 1_699_999_980_000;
const POLL: Duration = Duration::from_millis(20);

async fn collect_published(
    sub: &mut Box<dyn mercato_core::BusSubscriber>,
    window: Duration,
) -> Vec<StreamMessage> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, sub.next_message()).await {
            Ok(Ok(Some(payload))) => {
                seen.push(serde_json::from_slice(&payload).expect("bus messages decode"));
            }
            Ok(_) | Err(_) => break,
        }
    }
    seen
}

// Three poll cycles returning T, T, T+60000 publish exactly twice: the
// repeated snapshot is suppressed by content hashing.
#[tokio::test]
async fn polling_suppresses_unchanged_snapshots() {
    let plugin = MockPlugin::new("mock").with_latest_script(vec![
        PollStep::Bar(bar(T, 10.0)),
        PollStep::Bar(bar(T, 10.0)),
        PollStep::Bar(bar(T + 60_000, 11.0)),
    ]);
    let h = harness(plugin, POLL);
    let view = ohlcv_view("BTC/USDT", "1m");
    let mut sub = h.bus.subscribe(&view.channel()).await.unwrap();

    h.manager.ensure_active(&view, None).await.unwrap();
    assert_eq!(h.manager.mode_of(&view), Some(FeedKind::Polling));

    // Roomy window: at least five poll cycles.
    let published = collect_published(&mut sub, POLL * 10).await;
    assert_eq!(published.len(), 2, "{published:?}");
    match (&published[0], &published[1]) {
        (
            StreamMessage::Ohlcv { bar: first, .. },
            StreamMessage::Ohlcv { bar: second, .. },
        ) => {
            assert_eq!(first.timestamp_ms, T);
            assert_eq!(second.timestamp_ms, T + 60_000);
        }
        other => panic!("unexpected messages: {other:?}"),
    }

    h.manager.release(&view).await;
    assert_eq!(h.manager.active_feeds(), 0);
}

// A second ensure_active for the same key must not start a second upstream
// session; releases are refcounted.
#[tokio::test]
async fn repeated_ensure_reuses_the_upstream_feed() {
    let plugin = MockPlugin::new("mock").with_native_ohlcv(vec![bar(T, 1.0)]);
    let h = harness(plugin, POLL);
    let view = ohlcv_view("BTC/USDT", "1m");

    h.manager.ensure_active(&view, None).await.unwrap();
    h.manager.ensure_active(&view, None).await.unwrap();

    assert_eq!(h.manager.refcount(&view), Some(2));
    assert_eq!(h.manager.mode_of(&view), Some(FeedKind::Native));
    assert_eq!(
        h.plugin
            .counters
            .stream_starts
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    h.manager.release(&view).await;
    assert_eq!(h.manager.refcount(&view), Some(1));
    h.manager.release(&view).await;
    assert_eq!(h.manager.refcount(&view), None);
    assert_eq!(h.manager.active_feeds(), 0);
}

// Concurrent first subscribers race activation; only one upstream session
// may result.
#[tokio::test]
async fn concurrent_activation_starts_one_session() {
    let plugin = MockPlugin::new("mock").with_native_ohlcv(vec![bar(T, 1.0)]);
    let h = harness(plugin, POLL);
    let view = ohlcv_view("BTC/USDT", "1m");

    let results = futures::future::join_all(
        (0..8).map(|_| h.manager.ensure_active(&view, None)),
    )
    .await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(h.manager.refcount(&view), Some(8));
    assert_eq!(
        h.plugin
            .counters
            .stream_starts
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    for _ in 0..8 {
        h.manager.release(&view).await;
    }
    assert_eq!(h.manager.active_feeds(), 0);
}

// A venue that reports the polled operation as unsupported kills the feed
// terminally: record gone, no task left running.
#[tokio::test]
async fn unsupported_polling_removes_the_record() {
    let plugin = MockPlugin::new("mock").with_latest_script(vec![PollStep::NotSupported]);
    let h = harness(plugin, POLL);
    let view = ohlcv_view("BTC/USDT", "1m");

    h.manager.ensure_active(&view, None).await.unwrap();
    assert_eq!(h.manager.mode_of(&view), Some(FeedKind::Polling));

    let deadline = tokio::time::Instant::now() + POLL * 20;
    while h.manager.active_feeds() != 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "terminal polling failure did not remove the record"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.manager.refcount(&view), None);
}

// No native stream and no compatible REST operation: activation fails
// cleanly and leaves no bookkeeping behind.
#[tokio::test]
async fn no_fallback_fails_activation_cleanly() {
    let plugin = MockPlugin::new("mock");
    let h = harness(plugin, POLL);
    let view = trades_view("BTC/USDT");

    let err = h.manager.ensure_active(&view, None).await.unwrap_err();
    assert!(err.to_string().contains("not supported"), "{err}");
    assert_eq!(h.manager.active_feeds(), 0);
    assert_eq!(h.manager.refcount(&view), None);
}

// Transient poll failures extend the wait but do not kill the loop.
#[tokio::test]
async fn transient_poll_failures_recover() {
    let plugin = MockPlugin::new("mock").with_latest_script(vec![
        PollStep::NetworkError,
        PollStep::Bar(bar(T, 10.0)),
    ]);
    let h = harness(plugin, POLL);
    let view = ohlcv_view("BTC/USDT", "1m");
    let mut sub = h.bus.subscribe(&view.channel()).await.unwrap();

    h.manager.ensure_active(&view, None).await.unwrap();
    let published = collect_published(&mut sub, POLL * 15).await;
    assert_eq!(published.len(), 1, "{published:?}");
    h.manager.release(&view).await;
}
