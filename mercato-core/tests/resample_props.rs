use std::collections::BTreeMap;

use mercato_core::{resample, resample_closed};
use mercato_types::{OhlcvBar, Timeframe, TimeframeUnit};
use proptest::prelude::*;

fn arb_bar() -> impl Strategy<Value = OhlcvBar> {
    (
        0i64..2_000_000_000i64,
        1u32..100_000u32,
        1u32..100_000u32,
        0u32..1_000_000u32,
    )
        .prop_map(|(secs, o, c, vol)| {
            // Coherent OHLC around the generated open/close body.
            let open = f64::from(o) / 100.0;
            let close = f64::from(c) / 100.0;
            let high = open.max(close) + 0.5;
            let low = (open.min(close) - 0.5).max(0.0);
            OhlcvBar {
                timestamp_ms: secs * 1_000,
                open,
                high,
                low,
                close,
                volume: f64::from(vol) / 10.0,
            }
        })
}

fn dedup_by_ts(bars: Vec<OhlcvBar>) -> Vec<OhlcvBar> {
    let mut map: BTreeMap<i64, OhlcvBar> = BTreeMap::new();
    for b in bars {
        map.entry(b.timestamp_ms).or_insert(b);
    }
    map.into_values().collect()
}

/// Brute-force reference: group by bucket, aggregate with explicit min/max
/// scans over the sorted group.
fn reference_resample(bars: &[OhlcvBar], target: Timeframe) -> Vec<OhlcvBar> {
    let mut groups: BTreeMap<i64, Vec<OhlcvBar>> = BTreeMap::new();
    for b in bars {
        groups.entry(target.bucket_start(b.timestamp_ms)).or_default().push(*b);
    }
    groups
        .into_iter()
        .map(|(bucket, mut group)| {
            group.sort_by_key(|b| b.timestamp_ms);
            OhlcvBar {
                timestamp_ms: bucket,
                open: group.first().unwrap().open,
                high: group.iter().map(|b| b.high).fold(f64::MIN, f64::max),
                low: group.iter().map(|b| b.low).fold(f64::MAX, f64::min),
                close: group.last().unwrap().close,
                volume: group.iter().map(|b| b.volume).sum(),
            }
        })
        .collect()
}

fn arb_minutes_tf() -> impl Strategy<Value = Timeframe> {
    (1u32..=240).prop_map(|n| Timeframe::new(n, TimeframeUnit::Minute).unwrap())
}

proptest! {
    // Bucket boundaries, per-bucket OHLC, and summed volume match the
    // brute-force reference for arbitrary bar streams.
    #[test]
    fn matches_brute_force_reference(
        bars in proptest::collection::vec(arb_bar(), 0..250),
        tf in arb_minutes_tf(),
    ) {
        let bars = dedup_by_ts(bars);
        let expected = reference_resample(&bars, tf);
        let actual = resample(bars, tf);
        prop_assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(&expected) {
            prop_assert_eq!(a.timestamp_ms, e.timestamp_ms);
            prop_assert_eq!(a.open, e.open);
            prop_assert_eq!(a.high, e.high);
            prop_assert_eq!(a.low, e.low);
            prop_assert_eq!(a.close, e.close);
            prop_assert!((a.volume - e.volume).abs() < 1e-6);
        }
    }

    // Resampling an already-resampled series with the same timeframe is a
    // fixed point.
    #[test]
    fn resample_is_idempotent(
        bars in proptest::collection::vec(arb_bar(), 0..250),
        tf in arb_minutes_tf(),
    ) {
        let once = resample(dedup_by_ts(bars), tf);
        let twice = resample(once.clone(), tf);
        prop_assert_eq!(once, twice);
    }

    // Output timestamps are strictly increasing and bucket-aligned.
    #[test]
    fn output_is_strictly_monotonic_and_aligned(
        bars in proptest::collection::vec(arb_bar(), 0..250),
        tf in arb_minutes_tf(),
    ) {
        let out = resample(dedup_by_ts(bars), tf);
        for pair in out.windows(2) {
            prop_assert!(pair[0].timestamp_ms < pair[1].timestamp_ms);
        }
        for b in &out {
            prop_assert_eq!(tf.bucket_start(b.timestamp_ms), b.timestamp_ms);
        }
    }

    // Closed-only output never includes a bucket that ends past the cutoff.
    #[test]
    fn closed_only_respects_the_cutoff(
        bars in proptest::collection::vec(arb_bar(), 0..250),
        tf in arb_minutes_tf(),
        cutoff in 0i64..2_000_000_000_000i64,
    ) {
        let out = resample_closed(dedup_by_ts(bars), tf, cutoff);
        for b in &out {
            prop_assert!(b.timestamp_ms + tf.period_ms() <= cutoff);
        }
    }
}
