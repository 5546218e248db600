use mercato_types::{OhlcvBar, Timeframe};

/// Generic resampler: sorts bars, groups them by a bucket function, and
/// aggregates OHLCV within each bucket (open = first, high = max, low = min,
/// close = last, volume = sum).
fn resample_by<F>(mut bars: Vec<OhlcvBar>, bucket_of: F) -> Vec<OhlcvBar>
where
    F: Fn(i64) -> i64,
{
    if bars.is_empty() {
        return bars;
    }
    bars.sort_by_key(|b| b.timestamp_ms);

    let mut out: Vec<OhlcvBar> = Vec::new();
    let mut iter = bars.into_iter();
    let first = iter.next().expect("non-empty after sort");
    let mut current = OhlcvBar {
        timestamp_ms: bucket_of(first.timestamp_ms),
        ..first
    };

    for bar in iter {
        let bucket = bucket_of(bar.timestamp_ms);
        if bucket == current.timestamp_ms {
            if bar.high > current.high {
                current.high = bar.high;
            }
            if bar.low < current.low {
                current.low = bar.low;
            }
            current.close = bar.close;
            current.volume += bar.volume;
        } else {
            out.push(current);
            current = OhlcvBar {
                timestamp_ms: bucket,
                ..bar
            };
        }
    }
    out.push(current);
    out
}

/// Resample bars into `target` buckets aligned to
/// `floor(timestamp / period) * period`.
///
/// Input bars may be unsorted; output is ascending with one bar per
/// populated bucket. Buckets containing no input produce no output.
#[must_use]
pub fn resample(bars: Vec<OhlcvBar>, target: Timeframe) -> Vec<OhlcvBar> {
    resample_by(bars, move |ts| target.bucket_start(ts))
}

/// Like [`resample`], then drop any bucket that is not fully closed before
/// `complete_before_ms`. Historical output must never include a partially
/// built trailing bucket.
#[must_use]
pub fn resample_closed(
    bars: Vec<OhlcvBar>,
    target: Timeframe,
    complete_before_ms: i64,
) -> Vec<OhlcvBar> {
    let period = target.period_ms();
    let mut out = resample(bars, target);
    out.retain(|b| b.timestamp_ms + period <= complete_before_ms);
    out
}
