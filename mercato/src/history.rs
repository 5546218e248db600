use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use mercato_core::timeseries::{Gap, find_gaps, merge_by_priority, resample_closed};
use mercato_core::{CandleStore, SeriesKey};
use mercato_types::{OhlcvBar, Timeframe, ViewKey};

use crate::error::ServiceError;
use crate::pool::{PluginLease, PluginPool};

/// Bounds on plugin backfill behavior.
#[derive(Debug, Clone, Copy)]
pub struct HistoryConfig {
    /// Bars requested per plugin call.
    pub chunk_size: usize,
    /// Safety bound on calls spent filling a single gap.
    pub max_chunks_per_gap: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            max_chunks_per_gap: 100,
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// The historical fetch path: warehouse first, plugin backfill for the
/// holes, optional resampling, merged ascending output.
///
/// Every bar fetched from a venue is written back to the warehouse with an
/// idempotent upsert, so repeated fetches over the same range converge to
/// warehouse-only reads.
pub struct HistoryService {
    store: Arc<dyn CandleStore>,
    pool: Arc<PluginPool>,
    cfg: HistoryConfig,
}

impl HistoryService {
    /// Wire the service to its store and plugin pool.
    #[must_use]
    pub fn new(store: Arc<dyn CandleStore>, pool: Arc<PluginPool>, cfg: HistoryConfig) -> Self {
        Self { store, pool, cfg }
    }

    /// Convenience wrapper taking the identifiers from a view key.
    ///
    /// # Errors
    /// See [`fetch_ohlcv`](Self::fetch_ohlcv).
    pub async fn fetch_for_view(
        &self,
        view: &ViewKey,
        since: Option<i64>,
        limit: usize,
        user_id: Option<&str>,
    ) -> Result<Vec<OhlcvBar>, ServiceError> {
        let timeframe = view
            .timeframe()
            .ok_or_else(|| ServiceError::Validation("history requires an ohlcv view".into()))?;
        self.fetch_ohlcv(
            view.market(),
            view.provider(),
            view.symbol(),
            timeframe,
            since,
            None,
            limit,
            user_id,
        )
        .await
    }

    /// Fetch up to `limit` bars of `(symbol, timeframe)` history over
    /// `[since, until)`, both bounds optional.
    ///
    /// # Errors
    /// Warehouse failures and plugin failures during backfill; a request
    /// whose window is already fully cached cannot fail on the venue.
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch_ohlcv(
        &self,
        market: &str,
        provider: &str,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<i64>,
        until: Option<i64>,
        limit: usize,
        user_id: Option<&str>,
    ) -> Result<Vec<OhlcvBar>, ServiceError> {
        let key = SeriesKey::new(market, provider, symbol, timeframe);
        let step = timeframe.period_ms();
        let now = now_ms();

        let until_eff = until.unwrap_or(now).min(now);
        let since_eff =
            since.unwrap_or_else(|| until_eff.saturating_sub(step.saturating_mul(limit as i64)));
        if limit == 0 || since_eff >= until_eff {
            return Ok(Vec::new());
        }
        // Contiguity is judged against what the request can actually cover,
        // and never against the still-forming trailing bucket.
        let window_end = until_eff
            .min(since_eff.saturating_add(step.saturating_mul(limit as i64)))
            .min(timeframe.bucket_start(now));

        let stored = self
            .store
            .range(&key, Some(since_eff), Some(until_eff), limit)
            .await?;
        if window_end <= since_eff || is_satisfied(&stored, step, since_eff, window_end) {
            tracing::debug!(%key, bars = stored.len(), "history served from warehouse");
            return Ok(stored);
        }

        let gaps = find_gaps(&stored, step, since_eff, window_end);
        tracing::debug!(%key, gaps = gaps.len(), "backfilling history from plugin");
        let lease = self.pool.acquire(market, provider, user_id).await?;

        let native = lease
            .supported_timeframes()
            .is_none_or(|tfs| tfs.contains(&timeframe.to_string().as_str()));

        let mut series: Vec<Vec<OhlcvBar>> = vec![stored];
        for gap in gaps {
            let fetched = if native {
                self.backfill_gap(&key, &lease, timeframe, gap).await?
            } else {
                self.backfill_gap_resampled(&key, &lease, timeframe, gap, now)
                    .await?
            };
            series.push(fetched);
        }

        let mut merged: Vec<OhlcvBar> = merge_by_priority(series)
            .into_iter()
            .filter(|b| b.timestamp_ms >= since_eff && b.timestamp_ms < until_eff)
            .collect();
        merged.truncate(limit);
        Ok(merged)
    }

    /// Fill one gap with chunked plugin calls at the target cadence, writing
    /// every chunk back to the warehouse.
    async fn backfill_gap(
        &self,
        key: &SeriesKey,
        lease: &PluginLease,
        timeframe: Timeframe,
        gap: Gap,
    ) -> Result<Vec<OhlcvBar>, ServiceError> {
        let display_symbol = mercato_types::denormalize_symbol(&key.symbol);
        let mut collected = Vec::new();
        let mut cursor = gap.start_ms;
        for _ in 0..self.cfg.max_chunks_per_gap {
            let chunk = lease
                .fetch_historical_ohlcv(
                    &display_symbol,
                    timeframe,
                    Some(cursor),
                    Some(self.cfg.chunk_size),
                    Some(gap.end_ms),
                )
                .await?;
            if chunk.is_empty() {
                break;
            }
            self.store.upsert(key, &chunk).await?;
            let last = chunk.last().expect("non-empty chunk").timestamp_ms;
            let short = chunk.len() < self.cfg.chunk_size;
            collected.extend(chunk);
            cursor = last + 1;
            if short || cursor >= gap.end_ms {
                break;
            }
        }
        Ok(collected)
    }

    /// Fill one gap by fetching one-minute bars and aggregating them up to
    /// the target timeframe. Only fully closed buckets are kept or stored.
    async fn backfill_gap_resampled(
        &self,
        key: &SeriesKey,
        lease: &PluginLease,
        timeframe: Timeframe,
        gap: Gap,
        now: i64,
    ) -> Result<Vec<OhlcvBar>, ServiceError> {
        let display_symbol = mercato_types::denormalize_symbol(&key.symbol);
        let base = Timeframe::one_minute();
        let mut minutes = Vec::new();
        let mut cursor = gap.start_ms;
        for _ in 0..self.cfg.max_chunks_per_gap {
            let chunk = lease
                .fetch_historical_ohlcv(
                    &display_symbol,
                    base,
                    Some(cursor),
                    Some(self.cfg.chunk_size),
                    Some(gap.end_ms),
                )
                .await?;
            if chunk.is_empty() {
                break;
            }
            let last = chunk.last().expect("non-empty chunk").timestamp_ms;
            let short = chunk.len() < self.cfg.chunk_size;
            minutes.extend(chunk);
            cursor = last + 1;
            if short || cursor >= gap.end_ms {
                break;
            }
        }
        let resampled = resample_closed(minutes, timeframe, gap.end_ms.min(now));
        if !resampled.is_empty() {
            self.store.upsert(key, &resampled).await?;
        }
        Ok(resampled)
    }
}

/// Whether the stored bars already satisfy the request: contiguous over the
/// closed request window (which is already clamped to what `limit` can
/// cover).
fn is_satisfied(stored: &[OhlcvBar], step: i64, since_ms: i64, window_end_ms: i64) -> bool {
    mercato_core::is_contiguous(stored, step, since_ms, window_end_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64) -> OhlcvBar {
        OhlcvBar {
            timestamp_ms: ts,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
        }
    }

    const M: i64 = 60_000;

    #[test]
    fn full_window_is_satisfied() {
        let bars = [bar(0), bar(M), bar(2 * M)];
        assert!(is_satisfied(&bars, M, 0, 3 * M));
    }

    #[test]
    fn holes_are_not_satisfied() {
        let bars = [bar(0), bar(2 * M)];
        assert!(!is_satisfied(&bars, M, 0, 3 * M));
    }
}
