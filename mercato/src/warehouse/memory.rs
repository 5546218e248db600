use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use mercato_core::{CandleStore, SeriesKey, StoreError};
use mercato_types::OhlcvBar;

/// In-process warehouse over per-series ordered maps. Single-node and test
/// deployments; everything is lost on restart.
#[derive(Default)]
pub struct MemoryCandleStore {
    series: RwLock<HashMap<SeriesKey, BTreeMap<i64, OhlcvBar>>>,
}

impl MemoryCandleStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bars held across all series.
    pub async fn total_bars(&self) -> usize {
        self.series.read().await.values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
impl CandleStore for MemoryCandleStore {
    async fn range(
        &self,
        key: &SeriesKey,
        since_ms: Option<i64>,
        before_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<OhlcvBar>, StoreError> {
        let series = self.series.read().await;
        let Some(bars) = series.get(key) else {
            return Ok(Vec::new());
        };
        let lower = since_ms.unwrap_or(i64::MIN);
        let upper = before_ms.unwrap_or(i64::MAX);
        Ok(bars
            .range(lower..upper)
            .map(|(_, bar)| *bar)
            .take(limit)
            .collect())
    }

    async fn upsert(&self, key: &SeriesKey, bars: &[OhlcvBar]) -> Result<(), StoreError> {
        if bars.is_empty() {
            return Ok(());
        }
        let mut series = self.series.write().await;
        let slot = series.entry(key.clone()).or_default();
        for bar in bars {
            slot.insert(bar.timestamp_ms, *bar);
        }
        Ok(())
    }

    async fn has_any_in_range(
        &self,
        key: &SeriesKey,
        since_ms: i64,
        before_ms: i64,
    ) -> Result<bool, StoreError> {
        let series = self.series.read().await;
        Ok(series
            .get(key)
            .is_some_and(|bars| bars.range(since_ms..before_ms).next().is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, close: f64) -> OhlcvBar {
        OhlcvBar {
            timestamp_ms: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    fn key() -> SeriesKey {
        SeriesKey::new("crypto", "binance", "BTC/USDT", "1m".parse().unwrap())
    }

    #[tokio::test]
    async fn upsert_overwrites_by_timestamp() {
        let store = MemoryCandleStore::new();
        store.upsert(&key(), &[bar(0, 1.0), bar(60_000, 2.0)]).await.unwrap();
        store.upsert(&key(), &[bar(0, 9.0)]).await.unwrap();
        let bars = store.range(&key(), None, None, 10).await.unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 9.0);
    }

    #[tokio::test]
    async fn range_respects_bounds_and_limit() {
        let store = MemoryCandleStore::new();
        let bars: Vec<OhlcvBar> = (0..5).map(|i| bar(i * 60_000, i as f64)).collect();
        store.upsert(&key(), &bars).await.unwrap();
        let got = store
            .range(&key(), Some(60_000), Some(240_000), 2)
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].timestamp_ms, 60_000);
        assert_eq!(got[1].timestamp_ms, 120_000);
        assert!(store.has_any_in_range(&key(), 0, 60_001).await.unwrap());
        assert!(!store.has_any_in_range(&key(), 300_000, 400_000).await.unwrap());
    }
}
