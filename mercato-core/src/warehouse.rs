use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use mercato_types::{OhlcvBar, Timeframe, normalize_ident, normalize_symbol};

/// Identity of one stored OHLCV series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    /// Market identifier, normalized.
    pub market: String,
    /// Provider identifier, normalized.
    pub provider: String,
    /// Symbol, normalized (`BTC_USDT`).
    pub symbol: String,
    /// Bar timeframe.
    pub timeframe: Timeframe,
}

impl SeriesKey {
    /// Build a key, normalizing every component.
    #[must_use]
    pub fn new(market: &str, provider: &str, symbol: &str, timeframe: Timeframe) -> Self {
        Self {
            market: normalize_ident(market),
            provider: normalize_ident(provider),
            symbol: normalize_symbol(symbol),
            timeframe,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.market, self.provider, self.symbol, self.timeframe
        )
    }
}

/// Error surfaced by warehouse operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store rejected the operation.
    #[error("warehouse failure: {0}")]
    Backend(String),
}

/// The external OHLCV warehouse: point lookups, ascending range scans, and
/// idempotent upserts keyed by `(market, provider, symbol, timeframe,
/// timestamp_ms)`.
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Bars with `since_ms <= timestamp_ms < before_ms`, ascending, at most
    /// `limit`. Either bound may be omitted.
    async fn range(
        &self,
        key: &SeriesKey,
        since_ms: Option<i64>,
        before_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<OhlcvBar>, StoreError>;

    /// Insert or overwrite bars; keyed by timestamp, so replays converge.
    async fn upsert(&self, key: &SeriesKey, bars: &[OhlcvBar]) -> Result<(), StoreError>;

    /// Whether any bar exists with `since_ms <= timestamp_ms < before_ms`.
    async fn has_any_in_range(
        &self,
        key: &SeriesKey,
        since_ms: i64,
        before_ms: i64,
    ) -> Result<bool, StoreError>;
}
