use serde::{Deserialize, Serialize};

/// A single OHLCV bar.
///
/// `timestamp_ms` is a millisecond UTC epoch aligned to the bar's open.
/// A coherent bar satisfies `low <= min(open, close)`,
/// `max(open, close) <= high` and `volume >= 0`; series for a given
/// `(symbol, timeframe)` are strictly monotonic in `timestamp_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    /// Millisecond UTC epoch of the bar open.
    pub timestamp_ms: i64,
    /// Opening price.
    pub open: f64,
    /// Highest traded price in the bar.
    pub high: f64,
    /// Lowest traded price in the bar.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Traded base volume.
    pub volume: f64,
}

impl OhlcvBar {
    /// Whether the bar satisfies the OHLCV shape invariants.
    #[must_use]
    pub fn is_coherent(&self) -> bool {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        self.low <= body_low && body_high <= self.high && self.volume >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coherence_checks_wick_bounds() {
        let bar = OhlcvBar {
            timestamp_ms: 0,
            open: 10.0,
            high: 12.0,
            low: 9.0,
            close: 11.0,
            volume: 3.0,
        };
        assert!(bar.is_coherent());
        assert!(
            !OhlcvBar {
                high: 10.5,
                ..bar
            }
            .is_coherent()
        );
        assert!(
            !OhlcvBar {
                volume: -1.0,
                ..bar
            }
            .is_coherent()
        );
    }
}
