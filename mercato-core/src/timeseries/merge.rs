use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use mercato_types::OhlcvBar;

/// Merge bar series in priority order (first series wins on duplicate
/// timestamps). Output is ascending and free of duplicate timestamps, which
/// keeps merged series strictly monotonic.
#[must_use]
pub fn merge_by_priority<I>(series: I) -> Vec<OhlcvBar>
where
    I: IntoIterator<Item = Vec<OhlcvBar>>,
{
    let mut map: BTreeMap<i64, OhlcvBar> = BTreeMap::new();
    for s in series {
        for bar in s {
            if let Entry::Vacant(slot) = map.entry(bar.timestamp_ms) {
                slot.insert(bar);
            }
        }
    }
    map.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(ts: i64, price: f64) -> OhlcvBar {
        OhlcvBar {
            timestamp_ms: ts,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }

    #[test]
    fn first_series_wins_on_conflict() {
        let merged = merge_by_priority(vec![
            vec![flat(0, 1.0), flat(60, 1.0)],
            vec![flat(60, 9.0), flat(120, 2.0)],
        ]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1].close, 1.0);
        assert_eq!(merged[2].timestamp_ms, 120);
    }

    #[test]
    fn output_is_sorted_regardless_of_input_order() {
        let merged = merge_by_priority(vec![vec![flat(120, 2.0), flat(0, 1.0)]]);
        let ts: Vec<i64> = merged.iter().map(|b| b.timestamp_ms).collect();
        assert_eq!(ts, vec![0, 120]);
    }
}
