use mercato_types::OhlcvBar;

/// A half-open `[start_ms, end_ms)` range missing from a stored series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    /// First missing grid timestamp.
    pub start_ms: i64,
    /// Exclusive end of the hole.
    pub end_ms: i64,
}

/// Find holes in `bars` on the `step_ms` grid over `[since_ms, before_ms)`.
///
/// `bars` must be ascending and aligned to bucket opens. The expected grid
/// starts at the first aligned timestamp `>= since_ms`; any grid point
/// without a bar contributes to a gap, and adjacent missing points coalesce.
#[must_use]
pub fn find_gaps(bars: &[OhlcvBar], step_ms: i64, since_ms: i64, before_ms: i64) -> Vec<Gap> {
    assert!(step_ms > 0, "grid step must be positive");
    let first = since_ms.div_euclid(step_ms) * step_ms;
    let grid_start = if first < since_ms { first + step_ms } else { first };
    if grid_start >= before_ms {
        return Vec::new();
    }

    let mut gaps = Vec::new();
    let mut expected = grid_start;
    for bar in bars {
        if bar.timestamp_ms < expected {
            continue;
        }
        if bar.timestamp_ms >= before_ms {
            break;
        }
        if bar.timestamp_ms > expected {
            // Snap the observed timestamp down to the grid; off-grid bars
            // still close the hole up to their bucket.
            let hole_end = bar.timestamp_ms.div_euclid(step_ms) * step_ms;
            if hole_end > expected {
                gaps.push(Gap {
                    start_ms: expected,
                    end_ms: hole_end,
                });
            }
        }
        expected = bar.timestamp_ms.div_euclid(step_ms) * step_ms + step_ms;
    }
    if expected < before_ms {
        gaps.push(Gap {
            start_ms: expected,
            end_ms: before_ms,
        });
    }
    gaps
}

/// Whether `bars` fully cover the `step_ms` grid over `[since_ms, before_ms)`.
#[must_use]
pub fn is_contiguous(bars: &[OhlcvBar], step_ms: i64, since_ms: i64, before_ms: i64) -> bool {
    find_gaps(bars, step_ms, since_ms, before_ms).is_empty()
}
