//! Time-series utilities: OHLCV resampling, priority merges, and grid gap
//! detection used by the historical fetch path.

pub mod gaps;
pub mod merge;
pub mod resample;

pub use gaps::{Gap, find_gaps, is_contiguous};
pub use merge::merge_by_priority;
pub use resample::{resample, resample_closed};
