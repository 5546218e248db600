//! mercato-types
//!
//! Value types shared across the mercato ecosystem.
//!
//! - `stream`: stream kinds, view keys, bus channel naming, and the
//!   normalized bus message schema.
//! - `bars`: OHLCV bars.
//! - `market`: normalized market payloads (tickers, order books, orders).
//! - `timeframe`: the `<n><unit>` timeframe grammar.
//! - `capability`: the plugin feature flag set.
#![warn(missing_docs)]

/// OHLCV bars.
pub mod bars;
/// Plugin capability flags.
pub mod capability;
/// Normalized market payloads.
pub mod market;
/// Stream kinds, view keys, channel naming, and the bus message schema.
pub mod stream;
/// The `<n><unit>` timeframe grammar.
pub mod timeframe;

pub use bars::OhlcvBar;
pub use capability::Features;
pub use market::{
    Balance, InstrumentLimits, InstrumentTradingDetails, Order, OrderBook, Position, Precision,
    Ticker, Trade,
};
pub use stream::{
    StreamKind, StreamMessage, ViewKey, ViewKeyError, denormalize_symbol, normalize_ident,
    normalize_symbol,
};
pub use timeframe::{Timeframe, TimeframeError, TimeframeUnit};
