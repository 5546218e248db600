//! Normalized market payloads exchanged with venue plugins.
//!
//! Venues report far richer objects than these; plugins map what they have
//! and leave the rest `None`. All timestamps are millisecond UTC epochs.

use serde::{Deserialize, Serialize};

/// A single public trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Venue trade id, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Execution time.
    pub timestamp_ms: i64,
    /// Symbol in display form, e.g. `BTC/USDT`.
    pub symbol: String,
    /// `buy` or `sell`, taker side.
    pub side: String,
    /// Execution price.
    pub price: f64,
    /// Base amount traded.
    pub amount: f64,
}

/// Latest ticker snapshot for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Ticker {
    /// Symbol in display form.
    pub symbol: String,
    /// Snapshot time, when the venue reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<i64>,
    /// Best bid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<f64>,
    /// Best ask.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<f64>,
    /// Last traded price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<f64>,
    /// Period high.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    /// Period low.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    /// Period base volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_volume: Option<f64>,
}

/// An order book snapshot. Levels are `(price, amount)` pairs; bids are
/// sorted best-first (descending), asks best-first (ascending).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    /// Symbol in display form.
    pub symbol: String,
    /// Snapshot time, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<i64>,
    /// Bid levels, best first.
    pub bids: Vec<(f64, f64)>,
    /// Ask levels, best first.
    pub asks: Vec<(f64, f64)>,
    /// Venue sequence number, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
}

/// A trading order as reported by the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Venue order id.
    pub id: String,
    /// Caller-supplied id, when supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
    /// Creation time.
    pub timestamp_ms: i64,
    /// Symbol in display form.
    pub symbol: String,
    /// `limit`, `market`, ...
    #[serde(rename = "type")]
    pub order_type: String,
    /// `buy` or `sell`.
    pub side: String,
    /// Limit price, absent for market orders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// Average fill price, when filled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
    /// Ordered base amount.
    pub amount: f64,
    /// Filled base amount.
    pub filled: f64,
    /// Remaining base amount.
    pub remaining: f64,
    /// `open`, `closed`, `canceled`, ...
    pub status: String,
}

/// Account balance for one asset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Balance {
    /// Amount available for trading.
    pub free: f64,
    /// Amount locked in orders.
    pub used: f64,
    /// `free + used`.
    pub total: f64,
}

/// An open derivative or margin position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Symbol in display form.
    pub symbol: String,
    /// `long` or `short`.
    pub side: String,
    /// Position size in base units.
    pub amount: f64,
    /// Average entry price, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<f64>,
    /// Mark-to-market PnL, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unrealized_pnl: Option<f64>,
}

/// Price/amount precision reported by the venue, in decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Precision {
    /// Decimal places for prices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<u32>,
    /// Decimal places for amounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u32>,
}

/// Order size limits reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct InstrumentLimits {
    /// Minimum base amount per order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<f64>,
    /// Maximum base amount per order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<f64>,
    /// Minimum notional per order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cost: Option<f64>,
}

/// Trading rules for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentTradingDetails {
    /// Symbol in display form.
    pub symbol: String,
    /// `spot`, `futures`, ...
    pub market_type: String,
    /// Base asset code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    /// Quote asset code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    /// Whether the instrument is currently tradable. `None` when the venue
    /// does not report a status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    /// Precision rules.
    #[serde(default)]
    pub precision: Precision,
    /// Size limits.
    #[serde(default)]
    pub limits: InstrumentLimits,
}
