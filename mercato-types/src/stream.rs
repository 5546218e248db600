use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bars::OhlcvBar;
use crate::timeframe::{Timeframe, TimeframeError};

/// The kinds of real-time feed a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Live OHLCV bar updates.
    Ohlcv,
    /// Public trades (or ticker snapshots when polled).
    Trades,
    /// Level-2 order book snapshots.
    OrderBook,
    /// The authenticated user's own order events.
    UserOrders,
}

impl StreamKind {
    /// Stable wire identifier, also used in bus channel names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ohlcv => "ohlcv",
            Self::Trades => "trades",
            Self::OrderBook => "order_book",
            Self::UserOrders => "user_orders",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = ViewKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ohlcv" => Ok(Self::Ohlcv),
            "trades" => Ok(Self::Trades),
            "order_book" => Ok(Self::OrderBook),
            "user_orders" => Ok(Self::UserOrders),
            other => Err(ViewKeyError::UnknownKind(other.to_string())),
        }
    }
}

/// Normalize a symbol for use inside keys and channel names: uppercase,
/// with `/` and `-` folded to `_`.
#[must_use]
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_uppercase().replace(['/', '-'], "_")
}

/// Undo [`normalize_symbol`] for display and venue calls: `_` becomes `/`.
#[must_use]
pub fn denormalize_symbol(normalized: &str) -> String {
    normalized.replace('_', "/")
}

/// Normalize a market or provider identifier: lowercase, trimmed.
#[must_use]
pub fn normalize_ident(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Error produced when building a [`ViewKey`] from client input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ViewKeyError {
    /// The stream kind string is not recognized.
    #[error("unknown stream type: {0:?}")]
    UnknownKind(String),
    /// A timeframe is required for OHLCV views.
    #[error("timeframe is required for ohlcv subscriptions")]
    MissingTimeframe,
    /// The timeframe string failed to parse.
    #[error(transparent)]
    Timeframe(#[from] TimeframeError),
    /// Only OHLCV views carry a timeframe discriminator.
    #[error("timeframe is only valid for ohlcv subscriptions")]
    UnexpectedTimeframe,
    /// A user context is required for user-order views.
    #[error("user context is required for user_orders subscriptions")]
    MissingUserContext,
    /// Only user-order views carry a user context.
    #[error("user context is only valid for user_orders subscriptions")]
    UnexpectedUserContext,
    /// A required field was empty after normalization.
    #[error("empty field in subscription key: {0}")]
    EmptyField(&'static str),
}

/// The identity of one client-facing subscription view.
///
/// All fields are normalized at construction (market/provider lowercase,
/// symbol per [`normalize_symbol`], timeframe in canonical form). Equality is
/// structural; the key doubles as the streaming manager's feed key and
/// determines the bus channel via [`ViewKey::channel`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewKey {
    market: String,
    provider: String,
    symbol: String,
    kind: StreamKind,
    discriminator: Option<Timeframe>,
    user_ctx: Option<String>,
}

impl ViewKey {
    /// Build a key from raw client input, validating the kind-specific
    /// invariants: OHLCV requires a timeframe, user-order views require a
    /// user context, and neither is accepted anywhere else.
    ///
    /// # Errors
    /// Returns a [`ViewKeyError`] describing the first violated rule.
    pub fn new(
        market: &str,
        provider: &str,
        symbol: &str,
        kind: StreamKind,
        timeframe: Option<&str>,
        user_ctx: Option<&str>,
    ) -> Result<Self, ViewKeyError> {
        let market = normalize_ident(market);
        let provider = normalize_ident(provider);
        let symbol = normalize_symbol(symbol);
        if market.is_empty() {
            return Err(ViewKeyError::EmptyField("market"));
        }
        if provider.is_empty() {
            return Err(ViewKeyError::EmptyField("provider"));
        }
        if symbol.is_empty() {
            return Err(ViewKeyError::EmptyField("symbol"));
        }

        let discriminator = match (kind, timeframe) {
            (StreamKind::Ohlcv, Some(tf)) => Some(tf.trim().parse::<Timeframe>()?),
            (StreamKind::Ohlcv, None) => return Err(ViewKeyError::MissingTimeframe),
            (_, None) => None,
            (_, Some(_)) => return Err(ViewKeyError::UnexpectedTimeframe),
        };
        let user_ctx = match (kind, user_ctx.map(str::trim)) {
            (StreamKind::UserOrders, Some(ctx)) if !ctx.is_empty() => Some(ctx.to_string()),
            (StreamKind::UserOrders, _) => return Err(ViewKeyError::MissingUserContext),
            (_, None) => None,
            (_, Some(ctx)) if ctx.is_empty() => None,
            (_, Some(_)) => return Err(ViewKeyError::UnexpectedUserContext),
        };

        Ok(Self {
            market,
            provider,
            symbol,
            kind,
            discriminator,
            user_ctx,
        })
    }

    /// Market identifier, normalized.
    #[must_use]
    pub fn market(&self) -> &str {
        &self.market
    }

    /// Provider identifier, normalized.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Symbol, normalized (`BTC_USDT`).
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Symbol in display form (`BTC/USDT`).
    #[must_use]
    pub fn display_symbol(&self) -> String {
        denormalize_symbol(&self.symbol)
    }

    /// Stream kind.
    #[must_use]
    pub const fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Timeframe discriminator; present iff the kind is OHLCV.
    #[must_use]
    pub const fn timeframe(&self) -> Option<Timeframe> {
        self.discriminator
    }

    /// User context; present iff the kind is user orders.
    #[must_use]
    pub fn user_ctx(&self) -> Option<&str> {
        self.user_ctx.as_deref()
    }

    /// The main identifier used in channel names: the normalized symbol, or
    /// `user_<ctx>` for user-order views.
    #[must_use]
    pub fn main_id(&self) -> String {
        match (&self.user_ctx, self.kind) {
            (Some(ctx), StreamKind::UserOrders) => format!("user_{ctx}"),
            _ => self.symbol.clone(),
        }
    }

    /// The bus channel this view's feed publishes on:
    /// `stream:<kind>:<provider>:<main_id>[:<timeframe>]`.
    #[must_use]
    pub fn channel(&self) -> String {
        let mut name = format!(
            "stream:{}:{}:{}",
            self.kind.as_str(),
            self.provider,
            self.main_id()
        );
        if let Some(tf) = self.discriminator {
            name.push(':');
            name.push_str(&tf.to_string());
        }
        name
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.market, self.provider, self.symbol, self.kind
        )?;
        if let Some(tf) = self.discriminator {
            write!(f, ":{tf}")?;
        }
        if let Some(ctx) = &self.user_ctx {
            write!(f, ":user_{ctx}")?;
        }
        Ok(())
    }
}

/// A normalized feed update as published on the bus.
///
/// Every message carries its stream kind (the serde tag), the provider and
/// the display-form symbol, so listeners on a shared channel can filter with
/// pure functions. Venue-shaped payloads (trades, user orders) are carried
/// as raw JSON; OHLCV bars and order books have fixed schemas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stream_type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// One live OHLCV bar.
    Ohlcv {
        /// Provider identifier.
        provider: String,
        /// Symbol in display form.
        symbol: String,
        /// Bar timeframe.
        timeframe: Timeframe,
        /// The bar itself, flattened into the message object.
        #[serde(flatten)]
        bar: OhlcvBar,
    },
    /// A trade event or polled ticker snapshot.
    Trades {
        /// Provider identifier.
        provider: String,
        /// Symbol in display form.
        symbol: String,
        /// Venue-shaped trade or ticker payload.
        payload: serde_json::Value,
    },
    /// An order book snapshot.
    OrderBook {
        /// Provider identifier.
        provider: String,
        /// Symbol in display form.
        symbol: String,
        /// Bid levels, best first.
        bids: Vec<(f64, f64)>,
        /// Ask levels, best first.
        asks: Vec<(f64, f64)>,
        /// Snapshot time, when reported.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp_ms: Option<i64>,
    },
    /// A user-order event or polled open-orders snapshot.
    UserOrders {
        /// Provider identifier.
        provider: String,
        /// Symbol in display form, or the user main id for snapshots.
        symbol: String,
        /// Venue-shaped order payload.
        payload: serde_json::Value,
    },
}

impl StreamMessage {
    /// The stream kind of this message.
    #[must_use]
    pub const fn kind(&self) -> StreamKind {
        match self {
            Self::Ohlcv { .. } => StreamKind::Ohlcv,
            Self::Trades { .. } => StreamKind::Trades,
            Self::OrderBook { .. } => StreamKind::OrderBook,
            Self::UserOrders { .. } => StreamKind::UserOrders,
        }
    }

    /// The provider identifier carried by the message.
    #[must_use]
    pub fn provider(&self) -> &str {
        match self {
            Self::Ohlcv { provider, .. }
            | Self::Trades { provider, .. }
            | Self::OrderBook { provider, .. }
            | Self::UserOrders { provider, .. } => provider,
        }
    }

    /// The symbol carried by the message, in display form.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Ohlcv { symbol, .. }
            | Self::Trades { symbol, .. }
            | Self::OrderBook { symbol, .. }
            | Self::UserOrders { symbol, .. } => symbol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_fold_separators() {
        assert_eq!(normalize_symbol(" btc/usdt "), "BTC_USDT");
        assert_eq!(normalize_symbol("BTC-USD"), "BTC_USD");
        assert_eq!(denormalize_symbol("BTC_USDT"), "BTC/USDT");
    }

    #[test]
    fn ohlcv_key_requires_timeframe() {
        let err = ViewKey::new("crypto", "binance", "BTC/USDT", StreamKind::Ohlcv, None, None)
            .unwrap_err();
        assert_eq!(err, ViewKeyError::MissingTimeframe);
    }

    #[test]
    fn user_orders_key_requires_context() {
        let err = ViewKey::new(
            "crypto",
            "binance",
            "BTC/USDT",
            StreamKind::UserOrders,
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err, ViewKeyError::MissingUserContext);
    }

    #[test]
    fn channel_names_are_deterministic() {
        let ohlcv = ViewKey::new(
            "Crypto",
            "Binance",
            "btc/usdt",
            StreamKind::Ohlcv,
            Some("1m"),
            None,
        )
        .unwrap();
        assert_eq!(ohlcv.channel(), "stream:ohlcv:binance:BTC_USDT:1m");

        let orders = ViewKey::new(
            "crypto",
            "binance",
            "BTC/USDT",
            StreamKind::UserOrders,
            None,
            Some("42"),
        )
        .unwrap();
        assert_eq!(orders.channel(), "stream:user_orders:binance:user_42");
    }

    #[test]
    fn structurally_equal_keys_compare_equal() {
        let a = ViewKey::new(
            "crypto",
            "binance",
            "BTC/USDT",
            StreamKind::Ohlcv,
            Some("1m"),
            None,
        )
        .unwrap();
        let b = ViewKey::new(
            "CRYPTO ",
            " binance",
            "btc-usdt",
            StreamKind::Ohlcv,
            Some("1m"),
            None,
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn stream_message_round_trips_with_tag() {
        let msg = StreamMessage::Ohlcv {
            provider: "binance".into(),
            symbol: "BTC/USDT".into(),
            timeframe: "1m".parse().unwrap(),
            bar: OhlcvBar {
                timestamp_ms: 1_700_000_000_000,
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5,
                volume: 10.0,
            },
        };
        let raw = serde_json::to_value(&msg).unwrap();
        assert_eq!(raw["stream_type"], "ohlcv");
        assert_eq!(raw["timestamp_ms"], 1_700_000_000_000_i64);
        let back: StreamMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(back, msg);
    }
}
