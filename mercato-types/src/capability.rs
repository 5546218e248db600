use bitflags::bitflags;

use crate::stream::StreamKind;

bitflags! {
    /// Optional capabilities a plugin instance may expose.
    ///
    /// Mandatory operations (symbols, historical OHLCV, latest OHLCV, close)
    /// are not flagged; everything else must be gated on this set before the
    /// corresponding accessor is used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Features: u32 {
        /// Native OHLCV bar stream.
        const STREAM_OHLCV       = 1 << 0;
        /// Native trade stream.
        const STREAM_TRADES      = 1 << 1;
        /// Native order book stream.
        const STREAM_ORDER_BOOK  = 1 << 2;
        /// Native authenticated user-order stream.
        const STREAM_USER_ORDERS = 1 << 3;
        /// REST ticker snapshot.
        const FETCH_TICKER       = 1 << 4;
        /// REST order book snapshot.
        const FETCH_ORDER_BOOK   = 1 << 5;
        /// REST open-orders listing (authenticated).
        const FETCH_OPEN_ORDERS  = 1 << 6;
        /// Order placement, cancellation, balances and positions.
        const TRADING            = 1 << 7;
        /// Instrument trading details (precision, limits, active flag).
        const INSTRUMENT_DETAILS = 1 << 8;
    }
}

impl Features {
    /// The native-stream flag matching a stream kind.
    #[must_use]
    pub const fn native_for(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Ohlcv => Self::STREAM_OHLCV,
            StreamKind::Trades => Self::STREAM_TRADES,
            StreamKind::OrderBook => Self::STREAM_ORDER_BOOK,
            StreamKind::UserOrders => Self::STREAM_USER_ORDERS,
        }
    }

    /// The REST-polling flag matching a stream kind. OHLCV polling rides on
    /// the mandatory `fetch_latest_ohlcv`, so it is always available.
    #[must_use]
    pub const fn polling_for(kind: StreamKind) -> Option<Self> {
        match kind {
            StreamKind::Ohlcv => None,
            StreamKind::Trades => Some(Self::FETCH_TICKER),
            StreamKind::OrderBook => Some(Self::FETCH_ORDER_BOOK),
            StreamKind::UserOrders => Some(Self::FETCH_OPEN_ORDERS),
        }
    }

    /// Whether the set allows a native stream of `kind`.
    #[must_use]
    pub fn can_stream(self, kind: StreamKind) -> bool {
        self.contains(Self::native_for(kind))
    }

    /// Whether the set allows polling fallback for `kind`.
    #[must_use]
    pub fn can_poll(self, kind: StreamKind) -> bool {
        match Self::polling_for(kind) {
            None => true,
            Some(flag) => self.contains(flag),
        }
    }
}
