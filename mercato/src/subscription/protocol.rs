use serde::{Deserialize, Serialize};
use serde_json::Value;

use mercato_types::{OhlcvBar, Timeframe};

use super::outbox::{FrameClass, OutboundFrame};

/// A control message from the client, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Open a view.
    Subscribe {
        /// Market identifier, e.g. `crypto`.
        market: String,
        /// Provider identifier, e.g. `binance`.
        provider: String,
        /// Symbol in any display form, e.g. `BTC/USDT`.
        symbol: String,
        /// One of `ohlcv`, `trades`, `order_book`, `user_orders`.
        stream_type: String,
        /// Required iff `stream_type` is `ohlcv`.
        #[serde(default)]
        timeframe: Option<String>,
        /// Initial-history start bound, millisecond epoch.
        #[serde(default)]
        since: Option<i64>,
    },
    /// Close a view; parameters mirror the subscribe that opened it.
    Unsubscribe {
        /// Market identifier.
        market: String,
        /// Provider identifier.
        provider: String,
        /// Symbol in any display form.
        symbol: String,
        /// One of `ohlcv`, `trades`, `order_book`, `user_orders`.
        stream_type: String,
        /// Required iff `stream_type` is `ohlcv`.
        #[serde(default)]
        timeframe: Option<String>,
    },
    /// Heartbeat; ignored.
    Ping,
    /// Heartbeat reply; ignored.
    Pong,
}

/// `{"message": ...}` payload used by status and error envelopes.
#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    /// Short human-readable description.
    pub message: String,
}

/// Chart-shaped OHLCV payload: parallel `[t,o,h,l,c]` and `[t,v]` arrays.
#[derive(Debug, Clone, Serialize)]
pub struct ChartPayload {
    /// `[timestamp_ms, open, high, low, close]` rows.
    pub ohlc: Vec<(i64, f64, f64, f64, f64)>,
    /// `[timestamp_ms, volume]` rows.
    pub volume: Vec<(i64, f64)>,
    /// `true` only on the one-shot snapshot that opens a view.
    pub initial_batch: bool,
}

impl ChartPayload {
    /// Shape bars into the parallel chart arrays.
    #[must_use]
    pub fn from_bars(bars: &[OhlcvBar], initial_batch: bool) -> Self {
        Self {
            ohlc: bars
                .iter()
                .map(|b| (b.timestamp_ms, b.open, b.high, b.low, b.close))
                .collect(),
            volume: bars.iter().map(|b| (b.timestamp_ms, b.volume)).collect(),
            initial_batch,
        }
    }
}

/// A frame from the server, tagged by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// Informational acknowledgement.
    Status {
        /// Message payload.
        payload: StatusPayload,
    },
    /// A request failed; carries a short message, never internals.
    Error {
        /// Message payload.
        payload: StatusPayload,
    },
    /// Initial OHLCV snapshot for a view.
    Data {
        /// Symbol as subscribed.
        symbol: String,
        /// View timeframe.
        timeframe: Timeframe,
        /// Chart arrays with `initial_batch: true`.
        payload: ChartPayload,
    },
    /// Live OHLCV delta for a view.
    Update {
        /// Symbol as subscribed.
        symbol: String,
        /// View timeframe.
        timeframe: Timeframe,
        /// Chart arrays with `initial_batch: false`.
        payload: ChartPayload,
    },
    /// Live trade (or polled ticker) for a trades view.
    TradeUpdate {
        /// Symbol as subscribed.
        symbol: String,
        /// Venue-shaped payload.
        payload: Value,
    },
    /// Live order book snapshot for a book view.
    BookUpdate {
        /// Symbol as subscribed.
        symbol: String,
        /// `{bids, asks, timestamp_ms}`.
        payload: Value,
    },
    /// Event on the authenticated user's orders.
    UserOrderUpdate {
        /// Provider identifier.
        provider: String,
        /// Venue-shaped order payload.
        payload: Value,
    },
    /// Server heartbeat.
    Ping,
}

impl ServerEnvelope {
    /// Status envelope from a message.
    #[must_use]
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            payload: StatusPayload {
                message: message.into(),
            },
        }
    }

    /// Error envelope from a message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            payload: StatusPayload {
                message: message.into(),
            },
        }
    }

    /// Serialize into an outbound frame of the given class.
    #[must_use]
    pub fn into_frame(self, class: FrameClass) -> OutboundFrame {
        OutboundFrame {
            text: serde_json::to_string(&self).expect("envelopes serialize"),
            class,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_command_parses_the_wire_form() {
        let raw = r#"{"type":"subscribe","market":"crypto","provider":"binance",
            "symbol":"BTC/USDT","stream_type":"ohlcv","timeframe":"1m","since":1700000000000}"#;
        let cmd: ClientCommand = serde_json::from_str(raw).unwrap();
        match cmd {
            ClientCommand::Subscribe {
                market,
                stream_type,
                timeframe,
                since,
                ..
            } => {
                assert_eq!(market, "crypto");
                assert_eq!(stream_type, "ohlcv");
                assert_eq!(timeframe.as_deref(), Some("1m"));
                assert_eq!(since, Some(1_700_000_000_000));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn envelopes_serialize_with_snake_case_tags() {
        let env = ServerEnvelope::status("ok");
        let raw = serde_json::to_value(&env).unwrap();
        assert_eq!(raw["type"], "status");
        assert_eq!(raw["payload"]["message"], "ok");

        let ping = serde_json::to_value(ServerEnvelope::Ping).unwrap();
        assert_eq!(ping["type"], "ping");

        let update = ServerEnvelope::TradeUpdate {
            symbol: "BTC/USDT".into(),
            payload: serde_json::json!({"price": 1.0}),
        };
        assert_eq!(serde_json::to_value(&update).unwrap()["type"], "trade_update");
    }

    #[test]
    fn chart_payload_builds_parallel_arrays() {
        let bars = [OhlcvBar {
            timestamp_ms: 1_700_000_000_000,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 9.0,
        }];
        let payload = ChartPayload::from_bars(&bars, true);
        assert_eq!(payload.ohlc, vec![(1_700_000_000_000, 1.0, 2.0, 0.5, 1.5)]);
        assert_eq!(payload.volume, vec![(1_700_000_000_000, 9.0)]);
        assert!(payload.initial_batch);
    }
}
