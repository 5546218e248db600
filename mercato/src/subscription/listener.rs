use serde_json::json;
use tokio::sync::oneshot;

use mercato_core::{BusSubscriber, StreamHandle};
use mercato_types::{StreamMessage, ViewKey};

use super::outbox::{FrameClass, Outbox};
use super::protocol::{ChartPayload, ServerEnvelope};

/// Spawn the per-view listener: reads the view's bus channel, filters
/// messages down to the ones this view asked for, and forwards formatted
/// envelopes to the client's outbox. Exits when stopped, when the bus
/// subscription ends, or when the outbox closes underneath it.
pub(crate) fn spawn_view_listener(
    mut subscription: Box<dyn BusSubscriber>,
    view: ViewKey,
    outbox: Outbox,
) -> StreamHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                received = subscription.next_message() => match received {
                    Ok(Some(payload)) => {
                        let message = match serde_json::from_slice::<StreamMessage>(&payload) {
                            Ok(message) => message,
                            Err(err) => {
                                tracing::warn!(%view, error = %err, "undecodable bus message");
                                continue;
                            }
                        };
                        let Some(envelope) = format_for_view(&view, message) else {
                            continue;
                        };
                        if !outbox.enqueue(envelope.into_frame(FrameClass::Update(view.clone()))) {
                            tracing::debug!(%view, "outbox closed; listener exiting");
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!(%view, "bus channel closed; listener exiting");
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(%view, error = %err, "bus receive failed; listener exiting");
                        break;
                    }
                }
            }
        }
    });
    StreamHandle::new(join, stop_tx)
}

/// Filter and format one bus message for one view. Pure: returns `None`
/// when the message is not addressed to the view (a shared channel can
/// carry messages only some subscribers want).
pub(crate) fn format_for_view(view: &ViewKey, message: StreamMessage) -> Option<ServerEnvelope> {
    if message.kind() != view.kind() {
        return None;
    }
    match message {
        StreamMessage::Ohlcv {
            symbol,
            timeframe,
            bar,
            ..
        } => {
            if symbol != view.display_symbol() || Some(timeframe) != view.timeframe() {
                return None;
            }
            Some(ServerEnvelope::Update {
                symbol,
                timeframe,
                payload: ChartPayload::from_bars(&[bar], false),
            })
        }
        StreamMessage::Trades {
            symbol, payload, ..
        } => {
            if symbol != view.display_symbol() {
                return None;
            }
            Some(ServerEnvelope::TradeUpdate { symbol, payload })
        }
        StreamMessage::OrderBook {
            symbol,
            bids,
            asks,
            timestamp_ms,
            ..
        } => {
            if symbol != view.display_symbol() {
                return None;
            }
            Some(ServerEnvelope::BookUpdate {
                symbol,
                payload: json!({
                    "bids": bids,
                    "asks": asks,
                    "timestamp_ms": timestamp_ms,
                }),
            })
        }
        StreamMessage::UserOrders {
            provider, payload, ..
        } => Some(ServerEnvelope::UserOrderUpdate { provider, payload }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mercato_types::{OhlcvBar, StreamKind};

    fn bar(ts: i64) -> OhlcvBar {
        OhlcvBar {
            timestamp_ms: ts,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 3.0,
        }
    }

    fn ohlcv_view(symbol: &str, tf: &str) -> ViewKey {
        ViewKey::new("crypto", "binance", symbol, StreamKind::Ohlcv, Some(tf), None).unwrap()
    }

    fn ohlcv_msg(symbol: &str, tf: &str) -> StreamMessage {
        StreamMessage::Ohlcv {
            provider: "binance".into(),
            symbol: symbol.into(),
            timeframe: tf.parse().unwrap(),
            bar: bar(1_700_000_000_000),
        }
    }

    #[test]
    fn matching_ohlcv_message_becomes_an_update() {
        let view = ohlcv_view("BTC/USDT", "1m");
        let envelope = format_for_view(&view, ohlcv_msg("BTC/USDT", "1m")).unwrap();
        match envelope {
            ServerEnvelope::Update {
                symbol, payload, ..
            } => {
                assert_eq!(symbol, "BTC/USDT");
                assert!(!payload.initial_batch);
                assert_eq!(payload.ohlc.len(), 1);
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn wrong_symbol_or_timeframe_is_dropped() {
        let view = ohlcv_view("BTC/USDT", "1m");
        assert!(format_for_view(&view, ohlcv_msg("ETH/USDT", "1m")).is_none());
        assert!(format_for_view(&view, ohlcv_msg("BTC/USDT", "5m")).is_none());
    }

    #[test]
    fn kind_mismatch_is_dropped() {
        let view = ohlcv_view("BTC/USDT", "1m");
        let trade = StreamMessage::Trades {
            provider: "binance".into(),
            symbol: "BTC/USDT".into(),
            payload: json!({"price": 1.0}),
        };
        assert!(format_for_view(&view, trade).is_none());

        let trades_view =
            ViewKey::new("crypto", "binance", "ETH/USDT", StreamKind::Trades, None, None).unwrap();
        assert!(format_for_view(&trades_view, ohlcv_msg("ETH/USDT", "1m")).is_none());
    }
}
