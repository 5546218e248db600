use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::oneshot;

use mercato_core::{MessageBus, PluginError, StreamHandle, content_digest, jittered_around_ms};
use mercato_types::{StreamMessage, Timeframe, ViewKey};

use crate::pool::PluginLease;

use super::{Records, remove_generation};

/// Jitter applied to every poll wait, percent of the base interval.
const POLL_JITTER_PERCENT: u32 = 10;

/// Which REST operation backs the polling loop.
pub(crate) enum PollSource {
    Ohlcv(Timeframe),
    Ticker,
    OrderBook,
    OpenOrders,
}

pub(crate) struct PollingContext {
    pub bus: Arc<dyn MessageBus>,
    pub lease: PluginLease,
    pub view: ViewKey,
    pub source: PollSource,
    pub interval: Duration,
    pub records: Records,
    pub generation: u64,
}

/// Spawn the polling loop for one feed record.
pub(crate) fn spawn_polling(ctx: PollingContext) -> StreamHandle {
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let join = tokio::spawn(run(ctx, stop_rx));
    StreamHandle::new(join, stop_tx)
}

fn jittered(interval: Duration) -> Duration {
    Duration::from_millis(jittered_around_ms(
        u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        POLL_JITTER_PERCENT,
    ))
}

async fn run(ctx: PollingContext, mut stop_rx: oneshot::Receiver<()>) {
    let channel = ctx.view.channel();
    let interval_ms = u64::try_from(ctx.interval.as_millis()).unwrap_or(u64::MAX);
    tracing::info!(view = %ctx.view, interval_ms, "polling loop started");

    let mut last_digest: Option<String> = None;
    let mut next_wait = jittered(ctx.interval);
    let mut terminal = false;

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            () = tokio::time::sleep(next_wait) => {}
        }
        next_wait = jittered(ctx.interval);

        let fetched = tokio::select! {
            _ = &mut stop_rx => break,
            fetched = poll_once(&ctx) => fetched,
        };

        match fetched {
            Ok(Some(message)) => {
                let Ok(value) = serde_json::to_value(&message) else {
                    tracing::error!(view = %ctx.view, "unserializable poll result");
                    continue;
                };
                let digest = content_digest(&value);
                if last_digest.as_deref() == Some(digest.as_str()) {
                    tracing::trace!(view = %ctx.view, "poll result unchanged; skipping publish");
                    continue;
                }
                last_digest = Some(digest);
                if let Err(err) = ctx.bus.publish(&channel, value.to_string().as_bytes()).await {
                    tracing::warn!(view = %ctx.view, error = %err, "bus publish failed");
                }
            }
            Ok(None) => {}
            Err(err) if err.is_unsupported() => {
                // The venue says this operation does not exist; the stream
                // is terminally unavailable.
                tracing::error!(view = %ctx.view, error = %err, "polling unsupported; stopping feed");
                terminal = true;
                break;
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(view = %ctx.view, error = %err, "transient poll failure");
                next_wait = ctx.interval * 2;
            }
            Err(err) => {
                tracing::warn!(view = %ctx.view, error = %err, "poll failed");
                next_wait = ctx.interval * 5;
            }
        }
    }

    if terminal {
        remove_generation(&ctx.records, &ctx.view, ctx.generation);
    }
    tracing::info!(view = %ctx.view, "polling loop finished");
}

async fn poll_once(ctx: &PollingContext) -> Result<Option<StreamMessage>, PluginError> {
    let provider_id = ctx.view.provider().to_string();
    let symbol = ctx.view.display_symbol();
    match &ctx.source {
        PollSource::Ohlcv(timeframe) => {
            let bar = ctx.lease.fetch_latest_ohlcv(&symbol, *timeframe).await?;
            Ok(bar.map(|bar| StreamMessage::Ohlcv {
                provider: provider_id,
                symbol,
                timeframe: *timeframe,
                bar,
            }))
        }
        PollSource::Ticker => {
            let tap = ctx
                .lease
                .as_ticker_provider()
                .ok_or_else(|| PluginError::unsupported(provider_id.clone(), "fetch_ticker"))?;
            let ticker = tap.fetch_ticker(&symbol).await?;
            Ok(Some(StreamMessage::Trades {
                provider: provider_id,
                symbol,
                payload: serde_json::to_value(ticker).unwrap_or_default(),
            }))
        }
        PollSource::OrderBook => {
            let books = ctx.lease.as_order_book_provider().ok_or_else(|| {
                PluginError::unsupported(provider_id.clone(), "fetch_order_book")
            })?;
            let book = books.fetch_order_book(&symbol, Some(20)).await?;
            Ok(Some(StreamMessage::OrderBook {
                provider: provider_id,
                symbol,
                bids: book.bids,
                asks: book.asks,
                timestamp_ms: book.timestamp_ms,
            }))
        }
        PollSource::OpenOrders => {
            let orders = ctx.lease.as_open_orders_provider().ok_or_else(|| {
                PluginError::unsupported(provider_id.clone(), "fetch_open_orders")
            })?;
            let open = orders.fetch_open_orders(None).await?;
            // Snapshot stream: consumers diff successive snapshots.
            Ok(Some(StreamMessage::UserOrders {
                provider: provider_id,
                symbol: ctx.view.main_id(),
                payload: json!({ "type": "snapshot", "items": open }),
            }))
        }
    }
}
