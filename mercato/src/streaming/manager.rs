use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, watch};

use mercato_core::{MessageBus, PluginError, StreamHandle};
use mercato_types::{StreamKind, StreamMessage, ViewKey};

use crate::config::PollingConfig;
use crate::error::ServiceError;
use crate::pool::{PluginLease, PluginPool};

use super::polling::{PollSource, PollingContext, spawn_polling};
use super::{ActivationResult, FeedMode, RecordState, Records, StreamRecord};

/// Observable driving mode of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    /// Native venue stream behind a pump task.
    Native,
    /// REST polling loop.
    Polling,
    /// First subscriber still activating.
    Activating,
}

/// Owns every upstream feed in the process.
///
/// A feed starts when its first interested view arrives and stops when the
/// last one releases it. Native venue streams are preferred; when the venue
/// has none for the requested kind, a polling loop over the matching REST
/// operation stands in. Either way the feed publishes normalized
/// [`StreamMessage`]s on the view's bus channel.
///
/// The records lock guards only map mutations. Activation I/O runs outside
/// it: the first caller inserts an `Activating` record and later callers for
/// the same key wait on its completion channel, so a feed is never started
/// twice.
pub struct StreamingManager {
    bus: Arc<dyn MessageBus>,
    pool: Arc<PluginPool>,
    polling: PollingConfig,
    records: Records,
    generations: AtomicU64,
}

enum Plan {
    AlreadyActive,
    Wait(watch::Receiver<ActivationResult>),
    Activate(watch::Sender<ActivationResult>, u64),
}

impl StreamingManager {
    /// Create a manager publishing on `bus` and acquiring plugins from
    /// `pool`.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, pool: Arc<PluginPool>, polling: PollingConfig) -> Self {
        Self {
            bus,
            pool,
            polling,
            records: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(1),
        }
    }

    /// Ensure the feed behind `view` is running, starting it if this is the
    /// first interested subscriber. Each successful call takes one reference
    /// that must be paired with [`release`](Self::release).
    ///
    /// # Errors
    /// Activation failures: no capable plugin, venue errors, or no fallback.
    /// The reference taken by this call is undone before returning.
    pub async fn ensure_active(
        &self,
        view: &ViewKey,
        user_id: Option<&str>,
    ) -> Result<(), ServiceError> {
        loop {
            let plan = {
                let mut records = self.records.lock().expect("records lock poisoned");
                match records.get_mut(view) {
                    Some(record) => {
                        record.refcount += 1;
                        match &record.state {
                            RecordState::Ready(_) => Plan::AlreadyActive,
                            RecordState::Activating(rx) => Plan::Wait(rx.clone()),
                        }
                    }
                    None => {
                        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                        let (tx, rx) = watch::channel(None);
                        records.insert(
                            view.clone(),
                            StreamRecord {
                                refcount: 1,
                                generation,
                                state: RecordState::Activating(rx),
                            },
                        );
                        Plan::Activate(tx, generation)
                    }
                }
            };

            match plan {
                Plan::AlreadyActive => {
                    tracing::debug!(%view, "feed already active; reference added");
                    return Ok(());
                }
                Plan::Wait(rx) => match self.await_activation(view, rx).await {
                    Some(result) => return result,
                    // The record vanished between activation and our check
                    // (last holder released); start over.
                    None => continue,
                },
                Plan::Activate(tx, generation) => {
                    return self.run_activation(view, user_id, tx, generation).await;
                }
            }
        }
    }

    async fn await_activation(
        &self,
        view: &ViewKey,
        mut rx: watch::Receiver<ActivationResult>,
    ) -> Option<Result<(), ServiceError>> {
        let outcome = loop {
            let current = rx.borrow().clone();
            if let Some(result) = current {
                break result;
            }
            if rx.changed().await.is_err() {
                break Err("stream activation aborted".to_string());
            }
        };
        match outcome {
            Ok(()) => {
                let records = self.records.lock().expect("records lock poisoned");
                match records.get(view) {
                    Some(record) if matches!(record.state, RecordState::Ready(_)) => {
                        Some(Ok(()))
                    }
                    _ => None,
                }
            }
            Err(message) => Some(Err(ServiceError::Internal(message))),
        }
    }

    async fn run_activation(
        &self,
        view: &ViewKey,
        user_id: Option<&str>,
        tx: watch::Sender<ActivationResult>,
        generation: u64,
    ) -> Result<(), ServiceError> {
        let activation = self.activate(view, user_id, generation).await;
        match activation {
            Ok(mode) => {
                let stale = {
                    let mut records = self.records.lock().expect("records lock poisoned");
                    match records.get_mut(view) {
                        Some(record) if record.generation == generation => {
                            record.state = RecordState::Ready(mode);
                            None
                        }
                        _ => Some(mode),
                    }
                };
                if let Some(mode) = stale {
                    // Every holder released while we were starting; undo.
                    stop_mode(mode).await;
                    let message = "stream released during activation".to_string();
                    let _ = tx.send(Some(Err(message.clone())));
                    return Err(ServiceError::Internal(message));
                }
                tracing::info!(%view, "upstream feed active");
                let _ = tx.send(Some(Ok(())));
                Ok(())
            }
            Err(err) => {
                {
                    let mut records = self.records.lock().expect("records lock poisoned");
                    if records
                        .get(view)
                        .is_some_and(|record| record.generation == generation)
                    {
                        records.remove(view);
                    }
                }
                tracing::warn!(%view, error = %err, "feed activation failed");
                let _ = tx.send(Some(Err(err.client_message())));
                Err(err)
            }
        }
    }

    /// Choose and start the driving mode for `view`. Native streams win when
    /// the venue has one for the kind; otherwise a compatible REST operation
    /// backs a polling loop; otherwise activation fails.
    async fn activate(
        &self,
        view: &ViewKey,
        user_id: Option<&str>,
        generation: u64,
    ) -> Result<FeedMode, ServiceError> {
        let lease = self
            .pool
            .acquire(view.market(), view.provider(), user_id)
            .await?;
        let symbol = view.display_symbol();
        let channel = view.channel();
        let provider_id = view.provider().to_string();

        match view.kind() {
            StreamKind::Ohlcv => {
                let timeframe = view.timeframe().expect("ohlcv views carry a timeframe");
                if let Some(streams) = lease.as_ohlcv_stream_provider() {
                    let (upstream, rx) = streams.stream_ohlcv(&symbol, timeframe).await?;
                    let symbol = symbol.clone();
                    return Ok(FeedMode::Native(self.spawn_pump(
                        channel,
                        lease,
                        upstream,
                        rx,
                        move |bar| StreamMessage::Ohlcv {
                            provider: provider_id.clone(),
                            symbol: symbol.clone(),
                            timeframe,
                            bar,
                        },
                    )));
                }
            }
            StreamKind::Trades => {
                if let Some(streams) = lease.as_trade_stream_provider() {
                    let (upstream, rx) = streams.stream_trades(&symbol).await?;
                    let symbol = symbol.clone();
                    return Ok(FeedMode::Native(self.spawn_pump(
                        channel,
                        lease,
                        upstream,
                        rx,
                        move |trade| StreamMessage::Trades {
                            provider: provider_id.clone(),
                            symbol: symbol.clone(),
                            payload: serde_json::to_value(trade).unwrap_or_default(),
                        },
                    )));
                }
            }
            StreamKind::OrderBook => {
                if let Some(streams) = lease.as_order_book_stream_provider() {
                    let (upstream, rx) = streams.stream_order_book(&symbol).await?;
                    let symbol = symbol.clone();
                    return Ok(FeedMode::Native(self.spawn_pump(
                        channel,
                        lease,
                        upstream,
                        rx,
                        move |book: mercato_types::OrderBook| StreamMessage::OrderBook {
                            provider: provider_id.clone(),
                            symbol: symbol.clone(),
                            bids: book.bids,
                            asks: book.asks,
                            timestamp_ms: book.timestamp_ms,
                        },
                    )));
                }
            }
            StreamKind::UserOrders => {
                if let Some(streams) = lease.as_user_order_stream_provider() {
                    let (upstream, rx) = streams.stream_user_orders().await?;
                    let main_id = view.main_id();
                    return Ok(FeedMode::Native(self.spawn_pump(
                        channel,
                        lease,
                        upstream,
                        rx,
                        move |order| StreamMessage::UserOrders {
                            provider: provider_id.clone(),
                            symbol: main_id.clone(),
                            payload: serde_json::to_value(order).unwrap_or_default(),
                        },
                    )));
                }
            }
        }

        self.activate_polling(view, lease, generation)
    }

    fn activate_polling(
        &self,
        view: &ViewKey,
        lease: PluginLease,
        generation: u64,
    ) -> Result<FeedMode, ServiceError> {
        let source = match view.kind() {
            StreamKind::Ohlcv => Some(PollSource::Ohlcv(
                view.timeframe().expect("ohlcv views carry a timeframe"),
            )),
            StreamKind::Trades => lease
                .as_ticker_provider()
                .is_some()
                .then_some(PollSource::Ticker),
            StreamKind::OrderBook => lease
                .as_order_book_provider()
                .is_some()
                .then_some(PollSource::OrderBook),
            StreamKind::UserOrders => lease
                .as_open_orders_provider()
                .is_some()
                .then_some(PollSource::OpenOrders),
        };
        let Some(source) = source else {
            return Err(ServiceError::Plugin(PluginError::unsupported(
                view.provider().to_string(),
                "live feed (no native stream, no polling fallback)",
            )));
        };

        tracing::info!(%view, "no native stream; starting polling fallback");
        Ok(FeedMode::Polling(spawn_polling(PollingContext {
            bus: Arc::clone(&self.bus),
            lease,
            view: view.clone(),
            source,
            interval: self.polling.interval_for(view.kind()),
            records: Arc::clone(&self.records),
            generation,
        })))
    }

    /// Pump task bridging a native venue stream onto the bus. Owns the
    /// plugin lease and the venue-side handle; stopping the pump stops the
    /// venue session.
    fn spawn_pump<T, F>(
        &self,
        channel: String,
        lease: PluginLease,
        upstream: StreamHandle,
        mut rx: mpsc::Receiver<T>,
        to_message: F,
    ) -> StreamHandle
    where
        T: Send + 'static,
        F: Fn(T) -> StreamMessage + Send + 'static,
    {
        let bus = Arc::clone(&self.bus);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            let _lease = lease;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    update = rx.recv() => match update {
                        Some(update) => {
                            let message = to_message(update);
                            match serde_json::to_vec(&message) {
                                Ok(payload) => {
                                    if let Err(err) = bus.publish(&channel, &payload).await {
                                        tracing::warn!(%channel, error = %err, "bus publish failed");
                                    }
                                }
                                Err(err) => {
                                    tracing::error!(%channel, error = %err, "unserializable stream update");
                                }
                            }
                        }
                        None => {
                            tracing::info!(%channel, "native stream ended upstream");
                            break;
                        }
                    }
                }
            }
            upstream.stop().await;
        });
        StreamHandle::new(join, stop_tx)
    }

    /// Drop one reference to `view`'s feed; the last release stops the feed
    /// and removes its record. Releasing an unknown feed only warns.
    pub async fn release(&self, view: &ViewKey) {
        let stopped = {
            let mut records = self.records.lock().expect("records lock poisoned");
            match records.get_mut(view) {
                None => {
                    tracing::warn!(%view, "release for a feed that is not tracked");
                    None
                }
                Some(record) => {
                    record.refcount = record.refcount.saturating_sub(1);
                    if record.refcount == 0 {
                        let record = records.remove(view).expect("record present");
                        match record.state {
                            RecordState::Ready(mode) => Some(mode),
                            RecordState::Activating(_) => None,
                        }
                    } else {
                        tracing::debug!(
                            %view,
                            remaining = record.refcount,
                            "feed still referenced"
                        );
                        None
                    }
                }
            }
        };
        if let Some(mode) = stopped {
            stop_mode(mode).await;
            tracing::info!(%view, "upstream feed stopped");
        }
    }

    /// Stop every feed and clear all bookkeeping. Failures are logged per
    /// feed; the sweep always completes.
    pub async fn shutdown(&self) {
        let drained: Vec<(ViewKey, StreamRecord)> = {
            let mut records = self.records.lock().expect("records lock poisoned");
            records.drain().collect()
        };
        tracing::info!(feeds = drained.len(), "streaming manager shutting down");
        for (view, record) in drained {
            match record.state {
                RecordState::Ready(mode) => {
                    stop_mode(mode).await;
                    tracing::debug!(%view, "feed stopped during shutdown");
                }
                RecordState::Activating(_) => {
                    tracing::debug!(%view, "activation abandoned during shutdown");
                }
            }
        }
    }

    /// Number of tracked feeds.
    #[must_use]
    pub fn active_feeds(&self) -> usize {
        self.records.lock().expect("records lock poisoned").len()
    }

    /// Current reference count of `view`'s feed.
    #[must_use]
    pub fn refcount(&self, view: &ViewKey) -> Option<usize> {
        self.records
            .lock()
            .expect("records lock poisoned")
            .get(view)
            .map(|record| record.refcount)
    }

    /// Current driving mode of `view`'s feed.
    #[must_use]
    pub fn mode_of(&self, view: &ViewKey) -> Option<FeedKind> {
        self.records
            .lock()
            .expect("records lock poisoned")
            .get(view)
            .map(|record| match record.state {
                RecordState::Ready(FeedMode::Native(_)) => FeedKind::Native,
                RecordState::Ready(FeedMode::Polling(_)) => FeedKind::Polling,
                RecordState::Activating(_) => FeedKind::Activating,
            })
    }
}

async fn stop_mode(mode: FeedMode) {
    match mode {
        FeedMode::Native(handle) | FeedMode::Polling(handle) => handle.stop().await,
    }
}
