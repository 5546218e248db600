use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mercato_core::{MessageBus, StreamHandle};
use mercato_types::{StreamKind, ViewKey, ViewKeyError};

use crate::error::ServiceError;
use crate::history::HistoryService;
use crate::registry::{ConnId, SubscriptionRegistry};
use crate::streaming::StreamingManager;

use super::listener::spawn_view_listener;
use super::outbox::{FrameClass, Outbox};
use super::protocol::{ChartPayload, ServerEnvelope};

struct ViewState {
    channel: String,
    listener: StreamHandle,
    /// User id used when the feed was acquired; user-scoped feeds need it
    /// recorded so teardown stays symmetric with activation.
    #[allow(dead_code)]
    user_id_used: Option<String>,
}

struct ClientEntry {
    outbox: Outbox,
    user_id: Option<String>,
    /// Per-connection lock: a subscribe and a disconnect for the same
    /// connection never interleave.
    views: tokio::sync::Mutex<HashMap<ViewKey, ViewState>>,
}

/// The per-client orchestrator.
///
/// One instance serves every connection. For each view a client opens it
/// delivers the initial history snapshot (OHLCV), keeps the upstream feed
/// referenced through the streaming manager, and runs a dedicated bus
/// listener that filters and formats live updates for that view. Teardown
/// of one view never disturbs sibling views.
pub struct SubscriptionService {
    registry: SubscriptionRegistry,
    manager: Arc<StreamingManager>,
    history: Arc<HistoryService>,
    bus: Arc<dyn MessageBus>,
    initial_chart_points: usize,
    clients: Mutex<HashMap<ConnId, Arc<ClientEntry>>>,
}

impl SubscriptionService {
    /// Wire the service to its collaborators.
    #[must_use]
    pub fn new(
        manager: Arc<StreamingManager>,
        history: Arc<HistoryService>,
        bus: Arc<dyn MessageBus>,
        initial_chart_points: usize,
    ) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            manager,
            history,
            bus,
            initial_chart_points,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Record a freshly accepted connection and its outbound queue.
    pub fn connect(&self, conn: ConnId, outbox: Outbox, user_id: Option<String>) {
        tracing::info!(%conn, authenticated = user_id.is_some(), "client connected");
        self.clients.lock().expect("clients lock poisoned").insert(
            conn,
            Arc::new(ClientEntry {
                outbox,
                user_id,
                views: tokio::sync::Mutex::new(HashMap::new()),
            }),
        );
    }

    fn entry(&self, conn: ConnId) -> Option<Arc<ClientEntry>> {
        self.clients
            .lock()
            .expect("clients lock poisoned")
            .get(&conn)
            .cloned()
    }

    async fn send_status(entry: &ClientEntry, message: String) -> bool {
        entry
            .outbox
            .enqueue_critical(ServerEnvelope::status(message).into_frame(FrameClass::Critical))
            .await
    }

    async fn send_error(entry: &ClientEntry, message: String) {
        let _ = entry
            .outbox
            .enqueue_critical(ServerEnvelope::error(message).into_frame(FrameClass::Critical))
            .await;
    }

    /// Build the view key for a client request, enforcing per-kind rules.
    fn client_view(
        entry: &ClientEntry,
        market: &str,
        provider: &str,
        symbol: &str,
        stream_type: &str,
        timeframe: Option<&str>,
    ) -> Result<ViewKey, ServiceError> {
        let kind: StreamKind = stream_type
            .trim()
            .to_lowercase()
            .parse()
            .map_err(|_| ServiceError::Validation(format!("invalid stream type: {stream_type}")))?;
        if kind == StreamKind::UserOrders && entry.user_id.is_none() {
            return Err(ServiceError::Auth(
                "authentication required for user order streams".to_string(),
            ));
        }
        let user_ctx = (kind == StreamKind::UserOrders)
            .then(|| entry.user_id.clone())
            .flatten();
        ViewKey::new(market, provider, symbol, kind, timeframe, user_ctx.as_deref()).map_err(
            |err| match err {
                ViewKeyError::MissingUserContext => ServiceError::Auth(
                    "authentication required for user order streams".to_string(),
                ),
                other => ServiceError::Validation(other.to_string()),
            },
        )
    }

    /// Handle a subscribe request for one view.
    #[allow(clippy::too_many_arguments)]
    pub async fn handle_subscribe(
        &self,
        conn: ConnId,
        market: &str,
        provider: &str,
        symbol: &str,
        stream_type: &str,
        timeframe: Option<&str>,
        since: Option<i64>,
    ) {
        let Some(entry) = self.entry(conn) else {
            tracing::warn!(%conn, "subscribe from unknown connection");
            return;
        };

        let view = match Self::client_view(&entry, market, provider, symbol, stream_type, timeframe)
        {
            Ok(view) => view,
            Err(err) => {
                tracing::warn!(%conn, error = %err, "rejected subscribe request");
                Self::send_error(&entry, err.client_message()).await;
                return;
            }
        };

        // Serializes with unsubscribe/disconnect for this connection.
        let mut views = entry.views.lock().await;
        if views.contains_key(&view) {
            tracing::debug!(%conn, %view, "duplicate subscribe for an active view");
            Self::send_status(&entry, format!("already subscribed to {view}; live updates active"))
                .await;
            return;
        }

        let channel = view.channel();
        self.registry.register(conn, view.clone());
        tracing::info!(%conn, %view, %channel, "subscribe accepted");

        if view.kind() == StreamKind::Ohlcv {
            if !Self::send_status(&entry, format!("subscribed to {view}; loading history")).await {
                self.registry.unregister_one(conn, &view);
                return;
            }
            let timeframe = view.timeframe().expect("ohlcv views carry a timeframe");
            let snapshot = self
                .history
                .fetch_for_view(&view, since, self.initial_chart_points, entry.user_id.as_deref())
                .await;
            let bars = match snapshot {
                Ok(bars) => bars,
                Err(err) => {
                    tracing::warn!(%conn, %view, error = %err, "initial history failed");
                    Self::send_error(&entry, err.client_message()).await;
                    self.registry.unregister_one(conn, &view);
                    return;
                }
            };
            tracing::debug!(%conn, %view, bars = bars.len(), "initial snapshot ready");
            let data = ServerEnvelope::Data {
                symbol: view.display_symbol(),
                timeframe,
                payload: ChartPayload::from_bars(&bars, true),
            };
            if !entry
                .outbox
                .enqueue_critical(data.into_frame(FrameClass::Critical))
                .await
            {
                self.registry.unregister_one(conn, &view);
                return;
            }
        } else if !Self::send_status(&entry, format!("subscribed to {view}")).await {
            self.registry.unregister_one(conn, &view);
            return;
        }

        if let Err(err) = self
            .manager
            .ensure_active(&view, entry.user_id.as_deref())
            .await
        {
            tracing::warn!(%conn, %view, error = %err, "feed activation failed");
            Self::send_error(&entry, err.client_message()).await;
            self.registry.unregister_one(conn, &view);
            return;
        }

        let subscription = match self.bus.subscribe(&channel).await {
            Ok(subscription) => subscription,
            Err(err) => {
                tracing::error!(%conn, %view, error = %err, "bus subscribe failed");
                Self::send_error(&entry, "internal error".to_string()).await;
                self.manager.release(&view).await;
                self.registry.unregister_one(conn, &view);
                return;
            }
        };
        let listener = spawn_view_listener(subscription, view.clone(), entry.outbox.clone());
        views.insert(
            view.clone(),
            ViewState {
                channel,
                listener,
                user_id_used: entry.user_id.clone(),
            },
        );
        drop(views);

        Self::send_status(&entry, format!("live updates for {view} enabled")).await;
    }

    /// Handle an unsubscribe request for one view.
    pub async fn handle_unsubscribe(
        &self,
        conn: ConnId,
        market: &str,
        provider: &str,
        symbol: &str,
        stream_type: &str,
        timeframe: Option<&str>,
    ) {
        let Some(entry) = self.entry(conn) else {
            return;
        };
        let view = match Self::client_view(&entry, market, provider, symbol, stream_type, timeframe)
        {
            Ok(view) => view,
            Err(err) => {
                Self::send_error(&entry, err.client_message()).await;
                return;
            }
        };

        let mut views = entry.views.lock().await;
        match views.remove(&view) {
            Some(state) => {
                self.cleanup_view(conn, &view, state).await;
                drop(views);
                Self::send_status(&entry, format!("unsubscribed from {view}")).await;
            }
            None => {
                tracing::debug!(%conn, %view, "unsubscribe for a view that is not held");
                Self::send_error(&entry, format!("not subscribed to {view}")).await;
            }
        }
    }

    /// Tear down every view of a disconnected client and drop its state.
    pub async fn handle_disconnect(&self, conn: ConnId) {
        let Some(entry) = self
            .clients
            .lock()
            .expect("clients lock poisoned")
            .remove(&conn)
        else {
            return;
        };
        entry.outbox.close();

        let drained: Vec<(ViewKey, ViewState)> = {
            let mut views = entry.views.lock().await;
            views.drain().collect()
        };
        tracing::info!(%conn, views = drained.len(), "client disconnected; cleaning up");
        for (view, state) in drained {
            self.cleanup_view(conn, &view, state).await;
        }
        // Safeguard; per-view cleanup has already unregistered everything.
        self.registry.unregister_all(conn);
    }

    /// Per-view teardown, in a fixed order: cancel the listener, release the
    /// upstream feed, then unregister the association.
    async fn cleanup_view(&self, conn: ConnId, view: &ViewKey, state: ViewState) {
        tracing::debug!(%conn, %view, channel = %state.channel, "cleaning up view");
        state.listener.stop().await;
        self.manager.release(view).await;
        self.registry.unregister_one(conn, view);
    }

    /// Disconnect every tracked client.
    pub async fn shutdown(&self) {
        let conns: Vec<ConnId> = {
            let clients = self.clients.lock().expect("clients lock poisoned");
            clients.keys().copied().collect()
        };
        tracing::info!(clients = conns.len(), "subscription service shutting down");
        for conn in conns {
            self.handle_disconnect(conn).await;
        }
    }

    /// The shared registry (read-only observation).
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Number of tracked client connections.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("clients lock poisoned").len()
    }
}
