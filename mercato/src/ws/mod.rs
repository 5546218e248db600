//! WebSocket front: accepts connections, validates bearer tokens, and
//! bridges the socket onto the subscription service. Three activities run
//! per connection until any exits: a reader dispatching control messages, a
//! writer draining the outbound queue, and a heartbeat enqueueing pings.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, header};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::auth::JwtVerifier;
use crate::registry::ConnId;
use crate::subscription::{
    ClientCommand, DEFAULT_OUTBOX_CAPACITY, FrameClass, Outbox, ServerEnvelope,
    SubscriptionService,
};

/// Shared state behind the HTTP surface.
#[derive(Clone)]
pub struct WsState {
    /// The per-client orchestrator.
    pub subscriptions: Arc<SubscriptionService>,
    /// Bearer-token verifier.
    pub verifier: Arc<JwtVerifier>,
    /// Heartbeat cadence.
    pub ping_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    /// Bearer token as a query parameter, for browser clients that cannot
    /// set headers on WebSocket upgrade.
    #[serde(default)]
    token: Option<String>,
}

/// Build the router serving `/ws`, with CORS restricted to the trusted
/// origins (or disabled when none are configured).
pub fn router(state: WsState, trusted_origins: &[String]) -> Router {
    let cors = if trusted_origins.is_empty() {
        CorsLayer::new()
    } else {
        let origins: Vec<HeaderValue> = trusted_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
    };
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<WsState>,
) -> impl IntoResponse {
    let token = query.token.or_else(|| bearer_from_headers(&headers));
    let user_id = state.verifier.user_id(token.as_deref());
    ws.on_upgrade(move |socket| client_session(socket, state, user_id))
}

async fn client_session(socket: WebSocket, state: WsState, user_id: Option<String>) {
    let conn = ConnId::next();
    let (outbox, mut reader) = Outbox::new(DEFAULT_OUTBOX_CAPACITY);
    state
        .subscriptions
        .connect(conn, outbox.clone(), user_id);

    let (mut sink, mut stream) = socket.split();

    // Writer: the only task touching the sink, so frames never interleave.
    let writer = tokio::spawn(async move {
        while let Some(frame) = reader.next().await {
            if sink.send(Message::Text(frame.text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Heartbeat.
    let ping_outbox = outbox.clone();
    let ping_interval = state.ping_interval;
    let pinger = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if !ping_outbox.enqueue(ServerEnvelope::Ping.into_frame(FrameClass::Ping)) {
                break;
            }
        }
    });

    // Reader: dispatch control messages until the socket ends.
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                dispatch(&state, conn, &outbox, &text).await;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_)) => {}
            Ok(Message::Close(_)) | Err(_) => break,
        }
    }

    tracing::debug!(%conn, "socket closed; tearing down");
    pinger.abort();
    state.subscriptions.handle_disconnect(conn).await;
    let _ = writer.await;
}

async fn dispatch(state: &WsState, conn: ConnId, outbox: &Outbox, text: &str) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(err) => {
            tracing::debug!(%conn, error = %err, "unparseable client message");
            let _ = outbox
                .enqueue_critical(
                    ServerEnvelope::error("unrecognized message").into_frame(FrameClass::Critical),
                )
                .await;
            return;
        }
    };
    match command {
        ClientCommand::Subscribe {
            market,
            provider,
            symbol,
            stream_type,
            timeframe,
            since,
        } => {
            state
                .subscriptions
                .handle_subscribe(
                    conn,
                    &market,
                    &provider,
                    &symbol,
                    &stream_type,
                    timeframe.as_deref(),
                    since,
                )
                .await;
        }
        ClientCommand::Unsubscribe {
            market,
            provider,
            symbol,
            stream_type,
            timeframe,
        } => {
            state
                .subscriptions
                .handle_unsubscribe(
                    conn,
                    &market,
                    &provider,
                    &symbol,
                    &stream_type,
                    timeframe.as_deref(),
                )
                .await;
        }
        ClientCommand::Ping | ClientCommand::Pong => {}
    }
}
