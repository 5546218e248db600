use std::sync::Arc;

use mercato_core::{MemoryBus, MessageBus};

use crate::auth::JwtVerifier;
use crate::catalog::PluginCatalog;
use crate::config::{Config, ConfigError};
use crate::credentials::EnvCredentials;
use crate::history::{HistoryConfig, HistoryService};
use crate::pool::PluginPool;
use crate::streaming::StreamingManager;
use crate::subscription::SubscriptionService;
use crate::warehouse::open_store;
use crate::ws::{WsState, router};

/// The assembled service: wired components plus the HTTP router.
pub struct App {
    /// Per-client orchestrator.
    pub subscriptions: Arc<SubscriptionService>,
    /// Upstream feed owner.
    pub manager: Arc<StreamingManager>,
    /// Pooled plugin instances.
    pub pool: Arc<PluginPool>,
    /// HTTP/WebSocket router.
    pub router: axum::Router,
}

impl App {
    /// Wire every component from configuration.
    ///
    /// # Errors
    /// [`ConfigError`] when the warehouse URL is unusable.
    pub fn build(config: &Config) -> Result<Self, ConfigError> {
        if config.redis_url.is_some() {
            tracing::info!(
                "REDIS_URL is set; this process publishes on its in-process bus and owns its own upstream connections"
            );
        }
        let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
        let store = open_store(&config.warehouse_url)?;
        let catalog = Arc::new(PluginCatalog::builtin());
        tracing::info!(markets = ?catalog.markets(), "plugin catalog ready");

        let pool = PluginPool::new(
            catalog,
            Arc::new(EnvCredentials),
            config.request_timeout,
            config.plugin_idle_ttl,
        );
        let manager = Arc::new(StreamingManager::new(
            Arc::clone(&bus),
            Arc::clone(&pool),
            config.polling.clone(),
        ));
        let history = Arc::new(HistoryService::new(
            store,
            Arc::clone(&pool),
            HistoryConfig {
                chunk_size: config.plugin_chunk_size,
                max_chunks_per_gap: config.max_plugin_chunks_per_gap,
            },
        ));
        let subscriptions = Arc::new(SubscriptionService::new(
            Arc::clone(&manager),
            history,
            bus,
            config.initial_chart_points,
        ));

        let state = WsState {
            subscriptions: Arc::clone(&subscriptions),
            verifier: Arc::new(JwtVerifier::new(config.jwt_secret.as_deref())),
            ping_interval: config.ws_ping_interval,
        };
        let router = router(state, &config.trusted_origins);

        Ok(Self {
            subscriptions,
            manager,
            pool,
            router,
        })
    }

    /// Layered shutdown: client views first, then upstream feeds, then
    /// pooled plugin instances.
    pub async fn shutdown(&self) {
        self.subscriptions.shutdown().await;
        self.manager.shutdown().await;
        self.pool.shutdown().await;
    }
}
