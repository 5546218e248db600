use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use mercato_core::plugin::{InstanceSpec, MarketPlugin};

use crate::catalog::PluginCatalog;
use crate::credentials::CredentialSource;
use crate::error::ServiceError;

/// Identity of one pooled plugin instance. At most one live instance exists
/// per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    plugin_key: &'static str,
    provider: String,
    credential_fingerprint: String,
    testnet: bool,
}

struct PoolEntry {
    plugin: Arc<dyn MarketPlugin>,
    last_used: Instant,
    inflight: usize,
}

type Entries = Arc<Mutex<HashMap<PoolKey, PoolEntry>>>;

/// Process-wide cache of configured plugin instances.
///
/// Instances are built lazily on first acquisition and shared by identity
/// afterwards. Every acquisition returns a [`PluginLease`] that keeps the
/// entry pinned (`inflight > 0`); a background sweeper closes instances that
/// have been idle past the TTL, and `shutdown` closes everything.
pub struct PluginPool {
    catalog: Arc<PluginCatalog>,
    credentials: Arc<dyn CredentialSource>,
    request_timeout: Duration,
    entries: Entries,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl PluginPool {
    /// Create the pool and start its idle sweeper.
    #[must_use]
    pub fn new(
        catalog: Arc<PluginCatalog>,
        credentials: Arc<dyn CredentialSource>,
        request_timeout: Duration,
        idle_ttl: Duration,
    ) -> Arc<Self> {
        let entries: Entries = Arc::new(Mutex::new(HashMap::new()));
        let sweeper = spawn_sweeper(Arc::clone(&entries), idle_ttl);
        Arc::new(Self {
            catalog,
            credentials,
            request_timeout,
            entries,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Acquire the pooled instance serving `(market, provider)`, building it
    /// on first use. When `user_id` is given, that user's credentials select
    /// (and fingerprint) the instance.
    ///
    /// # Errors
    /// [`ServiceError::Validation`] when no plugin configures the provider;
    /// plugin construction failures pass through.
    pub async fn acquire(
        &self,
        market: &str,
        provider: &str,
        user_id: Option<&str>,
    ) -> Result<PluginLease, ServiceError> {
        let factory = self.catalog.resolve(market, provider).ok_or_else(|| {
            ServiceError::Validation(format!(
                "no plugin configures provider {provider:?} for market {market:?}"
            ))
        })?;

        let credentials = match user_id {
            Some(user_id) => {
                self.credentials
                    .credentials_for(user_id, provider)
                    .await?
            }
            None => None,
        };

        let mut spec = InstanceSpec::new(provider.to_lowercase())
            .with_request_timeout(self.request_timeout);
        let fingerprint = credentials
            .as_ref()
            .map_or_else(|| "anon".to_string(), |c| c.fingerprint());
        if let Some(credentials) = credentials {
            spec = spec.with_credentials(credentials);
        }

        let key = PoolKey {
            plugin_key: factory.plugin_key(),
            provider: spec.provider_id.clone(),
            credential_fingerprint: fingerprint,
            testnet: spec.is_testnet,
        };

        let mut entries = self.entries.lock().expect("pool lock poisoned");
        if let Some(entry) = entries.get_mut(&key) {
            entry.inflight += 1;
            entry.last_used = Instant::now();
            return Ok(PluginLease {
                plugin: Arc::clone(&entry.plugin),
                entries: Arc::clone(&self.entries),
                key,
            });
        }

        let plugin = factory.build(&spec)?;
        tracing::info!(
            plugin_key = key.plugin_key,
            provider = %key.provider,
            authenticated = key.credential_fingerprint != "anon",
            "plugin instance created"
        );
        entries.insert(
            key.clone(),
            PoolEntry {
                plugin: Arc::clone(&plugin),
                last_used: Instant::now(),
                inflight: 1,
            },
        );
        Ok(PluginLease {
            plugin,
            entries: Arc::clone(&self.entries),
            key,
        })
    }

    /// Number of live pooled instances.
    #[must_use]
    pub fn live_instances(&self) -> usize {
        self.entries.lock().expect("pool lock poisoned").len()
    }

    /// Stop the sweeper and close every instance. Close failures are logged
    /// and do not stop the drain.
    pub async fn shutdown(&self) {
        if let Some(sweeper) = self.sweeper.lock().expect("pool lock poisoned").take() {
            sweeper.abort();
        }
        let drained: Vec<(PoolKey, Arc<dyn MarketPlugin>)> = {
            let mut entries = self.entries.lock().expect("pool lock poisoned");
            entries.drain().map(|(k, e)| (k, e.plugin)).collect()
        };
        for (key, plugin) in drained {
            if let Err(err) = plugin.close().await {
                tracing::warn!(provider = %key.provider, error = %err, "plugin close failed");
            }
        }
        tracing::info!("plugin pool shut down");
    }
}

fn spawn_sweeper(entries: Entries, idle_ttl: Duration) -> JoinHandle<()> {
    let period = (idle_ttl / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            let expired: Vec<(PoolKey, Arc<dyn MarketPlugin>)> = {
                let mut entries = entries.lock().expect("pool lock poisoned");
                let now = Instant::now();
                let keys: Vec<PoolKey> = entries
                    .iter()
                    .filter(|(_, e)| e.inflight == 0 && now - e.last_used > idle_ttl)
                    .map(|(k, _)| k.clone())
                    .collect();
                keys.into_iter()
                    .filter_map(|k| entries.remove(&k).map(|e| (k, e.plugin)))
                    .collect()
            };
            for (key, plugin) in expired {
                tracing::info!(provider = %key.provider, "closing idle plugin instance");
                if let Err(err) = plugin.close().await {
                    tracing::warn!(provider = %key.provider, error = %err, "plugin close failed");
                }
            }
        }
    })
}

/// A handle pinning one pooled instance while in use. Dropping the lease
/// releases the pin and refreshes the idle clock.
pub struct PluginLease {
    plugin: Arc<dyn MarketPlugin>,
    entries: Entries,
    key: PoolKey,
}

impl PluginLease {
    /// The leased plugin.
    #[must_use]
    pub fn plugin(&self) -> &Arc<dyn MarketPlugin> {
        &self.plugin
    }
}

impl std::ops::Deref for PluginLease {
    type Target = dyn MarketPlugin;

    fn deref(&self) -> &Self::Target {
        &*self.plugin
    }
}

impl Drop for PluginLease {
    fn drop(&mut self) {
        let mut entries = self.entries.lock().expect("pool lock poisoned");
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.inflight = entry.inflight.saturating_sub(1);
            entry.last_used = Instant::now();
        }
    }
}
