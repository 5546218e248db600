use std::collections::HashMap;
use std::sync::Arc;

use mercato_core::plugin::PluginFactory;

/// Process-wide registry of plugin implementations.
///
/// Built once at startup: every factory is recorded under its plugin key,
/// and each market it serves gains the key in discovery order. Ordering is
/// stable, so when several plugins claim a market the first registered one
/// that configures the requested provider wins.
#[derive(Default)]
pub struct PluginCatalog {
    by_key: HashMap<&'static str, Arc<dyn PluginFactory>>,
    by_market: Vec<(String, Vec<&'static str>)>,
}

impl PluginCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog with all built-in plugins registered.
    #[must_use]
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register(Arc::new(mercato_exchange::ExchangeFactory));
        catalog.register(Arc::new(mercato_alpaca::AlpacaFactory));
        catalog
    }

    /// Record a factory under its key and markets.
    pub fn register(&mut self, factory: Arc<dyn PluginFactory>) {
        let key = factory.plugin_key();
        for market in factory.supported_markets() {
            let market = market.to_lowercase();
            match self.by_market.iter_mut().find(|(m, _)| *m == market) {
                Some((_, keys)) => {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
                None => self.by_market.push((market, vec![key])),
            }
        }
        self.by_key.insert(key, factory);
        tracing::debug!(plugin_key = key, "plugin registered");
    }

    /// Look up a factory by plugin key.
    #[must_use]
    pub fn by_key(&self, key: &str) -> Option<Arc<dyn PluginFactory>> {
        self.by_key.get(key).cloned()
    }

    /// Markets with at least one plugin, in discovery order.
    #[must_use]
    pub fn markets(&self) -> Vec<String> {
        self.by_market.iter().map(|(m, _)| m.clone()).collect()
    }

    /// Plugin keys serving `market`, in discovery order.
    #[must_use]
    pub fn keys_for_market(&self, market: &str) -> Vec<&'static str> {
        let market = market.to_lowercase();
        self.by_market
            .iter()
            .find(|(m, _)| *m == market)
            .map(|(_, keys)| keys.clone())
            .unwrap_or_default()
    }

    /// The first factory in `market`'s discovery order that configures
    /// `provider`.
    #[must_use]
    pub fn resolve(&self, market: &str, provider: &str) -> Option<Arc<dyn PluginFactory>> {
        let provider = provider.to_lowercase();
        self.keys_for_market(market)
            .into_iter()
            .filter_map(|key| self.by_key.get(key))
            .find(|factory| {
                factory
                    .configurable_providers()
                    .iter()
                    .any(|p| p.eq_ignore_ascii_case(&provider))
            })
            .cloned()
    }
}
