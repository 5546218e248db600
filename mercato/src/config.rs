use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use mercato_types::StreamKind;

/// Error raised when the environment carries an unusable value. Fatal at
/// startup: the process exits non-zero rather than running half-configured.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A recognized variable failed to parse.
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        /// Environment variable name.
        key: &'static str,
        /// Offending value.
        value: String,
        /// Short parse failure description.
        reason: String,
    },
}

fn parse_env<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_secs_f64(key: &'static str) -> Result<Option<Duration>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => {
            let secs: f64 = raw.trim().parse().map_err(|e: std::num::ParseFloatError| {
                ConfigError::Invalid {
                    key,
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?;
            if !secs.is_finite() || secs <= 0.0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: raw,
                    reason: "must be a positive number of seconds".into(),
                });
            }
            Ok(Some(Duration::from_secs_f64(secs)))
        }
        Err(_) => Ok(None),
    }
}

/// Fallback poll cadence per stream kind.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    ohlcv: Duration,
    trades: Duration,
    order_book: Duration,
    user_orders: Duration,
}

/// Generic default when no per-kind interval is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            ohlcv: DEFAULT_POLL_INTERVAL,
            trades: DEFAULT_POLL_INTERVAL,
            order_book: DEFAULT_POLL_INTERVAL,
            user_orders: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PollingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = parse_secs_f64("POLLING_INTERVAL_OHLCV_SEC")? {
            cfg.ohlcv = v;
        }
        if let Some(v) = parse_secs_f64("POLLING_INTERVAL_TRADES_SEC")? {
            cfg.trades = v;
        }
        if let Some(v) = parse_secs_f64("POLLING_INTERVAL_ORDER_BOOK_SEC")? {
            cfg.order_book = v;
        }
        if let Some(v) = parse_secs_f64("POLLING_INTERVAL_USER_ORDERS_SEC")? {
            cfg.user_orders = v;
        }
        Ok(cfg)
    }

    /// Uniform interval for every kind; used by tests to speed polling up.
    #[must_use]
    pub const fn uniform(interval: Duration) -> Self {
        Self {
            ohlcv: interval,
            trades: interval,
            order_book: interval,
            user_orders: interval,
        }
    }

    /// The configured interval for one stream kind.
    #[must_use]
    pub const fn interval_for(&self, kind: StreamKind) -> Duration {
        match kind {
            StreamKind::Ohlcv => self.ohlcv,
            StreamKind::Trades => self.trades,
            StreamKind::OrderBook => self.order_book,
            StreamKind::UserOrders => self.user_orders,
        }
    }
}

/// Environment-driven service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket bind address (`BIND_ADDR`).
    pub bind_addr: SocketAddr,
    /// Bars in the initial OHLCV snapshot (`INITIAL_CHART_POINTS`).
    pub initial_chart_points: usize,
    /// Per-call bar chunk during backfill (`DEFAULT_PLUGIN_CHUNK_SIZE`).
    pub plugin_chunk_size: usize,
    /// Safety bound on chunks per gap (`MAX_PLUGIN_CHUNKS_PER_GAP`).
    pub max_plugin_chunks_per_gap: usize,
    /// Fallback poll cadence (`POLLING_INTERVAL_<KIND>_SEC`).
    pub polling: PollingConfig,
    /// Heartbeat cadence (`WS_PING_INTERVAL_SEC`).
    pub ws_ping_interval: Duration,
    /// Idle timeout for pooled plugin instances (`PLUGIN_IDLE_TTL_SEC`).
    pub plugin_idle_ttl: Duration,
    /// Default plugin call timeout (`REQUEST_TIMEOUT_MS`).
    pub request_timeout: Duration,
    /// Allowed CORS origins (`TRUSTED_ORIGINS`, comma-separated).
    pub trusted_origins: Vec<String>,
    /// External pub/sub transport (`REDIS_URL`), when deployed multi-process.
    pub redis_url: Option<String>,
    /// OHLCV warehouse connection string (`OHLCV_WAREHOUSE_URL`).
    pub warehouse_url: String,
    /// HS256 secret for bearer-token validation (`JWT_SECRET`).
    pub jwt_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".parse().expect("valid default addr"),
            initial_chart_points: 200,
            plugin_chunk_size: 500,
            max_plugin_chunks_per_gap: 100,
            polling: PollingConfig::default(),
            ws_ping_interval: Duration::from_secs(10),
            plugin_idle_ttl: Duration::from_secs(300),
            request_timeout: Duration::from_millis(30_000),
            trusted_origins: Vec::new(),
            redis_url: None,
            warehouse_url: "memory:".to_string(),
            jwt_secret: None,
        }
    }
}

impl Config {
    /// Read the configuration from the environment.
    ///
    /// # Errors
    /// [`ConfigError`] on the first unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            bind_addr: parse_env("BIND_ADDR", defaults.bind_addr)?,
            initial_chart_points: parse_env("INITIAL_CHART_POINTS", defaults.initial_chart_points)?,
            plugin_chunk_size: parse_env("DEFAULT_PLUGIN_CHUNK_SIZE", defaults.plugin_chunk_size)?,
            max_plugin_chunks_per_gap: parse_env(
                "MAX_PLUGIN_CHUNKS_PER_GAP",
                defaults.max_plugin_chunks_per_gap,
            )?,
            polling: PollingConfig::from_env()?,
            ws_ping_interval: Duration::from_secs(parse_env("WS_PING_INTERVAL_SEC", 10u64)?),
            plugin_idle_ttl: Duration::from_secs(parse_env("PLUGIN_IDLE_TTL_SEC", 300u64)?),
            request_timeout: Duration::from_millis(parse_env("REQUEST_TIMEOUT_MS", 30_000u64)?),
            trusted_origins: std::env::var("TRUSTED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            warehouse_url: std::env::var("OHLCV_WAREHOUSE_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.warehouse_url),
            jwt_secret: std::env::var("JWT_SECRET").ok().filter(|s| !s.is_empty()),
        })
    }
}
