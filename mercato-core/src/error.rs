use thiserror::Error;

/// Boxed error cause carried alongside a provider failure.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error taxonomy for venue plugins.
///
/// Every variant carries the provider identifier so failures stay
/// attributable after they cross the plugin boundary. Policy is uniform
/// across plugins: authentication failures are terminal, network failures
/// are transient and retried with backoff, unsupported operations drive the
/// caller to a fallback, and everything else is a venue-side failure.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Credentials were rejected or missing for an authenticated call.
    #[error("{provider}: authentication failed: {message}")]
    Auth {
        /// Provider that rejected the call.
        provider: String,
        /// Short human-readable description.
        message: String,
    },

    /// Timeout, connection failure, or venue rate limiting (HTTP 429).
    #[error("{provider}: network failure: {message}")]
    Network {
        /// Provider the call was routed to.
        provider: String,
        /// Short human-readable description.
        message: String,
        /// Underlying transport error, when available.
        #[source]
        source: Option<Cause>,
    },

    /// The operation is not implemented for this provider.
    #[error("{provider}: operation not supported: {operation}")]
    NotSupported {
        /// Provider the call was routed to.
        provider: String,
        /// Operation label, e.g. `stream_ohlcv`.
        operation: &'static str,
    },

    /// Any other venue failure: 4xx/5xx bodies, malformed responses.
    #[error("{provider}: {message}")]
    Venue {
        /// Provider that failed.
        provider: String,
        /// Short human-readable description.
        message: String,
        /// Underlying error, when available.
        #[source]
        source: Option<Cause>,
    },
}

impl PluginError {
    /// Build an [`PluginError::Auth`] error.
    pub fn auth(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Build a [`PluginError::Network`] error without a cause.
    pub fn network(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            provider: provider.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Build a [`PluginError::Network`] error wrapping a cause.
    pub fn network_with(
        provider: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<Cause>,
    ) -> Self {
        Self::Network {
            provider: provider.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Build a [`PluginError::NotSupported`] error.
    pub fn unsupported(provider: impl Into<String>, operation: &'static str) -> Self {
        Self::NotSupported {
            provider: provider.into(),
            operation,
        }
    }

    /// Build a [`PluginError::Venue`] error without a cause.
    pub fn venue(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Venue {
            provider: provider.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Build a [`PluginError::Venue`] error wrapping a cause.
    pub fn venue_with(
        provider: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<Cause>,
    ) -> Self {
        Self::Venue {
            provider: provider.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The provider this error is attributed to.
    #[must_use]
    pub fn provider(&self) -> &str {
        match self {
            Self::Auth { provider, .. }
            | Self::Network { provider, .. }
            | Self::NotSupported { provider, .. }
            | Self::Venue { provider, .. } => provider,
        }
    }

    /// Whether retrying after a delay can plausibly succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Whether the operation is terminally unavailable on this provider.
    #[must_use]
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, Self::NotSupported { .. })
    }
}
