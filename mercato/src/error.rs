use thiserror::Error;

use mercato_core::{BusError, PluginError, StoreError};

/// Errors raised inside the fan-out service.
///
/// Only [`ServiceError::client_message`] crosses the WebSocket: clients get a
/// short description, never internals or stack traces.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The client message was malformed or inconsistent.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The operation requires an authenticated user.
    #[error("authentication required: {0}")]
    Auth(String),

    /// A venue plugin failed.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// The OHLCV warehouse failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The pub/sub transport failed.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Anything else; logged with context, surfaced generically.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// The short message sent to clients in `error` envelopes.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::Auth(msg) => msg.clone(),
            Self::Plugin(PluginError::Auth { provider, .. }) => {
                format!("authentication with {provider} failed")
            }
            Self::Plugin(PluginError::NotSupported {
                provider,
                operation,
            }) => format!("{provider} does not support {operation}"),
            Self::Plugin(PluginError::Network { provider, .. }) => {
                format!("{provider} is unreachable; try again shortly")
            }
            Self::Plugin(PluginError::Venue { provider, .. }) => {
                format!("{provider} rejected the request")
            }
            Self::Store(_) => "historical data is temporarily unavailable".to_string(),
            Self::Bus(_) | Self::Internal(_) => "internal error".to_string(),
        }
    }
}
