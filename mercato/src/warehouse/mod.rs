//! Warehouse backends for the OHLCV store boundary.

mod memory;
mod sqlite;

use std::sync::Arc;

use mercato_core::CandleStore;

pub use memory::MemoryCandleStore;
pub use sqlite::SqliteCandleStore;

use crate::config::ConfigError;

/// Open the warehouse named by a connection string: `memory:` for the
/// in-process store, `sqlite:<path>` for a SQLite file.
///
/// # Errors
/// [`ConfigError`] for unknown schemes or an unopenable SQLite file.
pub fn open_store(url: &str) -> Result<Arc<dyn CandleStore>, ConfigError> {
    if url == "memory:" || url == "memory://" {
        return Ok(Arc::new(MemoryCandleStore::new()));
    }
    if let Some(path) = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
    {
        let store = SqliteCandleStore::open(path).map_err(|err| ConfigError::Invalid {
            key: "OHLCV_WAREHOUSE_URL",
            value: url.to_string(),
            reason: err.to_string(),
        })?;
        return Ok(Arc::new(store));
    }
    Err(ConfigError::Invalid {
        key: "OHLCV_WAREHOUSE_URL",
        value: url.to_string(),
        reason: "expected memory: or sqlite:<path>".to_string(),
    })
}
