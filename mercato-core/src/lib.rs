//! mercato-core
//!
//! Traits and utilities shared across the mercato ecosystem.
//!
//! - `plugin`: the `MarketPlugin` trait, focused role traits, and factories.
//! - `error`: the provider-tagged plugin error taxonomy.
//! - `stream`: cancellable handles for long-lived streaming tasks.
//! - `bus`: the pub/sub transport boundary and the in-process bus.
//! - `warehouse`: the OHLCV store boundary.
//! - `retry`: bounded backoff for transient venue failures.
//! - `timeseries`: resampling, merging, and gap detection.
//! - `canon`: canonical JSON hashing for polling change detection.
#![warn(missing_docs)]

/// Pub/sub transport boundary and the in-process bus.
pub mod bus;
/// Canonical JSON rendering and content digests.
pub mod canon;
/// Provider-tagged plugin error taxonomy.
pub mod error;
/// The `MarketPlugin` trait, focused role traits, and factories.
pub mod plugin;
/// Bounded backoff helpers for transient venue failures.
pub mod retry;
/// Cancellable handles for long-lived streaming tasks.
pub mod stream;
pub mod timeseries;
/// The OHLCV warehouse boundary.
pub mod warehouse;

pub use bus::{BusError, BusSubscriber, MemoryBus, MessageBus};
pub use canon::{canonical_json, content_digest};
pub use error::PluginError;
pub use plugin::{Credentials, InstanceSpec, MarketPlugin, PluginFactory};
pub use retry::{RetryPolicy, jittered_around_ms, jittered_ms, retry_transient};
pub use stream::StreamHandle;
pub use timeseries::{find_gaps, is_contiguous, merge_by_priority, resample, resample_closed};
pub use warehouse::{CandleStore, SeriesKey, StoreError};
