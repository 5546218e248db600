//! Upstream feed ownership: refcounted acquisition of native venue streams
//! with automatic REST-polling fallback, publishing normalized messages to
//! the bus.

mod manager;
mod polling;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use mercato_core::StreamHandle;
use mercato_types::ViewKey;

pub use manager::{FeedKind, StreamingManager};

/// How an active feed is driven.
pub(crate) enum FeedMode {
    /// Pump task reading a native venue stream.
    Native(StreamHandle),
    /// Polling loop over the venue's REST surface.
    Polling(StreamHandle),
}

/// `None` while activation is in flight; then the outcome, with a
/// client-ready message on failure.
pub(crate) type ActivationResult = Option<Result<(), String>>;

pub(crate) enum RecordState {
    /// First subscriber is still starting the feed; later arrivals wait on
    /// the channel instead of racing a second upstream connection.
    Activating(watch::Receiver<ActivationResult>),
    Ready(FeedMode),
}

pub(crate) struct StreamRecord {
    pub refcount: usize,
    /// Distinguishes reincarnations of the same key so late cleanups cannot
    /// remove a newer record.
    pub generation: u64,
    pub state: RecordState,
}

pub(crate) type Records = Arc<Mutex<HashMap<ViewKey, StreamRecord>>>;

/// Remove `view`'s record if it still belongs to `generation`. Used by
/// polling tasks that die terminally (venue dropped the operation).
pub(crate) fn remove_generation(records: &Records, view: &ViewKey, generation: u64) {
    let removed = {
        let mut records = records.lock().expect("records lock poisoned");
        match records.get(view) {
            Some(record) if record.generation == generation => records.remove(view),
            _ => None,
        }
    };
    if let Some(record) = removed {
        tracing::info!(%view, "feed record removed after terminal failure");
        if let RecordState::Ready(FeedMode::Native(handle) | FeedMode::Polling(handle)) =
            record.state
        {
            // The caller is the task behind this handle; do not stop it.
            handle.detach();
        }
    }
}
