use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use mercato_types::ViewKey;

/// Identity of one WebSocket connection. Allocated at accept time; never
/// reused within a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

impl ConnId {
    /// Allocate a fresh connection id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Build an id from a raw value (tests).
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Default)]
struct Inner {
    by_conn: HashMap<ConnId, HashSet<ViewKey>>,
    by_view: HashMap<ViewKey, HashSet<ConnId>>,
}

/// Bidirectional bookkeeping of which connection holds which views.
///
/// Pure in-memory maps behind one non-suspending lock: every operation is
/// atomic to observers, and the biconditional
/// `view ∈ keys_of(conn) ⇔ conn ∈ subscribers_of(view)` holds after each
/// call. Empty buckets are removed eagerly on both sides. The registry only
/// records associations; it never drives lifetimes.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<Inner>,
}

impl SubscriptionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `conn` with `view`. Idempotent; returns whether the pair
    /// was new.
    pub fn register(&self, conn: ConnId, view: ViewKey) -> bool {
        let mut inner = self.inner.write();
        let newly_added = inner.by_conn.entry(conn).or_default().insert(view.clone());
        inner.by_view.entry(view).or_default().insert(conn);
        newly_added
    }

    /// Remove one association. Returns whether the pair existed.
    pub fn unregister_one(&self, conn: ConnId, view: &ViewKey) -> bool {
        let mut inner = self.inner.write();
        let mut removed = false;
        if let Some(views) = inner.by_conn.get_mut(&conn) {
            removed = views.remove(view);
            if views.is_empty() {
                inner.by_conn.remove(&conn);
            }
        }
        if let Some(conns) = inner.by_view.get_mut(view) {
            conns.remove(&conn);
            if conns.is_empty() {
                inner.by_view.remove(view);
            }
        }
        removed
    }

    /// Remove every association for `conn`; returns the views it held.
    /// Used on disconnect.
    pub fn unregister_all(&self, conn: ConnId) -> Vec<ViewKey> {
        let mut inner = self.inner.write();
        let views: Vec<ViewKey> = inner
            .by_conn
            .remove(&conn)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for view in &views {
            if let Some(conns) = inner.by_view.get_mut(view) {
                conns.remove(&conn);
                if conns.is_empty() {
                    inner.by_view.remove(view);
                }
            }
        }
        views
    }

    /// Snapshot of the connections subscribed to `view`.
    #[must_use]
    pub fn subscribers_of(&self, view: &ViewKey) -> HashSet<ConnId> {
        self.inner
            .read()
            .by_view
            .get(view)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of the views held by `conn`.
    #[must_use]
    pub fn keys_of(&self, conn: ConnId) -> HashSet<ViewKey> {
        self.inner
            .read()
            .by_conn
            .get(&conn)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every view with at least one subscriber.
    #[must_use]
    pub fn active_views(&self) -> HashSet<ViewKey> {
        self.inner.read().by_view.keys().cloned().collect()
    }

    /// Number of connections with at least one view.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.read().by_conn.len()
    }

    /// Drop every association.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_conn.clear();
        inner.by_view.clear();
    }
}
