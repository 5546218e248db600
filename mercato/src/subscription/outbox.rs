use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use mercato_types::ViewKey;

/// How long a critical frame may wait for queue space before the connection
/// is declared dead.
const CRITICAL_ENQUEUE_WAIT: Duration = Duration::from_millis(250);

/// Delivery class of an outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameClass {
    /// Status, error, and initial snapshots. Never dropped.
    Critical,
    /// A live update for one view. Oldest-first droppable under pressure.
    Update(ViewKey),
    /// Heartbeat. Droppable when the queue is full.
    Ping,
}

/// One frame awaiting the socket writer.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Serialized JSON text.
    pub text: String,
    /// Delivery class.
    pub class: FrameClass,
}

struct Shared {
    queue: Mutex<VecDeque<OutboundFrame>>,
    capacity: usize,
    /// Wakes the writer when frames arrive or the outbox closes.
    readable: Notify,
    /// Wakes blocked critical producers when space frees up.
    writable: Notify,
    closed: AtomicBool,
}

/// Bounded per-connection outbound queue.
///
/// All writers to a socket funnel through here so background listeners and
/// heartbeats never interleave partial frames. Under pressure the queue
/// sheds load by dropping the oldest update for the same view first, then
/// the oldest update for any view; critical frames are never dropped, and a
/// critical frame that cannot be accepted within a short wait closes the
/// outbox (and with it the connection).
#[derive(Clone)]
pub struct Outbox {
    shared: Arc<Shared>,
}

/// The single consumer draining an [`Outbox`] onto the socket.
pub struct OutboxReader {
    shared: Arc<Shared>,
}

/// Default queue capacity in frames.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

impl Outbox {
    /// Create a queue and its reader.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, OutboxReader) {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            readable: Notify::new(),
            writable: Notify::new(),
            closed: AtomicBool::new(false),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            OutboxReader { shared },
        )
    }

    /// Whether the outbox has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Enqueue a droppable frame (update or ping). Returns `false` once the
    /// outbox is closed; a dropped-to-make-room frame still counts as
    /// success.
    pub fn enqueue(&self, frame: OutboundFrame) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut queue = self.shared.queue.lock().expect("outbox lock poisoned");
        if queue.len() >= self.shared.capacity && !Self::shed_for(&mut queue, &frame.class) {
            // Nothing sheddable; the incoming droppable frame loses.
            tracing::debug!("outbox full of critical frames; dropping outbound update");
            return true;
        }
        queue.push_back(frame);
        drop(queue);
        self.shared.readable.notify_one();
        true
    }

    /// Enqueue a frame that must not be dropped. Waits briefly for space
    /// when the queue is full of other critical frames; on timeout the
    /// outbox closes and `false` is returned.
    pub async fn enqueue_critical(&self, frame: OutboundFrame) -> bool {
        let deadline = tokio::time::Instant::now() + CRITICAL_ENQUEUE_WAIT;
        loop {
            if self.is_closed() {
                return false;
            }
            {
                let mut queue = self.shared.queue.lock().expect("outbox lock poisoned");
                if queue.len() < self.shared.capacity
                    || Self::shed_for(&mut queue, &FrameClass::Critical)
                {
                    queue.push_back(frame);
                    drop(queue);
                    self.shared.readable.notify_one();
                    return true;
                }
            }
            if tokio::time::timeout_at(deadline, self.shared.writable.notified())
                .await
                .is_err()
            {
                tracing::warn!("outbox cannot accept critical frame; closing connection");
                self.close();
                return false;
            }
        }
    }

    /// Drop one frame to make room for `incoming`, preferring the oldest
    /// update of the same view, then the oldest update of any view, then a
    /// pending ping. Returns whether room was made.
    fn shed_for(queue: &mut VecDeque<OutboundFrame>, incoming: &FrameClass) -> bool {
        if let FrameClass::Update(view) = incoming
            && let Some(pos) = queue
                .iter()
                .position(|f| matches!(&f.class, FrameClass::Update(v) if v == view))
        {
            queue.remove(pos);
            return true;
        }
        if let Some(pos) = queue
            .iter()
            .position(|f| matches!(f.class, FrameClass::Update(_)))
        {
            queue.remove(pos);
            return true;
        }
        if let Some(pos) = queue
            .iter()
            .position(|f| matches!(f.class, FrameClass::Ping))
        {
            queue.remove(pos);
            return true;
        }
        false
    }

    /// Close the outbox: producers start failing, the reader drains what is
    /// queued and then ends.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.readable.notify_waiters();
        self.shared.writable.notify_waiters();
    }
}

impl OutboxReader {
    /// Next frame to write, or `None` once the outbox is closed and fully
    /// drained.
    pub async fn next(&mut self) -> Option<OutboundFrame> {
        loop {
            let notified = self.shared.readable.notified();
            {
                let mut queue = self.shared.queue.lock().expect("outbox lock poisoned");
                if let Some(frame) = queue.pop_front() {
                    drop(queue);
                    self.shared.writable.notify_one();
                    return Some(frame);
                }
            }
            if self.shared.closed.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }
}
