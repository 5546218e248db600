//! Per-client subscription coordination: view lifecycle, bus listeners,
//! outbound queueing, and the client-facing wire protocol.

mod listener;
mod outbox;
mod protocol;
mod service;

pub use outbox::{DEFAULT_OUTBOX_CAPACITY, FrameClass, OutboundFrame, Outbox, OutboxReader};
pub use protocol::{ChartPayload, ClientCommand, ServerEnvelope, StatusPayload};
pub use service::SubscriptionService;
