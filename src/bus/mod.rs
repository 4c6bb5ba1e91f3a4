//! Producer side of the relay.
//!
//! Events flow from backend → EventBus → EventBatcher → Transport:
//! - `EventBus`: in-memory broadcast channel backend code publishes to
//! - `EventBatcher`: classifies, queues, merges and flushes events on
//!   priority-appropriate timers
//! - `BackgroundRouter`: slows traffic for workspaces the user is not
//!   looking at, unless a session is actively running
//! - `Transport`: "send to the other process" plus a liveness check

mod batcher;
mod event_bus;
pub mod event_types;
pub mod merge;
mod router;
mod transport;

pub use batcher::{BatcherStats, EventBatcher, ThrottleStatus};
pub use event_bus::{BusEvent, EventBus, EventScope};
pub use event_types::Priority;
pub use router::{BackgroundRouter, Lane, LiveActivityChange};
pub use transport::{ChannelTransport, Envelope, Transport, TransportError};
