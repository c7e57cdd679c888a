//! Durable offline queue for user decisions made while disconnected.
//!
//! Decisions (approve/deny a tool call) are persisted in insertion order and
//! replayed once connectivity returns. Entries older than the TTL are presumed
//! to have timed out server-side and are dropped without dispatch.

mod action;
mod error;
mod queue;
mod store;

pub use action::{ACTION_TTL_SECONDS, PendingAction};
pub use error::QueueError;
pub use queue::{
    Clock, Connectivity, DecisionSink, OfflineActionQueue, ProcessOutcome, SystemClock,
};
pub use store::{ActionStore, JsonFileStore, MemoryActionStore};
