//! Connection state machine, websocket transport, and error taxonomy for the
//! pocketagent bridge.
//!
//! One [`BridgeClient`] owns one logical connection. State changes and decoded
//! server messages fan out to any number of subscribers; unexpected transport
//! loss drives capped exponential backoff until the error classifier says a
//! human has to step in.

mod bridge;
mod error;
mod sink;
mod state;
mod transport;

pub use bridge::{BridgeClient, BridgeConfig};
pub use error::ConnectionError;
pub use sink::BridgeDecisionSink;
pub use state::ConnectionState;
pub use transport::{Transport, TransportPair, TransportSink, TransportStream, WebSocketTransport};
