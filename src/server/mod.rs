//! Observer server implementation
//!
//! Accepts WebSocket upgrades, runs one relay session per connection and
//! keeps each session's broker subscription and socket tied together.

mod gateway;
mod queue;
mod session;

pub use gateway::{Gateway, GatewaySettings, DEFAULT_QUEUE_CAPACITY};
pub use queue::EventQueue;
pub use session::{
    CloseReason, RelaySession, SessionError, SessionReport, SessionState, TransportError,
};
