//! Observer - real-time gateway for contest solution updates
//!
//! Bridges a topic-based broker (NATS) to authenticated WebSocket clients,
//! filtering every event against the client's token claims before delivery.

pub mod auth;
pub mod broker;
pub mod channels;
pub mod config;
pub mod events;
pub mod server;

pub use auth::{permits, verify, AuthError, ClaimSet, Role, VerificationSecret};
pub use broker::{Broker, BrokerError, MemoryBroker, NatsBroker, Subscription};
pub use channels::Topic;
pub use events::{decode, encode, CodecError, EventEnvelope, Solution};
pub use server::{Gateway, GatewaySettings, RelaySession, SessionReport, SessionState};
