//! Broker backends
//!
//! - NATS: the production bus the judge publishes solution updates on
//! - Memory: in-process bus for tests and local tooling
//!
//! A session owns exactly one [`Subscription`] and releases it on every exit
//! path; [`Subscription::unsubscribe`] must therefore be idempotent.

mod memory;
mod nats;

pub use memory::MemoryBroker;
pub use nats::NatsBroker;

use crate::channels::Topic;
pub use async_trait::async_trait;
use thiserror::Error;

/// Broker errors
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connect(String),

    #[error("subscribe to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("unsubscribe from '{topic}' failed: {reason}")]
    Unsubscribe { topic: String, reason: String },

    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("broker flush failed: {0}")]
    Flush(String),
}

/// A shared connection to the bus
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a subscription on exactly one topic
    async fn subscribe(&self, topic: &Topic) -> Result<Box<dyn Subscription>, BrokerError>;

    /// Publish a raw payload on a topic
    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<(), BrokerError>;
}

/// A live subscription owned by one session
#[async_trait]
pub trait Subscription: Send {
    /// The topic this subscription listens on
    fn topic(&self) -> &Topic;

    /// Wait for the next payload, in broker order
    ///
    /// Returns `Ok(None)` once the broker has closed the subscription.
    async fn next_payload(&mut self) -> Result<Option<Vec<u8>>, BrokerError>;

    /// Release the subscription. Calling it again is a no-op.
    async fn unsubscribe(&mut self) -> Result<(), BrokerError>;
}
