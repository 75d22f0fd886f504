//! In-process broker
//!
//! Topic registry and fan-out live in one process. Each subscriber gets its
//! own bounded channel; publishing waits for room, like a broker applying
//! flow control to a slow consumer.

use crate::broker::{Broker, BrokerError, Subscription};
use crate::channels::Topic;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Default per-subscriber channel size
const DEFAULT_CAPACITY: usize = 1024;

struct Registry {
    /// Subscribers by topic name
    topics: DashMap<String, Vec<(Uuid, mpsc::Sender<Vec<u8>>)>>,
    capacity: usize,
    opened: AtomicUsize,
    released: AtomicUsize,
}

impl Registry {
    fn remove(&self, topic: &str, id: Uuid) {
        let mut now_empty = false;
        if let Some(mut subscribers) = self.topics.get_mut(topic) {
            subscribers.retain(|(sub_id, _)| *sub_id != id);
            now_empty = subscribers.is_empty();
        }
        if now_empty {
            self.topics.remove_if(topic, |_, subscribers| subscribers.is_empty());
        }
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Broker that routes payloads between tasks of the same process
#[derive(Clone)]
pub struct MemoryBroker {
    registry: Arc<Registry>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a broker whose subscribers buffer at most `capacity` payloads
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                topics: DashMap::new(),
                capacity: capacity.max(1),
                opened: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            }),
        }
    }

    /// Deliver a payload to every subscriber of `topic`, returns how many got it
    pub async fn deliver(&self, topic: &Topic, payload: Vec<u8>) -> usize {
        // Clone the senders out so no map guard is held across an await
        let subscribers: Vec<_> = match self.registry.topics.get(topic.as_str()) {
            Some(entry) => entry.value().iter().map(|(_, tx)| tx.clone()).collect(),
            None => {
                debug!(topic = %topic, "No subscribers for topic");
                return 0;
            }
        };

        debug!(topic = %topic, subscriber_count = subscribers.len(), "Routing payload");

        let mut delivered = 0;
        for tx in subscribers {
            if tx.send(payload.clone()).await.is_ok() {
                delivered += 1;
            } else {
                debug!(topic = %topic, "Subscriber went away during delivery");
            }
        }
        delivered
    }

    /// Drop every subscriber of `topic`, ending their streams
    pub fn close_topic(&self, topic: &Topic) {
        self.registry.topics.remove(topic.as_str());
    }

    /// Number of live subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.registry
            .topics
            .get(topic.as_str())
            .map(|entry| entry.value().len())
            .unwrap_or(0)
    }

    /// Names of topics that currently have subscribers
    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .registry
            .topics
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        topics.sort();
        topics
    }

    /// Total subscriptions ever opened
    pub fn subscriptions_opened(&self) -> usize {
        self.registry.opened.load(Ordering::SeqCst)
    }

    /// Total subscriptions released, by unsubscribe or drop
    pub fn subscriptions_released(&self) -> usize {
        self.registry.released.load(Ordering::SeqCst)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn subscribe(&self, topic: &Topic) -> Result<Box<dyn Subscription>, BrokerError> {
        let (tx, rx) = mpsc::channel(self.registry.capacity);
        let id = Uuid::new_v4();

        self.registry
            .topics
            .entry(topic.as_str().to_string())
            .or_default()
            .push((id, tx));
        self.registry.opened.fetch_add(1, Ordering::SeqCst);

        debug!(topic = %topic, subscription_id = %id, "Memory subscription opened");

        Ok(Box::new(MemorySubscription {
            id,
            topic: topic.clone(),
            rx,
            registry: self.registry.clone(),
            released: false,
        }))
    }

    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.deliver(topic, payload).await;
        Ok(())
    }
}

struct MemorySubscription {
    id: Uuid,
    topic: Topic,
    rx: mpsc::Receiver<Vec<u8>>,
    registry: Arc<Registry>,
    released: bool,
}

impl MemorySubscription {
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.rx.close();
        self.registry.remove(self.topic.as_str(), self.id);
        debug!(topic = %self.topic, subscription_id = %self.id, "Memory subscription released");
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn topic(&self) -> &Topic {
        &self.topic
    }

    async fn next_payload(&mut self) -> Result<Option<Vec<u8>>, BrokerError> {
        if self.released {
            return Ok(None);
        }
        Ok(self.rx.recv().await)
    }

    async fn unsubscribe(&mut self) -> Result<(), BrokerError> {
        self.release();
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.release();
    }
}
