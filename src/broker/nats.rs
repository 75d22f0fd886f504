//! NATS broker backend

use crate::broker::{Broker, BrokerError, Subscription};
use crate::channels::Topic;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};

/// Broker backed by a shared NATS client connection
#[derive(Clone)]
pub struct NatsBroker {
    client: async_nats::Client,
}

impl NatsBroker {
    /// Connect to a NATS server, e.g. `nats://localhost:4222`
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        info!(url = url, "Connected to NATS");

        Ok(Self { client })
    }

    /// Flush pending publishes to the server
    pub async fn flush(&self) -> Result<(), BrokerError> {
        self.client
            .flush()
            .await
            .map_err(|e| BrokerError::Flush(e.to_string()))
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn subscribe(&self, topic: &Topic) -> Result<Box<dyn Subscription>, BrokerError> {
        let subscriber = self
            .client
            .subscribe(topic.as_str().to_string())
            .await
            .map_err(|e| BrokerError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        debug!(topic = %topic, "NATS subscription opened");

        Ok(Box::new(NatsSubscription {
            topic: topic.clone(),
            subscriber: Some(subscriber),
        }))
    }

    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.client
            .publish(topic.as_str().to_string(), payload.into())
            .await
            .map_err(|e| BrokerError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

struct NatsSubscription {
    topic: Topic,
    /// `None` once unsubscribed
    subscriber: Option<async_nats::Subscriber>,
}

#[async_trait]
impl Subscription for NatsSubscription {
    fn topic(&self) -> &Topic {
        &self.topic
    }

    async fn next_payload(&mut self) -> Result<Option<Vec<u8>>, BrokerError> {
        match self.subscriber.as_mut() {
            Some(subscriber) => Ok(subscriber.next().await.map(|msg| msg.payload.to_vec())),
            None => Ok(None),
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), BrokerError> {
        if let Some(mut subscriber) = self.subscriber.take() {
            subscriber
                .unsubscribe()
                .await
                .map_err(|e| BrokerError::Unsubscribe {
                    topic: self.topic.to_string(),
                    reason: e.to_string(),
                })?;
            debug!(topic = %self.topic, "NATS subscription released");
        }
        Ok(())
    }
}
