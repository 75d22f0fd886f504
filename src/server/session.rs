//! Per-connection relay session
//!
//! Lifecycle: `Authenticating → Subscribing → Relaying → Closed`.
//!
//! While relaying, a pump task moves broker payloads into a bounded
//! [`EventQueue`] and the delivery loop decodes, filters and writes them to the
//! client, reading the client stream only to notice it going away. Whichever
//! side ends first tears down the other: the pump stops and unsubscribes, the
//! client sink is closed.

use crate::auth::{self, AuthError, ClaimSet, VerificationSecret};
use crate::broker::{Broker, BrokerError, Subscription};
use crate::channels::{Topic, TopicError};
use crate::events;
use crate::server::queue::EventQueue;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors on the client connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("write to client failed: {0}")]
    Write(String),

    #[error("read from client failed: {0}")]
    Read(String),
}

/// Errors that end a session before it relays anything
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("invalid topic: {0}")]
    Topic(#[from] TopicError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("session is {0}, expected {1}")]
    InvalidState(SessionState, SessionState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticating,
    Subscribing,
    Relaying,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Authenticating => write!(f, "authenticating"),
            SessionState::Subscribing => write!(f, "subscribing"),
            SessionState::Relaying => write!(f, "relaying"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Why a relaying session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame or the stream ended
    ClientClosed,
    Transport(TransportError),
    /// Broker ended the subscription
    BrokerClosed,
    BrokerError(String),
    /// The pump task panicked or was cancelled
    PumpFailed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientClosed => write!(f, "client closed"),
            CloseReason::Transport(e) => write!(f, "{}", e),
            CloseReason::BrokerClosed => write!(f, "broker closed subscription"),
            CloseReason::BrokerError(e) => write!(f, "broker error: {}", e),
            CloseReason::PumpFailed(e) => write!(f, "pump failed: {}", e),
        }
    }
}

/// Summary of a finished session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub topic: Topic,
    pub reason: CloseReason,
    /// Events written to the client
    pub delivered: u64,
    /// Events denied by the access policy
    pub suppressed: u64,
    /// Payloads that failed to decode
    pub malformed: u64,
    /// Payloads evicted because the client fell behind
    pub dropped: u64,
}

/// How the pump task ended
enum PumpExit {
    Stopped,
    BrokerClosed,
    BrokerError(BrokerError),
}

/// Aborts the pump if the session future is dropped mid-flight
struct PumpHandle(JoinHandle<PumpExit>);

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// State of one client connection
pub struct RelaySession {
    id: Uuid,
    /// Set once authenticated
    claims: Option<ClaimSet>,
    topic: Option<Topic>,
    state: SessionState,
    queue_capacity: usize,
    delivered: u64,
    suppressed: u64,
    malformed: u64,
}

impl RelaySession {
    /// A fresh session waiting for its token
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            claims: None,
            topic: None,
            state: SessionState::Authenticating,
            queue_capacity,
            delivered: 0,
            suppressed: 0,
            malformed: 0,
        }
    }

    /// Verify the presented token; on success the session is ready to subscribe
    ///
    /// A rejected token closes the session.
    pub fn authenticate(
        &mut self,
        token: &str,
        secret: &VerificationSecret,
    ) -> Result<&ClaimSet, SessionError> {
        if self.state != SessionState::Authenticating {
            return Err(SessionError::InvalidState(self.state, SessionState::Authenticating));
        }

        match auth::verify(token, secret) {
            Ok(claims) => {
                self.state = SessionState::Subscribing;
                Ok(self.claims.insert(claims))
            }
            Err(e) => {
                self.abort();
                Err(e.into())
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Verified claims, once authenticated
    pub fn claims(&self) -> Option<&ClaimSet> {
        self.claims.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Topic derived from the claims, once subscribed
    pub fn topic(&self) -> Option<&Topic> {
        self.topic.as_ref()
    }

    /// Open the broker subscription for the claims' contest
    pub async fn subscribe(
        &mut self,
        broker: &dyn Broker,
        topic_prefix: &str,
    ) -> Result<Box<dyn Subscription>, SessionError> {
        let scope_id = match (&self.claims, self.state) {
            (Some(claims), SessionState::Subscribing) => claims.scope_id,
            _ => return Err(SessionError::InvalidState(self.state, SessionState::Subscribing)),
        };

        let topic = match Topic::solutions(topic_prefix, scope_id) {
            Ok(topic) => topic,
            Err(e) => {
                self.abort();
                return Err(e.into());
            }
        };

        match broker.subscribe(&topic).await {
            Ok(subscription) => {
                debug!(session_id = %self.id, topic = %topic, "Subscribed");
                self.topic = Some(topic);
                Ok(subscription)
            }
            Err(e) => {
                warn!(session_id = %self.id, topic = %topic, error = %e, "Subscribe failed");
                self.abort();
                Err(e.into())
            }
        }
    }

    /// Mark the session closed before it ever relayed
    ///
    /// Holds no resources at that point; a subscription already handed out
    /// is released by its owner.
    pub fn abort(&mut self) {
        if self.state != SessionState::Closed {
            debug!(session_id = %self.id, from = %self.state, "Session aborted");
            self.state = SessionState::Closed;
        }
    }

    /// Relay events until either side ends, then release both
    ///
    /// Only a subscribed session can relay; otherwise the subscription is
    /// dropped (and so released) and nothing is written to the client.
    pub async fn relay<Si, St, E>(
        mut self,
        subscription: Box<dyn Subscription>,
        mut sink: Si,
        mut stream: St,
    ) -> Result<SessionReport, SessionError>
    where
        Si: Sink<Message> + Unpin + Send,
        Si::Error: fmt::Display + Send,
        St: Stream<Item = Result<Message, E>> + Unpin + Send,
        E: fmt::Display + Send,
    {
        let claims = match (&self.claims, &self.topic, self.state) {
            (Some(claims), Some(_), SessionState::Subscribing) => claims.clone(),
            _ => return Err(SessionError::InvalidState(self.state, SessionState::Subscribing)),
        };

        let topic = subscription.topic().clone();
        self.state = SessionState::Relaying;

        info!(
            session_id = %self.id,
            topic = %topic,
            user_id = claims.subject_id,
            contest_id = claims.scope_id,
            role = %claims.role,
            "Relay session started"
        );

        let queue = Arc::new(EventQueue::new(self.queue_capacity));
        let (stop_tx, stop_rx) = oneshot::channel();
        let mut pump = PumpHandle(tokio::spawn(pump(subscription, queue.clone(), stop_rx)));

        // `None` means the queue ended and the pump knows why
        let client_reason = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    None | Some(Ok(Message::Close(_))) => break Some(CloseReason::ClientClosed),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break Some(CloseReason::Transport(TransportError::Read(e.to_string())))
                    }
                },
                payload = queue.pop() => match payload {
                    Some(payload) => {
                        if let Err(reason) = self.forward(&claims, &payload, &mut sink).await {
                            break Some(reason);
                        }
                    }
                    None => break None,
                },
            }
        };

        // Closed: stop the pump (it unsubscribes), then close the client side.
        self.state = SessionState::Closed;
        let _ = stop_tx.send(());
        queue.close();

        let pump_reason = match (&mut pump.0).await {
            Ok(PumpExit::Stopped) => None,
            Ok(PumpExit::BrokerClosed) => Some(CloseReason::BrokerClosed),
            Ok(PumpExit::BrokerError(e)) => Some(CloseReason::BrokerError(e.to_string())),
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Pump task failed");
                Some(CloseReason::PumpFailed(e.to_string()))
            }
        };

        if let Err(e) = sink.close().await {
            debug!(session_id = %self.id, error = %e, "Client connection already gone");
        }

        let reason = client_reason
            .or(pump_reason)
            .unwrap_or(CloseReason::BrokerClosed);

        let report = SessionReport {
            session_id: self.id,
            topic,
            reason,
            delivered: self.delivered,
            suppressed: self.suppressed,
            malformed: self.malformed,
            dropped: queue.dropped(),
        };

        info!(
            session_id = %report.session_id,
            topic = %report.topic,
            reason = %report.reason,
            delivered = report.delivered,
            suppressed = report.suppressed,
            malformed = report.malformed,
            dropped = report.dropped,
            "Relay session closed"
        );

        Ok(report)
    }

    /// Decode, authorize and write one payload
    ///
    /// Only a failed write ends the session.
    async fn forward<Si>(
        &mut self,
        claims: &ClaimSet,
        payload: &[u8],
        sink: &mut Si,
    ) -> Result<(), CloseReason>
    where
        Si: Sink<Message> + Unpin,
        Si::Error: fmt::Display,
    {
        let envelope = match events::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.malformed += 1;
                warn!(session_id = %self.id, error = %e, "Dropping malformed event");
                return Ok(());
            }
        };

        if !auth::permits(claims, &envelope) {
            self.suppressed += 1;
            debug!(
                session_id = %self.id,
                solution_id = envelope.solution.id,
                owner_id = envelope.solution.user_id,
                "Event not visible to client"
            );
            return Ok(());
        }

        let text = match events::encode_text(&envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Failed to encode event");
                return Ok(());
            }
        };

        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| CloseReason::Transport(TransportError::Write(e.to_string())))?;

        self.delivered += 1;
        Ok(())
    }
}

/// Move broker payloads into the queue until stopped or the broker ends
async fn pump(
    mut subscription: Box<dyn Subscription>,
    queue: Arc<EventQueue>,
    mut stop: oneshot::Receiver<()>,
) -> PumpExit {
    let exit = loop {
        tokio::select! {
            _ = &mut stop => break PumpExit::Stopped,
            next = subscription.next_payload() => match next {
                Ok(Some(payload)) => {
                    if !queue.push(payload) {
                        break PumpExit::Stopped;
                    }
                }
                Ok(None) => break PumpExit::BrokerClosed,
                Err(e) => break PumpExit::BrokerError(e),
            },
        }
    };

    queue.close();

    if let Err(e) = subscription.unsubscribe().await {
        warn!(topic = %subscription.topic(), error = %e, "Unsubscribe failed");
    }

    exit
}
