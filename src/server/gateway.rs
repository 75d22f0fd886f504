//! HTTP entry point
//!
//! `GET /solutions?token=<jwt>` verifies the token before anything else,
//! subscribes to the caller's contest topic, then upgrades to a WebSocket and
//! hands both ends to a [`RelaySession`].

use crate::auth::VerificationSecret;
use crate::broker::Broker;
use crate::channels::DEFAULT_TOPIC_PREFIX;
use crate::server::session::{RelaySession, SessionError};

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::StreamExt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Default bound on undelivered events per session
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Per-session tuning shared by every connection
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// First segment of `<prefix>-<contest id>-solutions`
    pub topic_prefix: String,
    /// Undelivered events a session keeps before evicting the oldest
    pub queue_capacity: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

struct GatewayInner {
    broker: Arc<dyn Broker>,
    secret: VerificationSecret,
    settings: GatewaySettings,
    active_sessions: AtomicUsize,
}

/// Process-wide handles, read-only after construction
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

/// Decrements the live session count however the session ends
struct ActiveSession(Arc<GatewayInner>);

impl ActiveSession {
    fn enter(inner: Arc<GatewayInner>) -> Self {
        inner.active_sessions.fetch_add(1, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.0.active_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// First `token` query parameter, empty when absent
fn token_param(pairs: &[(String, String)]) -> &str {
    pairs
        .iter()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.as_str())
        .unwrap_or_default()
}

impl Gateway {
    pub fn new(broker: Arc<dyn Broker>, secret: VerificationSecret, settings: GatewaySettings) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                broker,
                secret,
                settings,
                active_sessions: AtomicUsize::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.inner.settings
    }

    /// Sessions currently relaying
    pub fn active_sessions(&self) -> usize {
        self.inner.active_sessions.load(Ordering::SeqCst)
    }

    /// Build the HTTP router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/solutions", get(solutions_handler))
            .route("/health", get(health_handler))
            .with_state(self.clone())
    }

    /// Serve until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Gateway listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn solutions_handler(
    State(gateway): State<Gateway>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let inner = &gateway.inner;
    let mut session = RelaySession::new(inner.settings.queue_capacity);

    let pairs = match query {
        Ok(Query(pairs)) => pairs,
        Err(rejection) => {
            warn!(session_id = %session.id(), error = %rejection, "Rejected connection");
            session.abort();
            return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
        }
    };

    let authenticated = session
        .authenticate(token_param(&pairs), &inner.secret)
        .map(|_| ());
    if let Err(e) = authenticated {
        warn!(session_id = %session.id(), error = ?e, "Rejected connection");
        return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
    }

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            session.abort();
            return rejection.into_response();
        }
    };

    let subscription = match session
        .subscribe(inner.broker.as_ref(), &inner.settings.topic_prefix)
        .await
    {
        Ok(subscription) => subscription,
        Err(e @ SessionError::Broker(_)) => {
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
        Err(e) => {
            error!(session_id = %session.id(), error = %e, "Cannot start session");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let session_id = session.id();
    let active = gateway.inner.clone();

    // A failed upgrade drops the closure, and with it the subscription.
    upgrade
        .on_failed_upgrade(move |e: axum::Error| {
            warn!(session_id = %session_id, error = %e, "WebSocket upgrade failed, subscription released");
        })
        .on_upgrade(move |socket| async move {
            let _active = ActiveSession::enter(active);
            let (sink, stream) = socket.split();
            if let Err(e) = session.relay(subscription, sink, stream).await {
                error!(session_id = %session_id, error = %e, "Relay refused");
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{issue, ClaimSet, Role};
    use crate::broker::{async_trait, BrokerError, MemoryBroker, Subscription};
    use crate::channels::Topic;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const SECRET: &[u8] = b"gateway-test-secret";

    fn gateway(broker: MemoryBroker) -> Gateway {
        Gateway::new(
            Arc::new(broker),
            VerificationSecret::new(SECRET).unwrap(),
            GatewaySettings::default(),
        )
    }

    fn token(claims: ClaimSet) -> String {
        issue(&claims, &VerificationSecret::new(SECRET).unwrap(), None).unwrap()
    }

    /// Request carrying upgrade headers but no connection to take over
    fn upgrade_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap()
    }

    /// Broker that refuses every subscription
    #[derive(Default)]
    struct UnavailableBroker {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Broker for UnavailableBroker {
        async fn subscribe(&self, topic: &Topic) -> Result<Box<dyn Subscription>, BrokerError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(BrokerError::Subscribe {
                topic: topic.to_string(),
                reason: "connection refused".to_string(),
            })
        }

        async fn publish(&self, topic: &Topic, _payload: Vec<u8>) -> Result<(), BrokerError> {
            Err(BrokerError::Publish {
                topic: topic.to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = gateway(MemoryBroker::new()).router();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "ok");
    }

    #[tokio::test]
    async fn test_missing_token_unauthorized() {
        let broker = MemoryBroker::new();
        let app = gateway(broker.clone()).router();

        for uri in ["/solutions", "/solutions?token="] {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let resp = app.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(body_text(resp).await, "missing token");
        }
        assert_eq!(broker.subscriptions_opened(), 0);
    }

    #[tokio::test]
    async fn test_invalid_token_unauthorized() {
        let broker = MemoryBroker::new();
        let app = gateway(broker.clone()).router();

        let req = Request::builder()
            .uri("/solutions?token=not.a.jwt")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(resp).await, "invalid token");
        assert_eq!(broker.subscriptions_opened(), 0);
    }

    #[tokio::test]
    async fn test_valid_token_without_upgrade_rejected_without_subscribing() {
        let broker = MemoryBroker::new();
        let app = gateway(broker.clone()).router();
        let token = token(ClaimSet::new(5, 7, Role::Student));

        let req = Request::builder()
            .uri(format!("/solutions?token={}", token))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert!(resp.status().is_client_error());
        assert_ne!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(broker.subscriptions_opened(), 0);
    }

    #[tokio::test]
    async fn test_unupgradable_connection_holds_no_subscription() {
        let broker = MemoryBroker::new();
        let app = gateway(broker.clone()).router();
        let token = token(ClaimSet::new(5, 7, Role::Teacher));

        let resp = app
            .oneshot(upgrade_request(&format!("/solutions?token={}", token)))
            .await
            .unwrap();

        assert_ne!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_ne!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(broker.subscriptions_released(), broker.subscriptions_opened());
        assert!(broker.active_topics().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_token_param_uses_first() {
        let broker = MemoryBroker::new();
        let app = gateway(broker.clone()).router();
        let valid = token(ClaimSet::new(5, 7, Role::Student));

        let req = Request::builder()
            .uri("/solutions?token=a&token=b")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(resp).await, "invalid token");

        // A valid first token passes verification; the second is ignored
        let req = Request::builder()
            .uri(format!("/solutions?token={}&token=junk", valid))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_ne!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.status().is_client_error());
    }

    #[test]
    fn test_token_param() {
        let pairs = vec![
            ("other".to_string(), "x".to_string()),
            ("token".to_string(), "first".to_string()),
            ("token".to_string(), "second".to_string()),
        ];
        assert_eq!(token_param(&pairs), "first");
        assert_eq!(token_param(&[]), "");
    }

    #[tokio::test]
    async fn test_broker_unavailable_rejects_upgrade() {
        let broker = Arc::new(UnavailableBroker::default());
        let gateway = Gateway::new(
            broker.clone(),
            VerificationSecret::new(SECRET).unwrap(),
            GatewaySettings::default(),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(gateway.clone().serve(listener, std::future::pending()));

        let url = format!(
            "ws://{}/solutions?token={}",
            addr,
            token(ClaimSet::new(5, 7, Role::Student))
        );
        match tokio_tungstenite::connect_async(url).await {
            Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => {
                assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE)
            }
            other => panic!("expected HTTP rejection, got {:?}", other.map(|_| ())),
        }

        assert_eq!(broker.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.active_sessions(), 0);
    }

    #[test]
    fn test_default_settings() {
        let settings = GatewaySettings::default();
        assert_eq!(settings.topic_prefix, "scope");
        assert_eq!(settings.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }
}
