//! Process configuration
//!
//! Values come from CLI flags or the environment (see the binary); this
//! module validates them once at startup. Every error here is fatal.

use crate::auth::VerificationSecret;
use crate::channels::Topic;
use crate::server::GatewaySettings;
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("JWT_SECRET must be set and non-empty")]
    MissingSecret,

    #[error("invalid bind address '{0}'")]
    InvalidBindAddr(String),

    #[error("invalid topic prefix '{prefix}': {reason}")]
    InvalidTopicPrefix { prefix: String, reason: String },

    #[error("queue capacity must be greater than zero")]
    ZeroQueueCapacity,
}

/// Observer server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// NATS server URL
    pub nats_url: String,
    /// Shared secret for verifying client tokens
    pub jwt_secret: Vec<u8>,
    /// Per-session settings
    pub gateway: GatewaySettings,
}

impl ServerConfig {
    pub fn new(
        bind: &str,
        nats_url: impl Into<String>,
        jwt_secret: impl Into<Vec<u8>>,
        topic_prefix: impl Into<String>,
        queue_capacity: usize,
    ) -> Result<Self, ConfigError> {
        let bind_addr = bind
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddr(bind.to_string()))?;

        let jwt_secret = jwt_secret.into();
        if jwt_secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }

        let topic_prefix = topic_prefix.into();
        validate_topic_prefix(&topic_prefix)?;

        if queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }

        Ok(Self {
            bind_addr,
            nats_url: nats_url.into(),
            jwt_secret,
            gateway: GatewaySettings {
                topic_prefix,
                queue_capacity,
            },
        })
    }

    /// The verification secret for the gateway
    pub fn secret(&self) -> Result<VerificationSecret, ConfigError> {
        VerificationSecret::new(&self.jwt_secret).map_err(|_| ConfigError::MissingSecret)
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("nats_url", &self.nats_url)
            .field("jwt_secret", &"[REDACTED]")
            .field("gateway", &self.gateway)
            .finish()
    }
}

fn validate_topic_prefix(prefix: &str) -> Result<(), ConfigError> {
    if prefix.is_empty() || prefix.contains('.') {
        return Err(ConfigError::InvalidTopicPrefix {
            prefix: prefix.to_string(),
            reason: "must be a single non-empty segment".to_string(),
        });
    }

    Topic::solutions(prefix, 0)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidTopicPrefix {
            prefix: prefix.to_string(),
            reason: e.to_string(),
        })
}
