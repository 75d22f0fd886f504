//! Observer CLI entry point

mod cli;

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};
use clap::Parser;
use observer::auth::{issue, ClaimSet, Role, VerificationSecret};
use observer::broker::{Broker, NatsBroker};
use observer::channels::Topic;
use observer::config::ServerConfig;
use observer::events;
use observer::server::Gateway;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let secret = cli.jwt_secret.clone().unwrap_or_default();

    match cli.command {
        Commands::Serve { bind, queue_capacity } => {
            let config = ServerConfig::new(&bind, cli.nats_url, secret, cli.topic_prefix, queue_capacity)
                .context("Invalid configuration")?;
            serve(config).await
        }
        Commands::Token { user_id, contest_id, role, ttl_secs } => {
            token(&secret, user_id, contest_id, &role, ttl_secs)
        }
        Commands::Publish { file } => publish(&cli.nats_url, &cli.topic_prefix, file).await,
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    info!(config = ?config, "Starting observer");

    let secret = config.secret()?;
    let broker = NatsBroker::connect(&config.nats_url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats_url))?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

    let gateway = Gateway::new(Arc::new(broker), secret, config.gateway.clone());
    gateway.serve(listener, shutdown_signal()).await?;

    info!("Observer stopped");
    Ok(())
}

fn token(secret: &str, user_id: i32, contest_id: i32, role: &str, ttl_secs: Option<u64>) -> Result<()> {
    let secret = VerificationSecret::new(secret.as_bytes())
        .context("JWT_SECRET or --jwt-secret required to create tokens")?;
    let role = Role::parse(role).ok_or_else(|| anyhow::anyhow!("Invalid role: {}", role))?;

    let claims = ClaimSet::new(user_id, contest_id, role);
    let token = issue(&claims, &secret, ttl_secs.map(Duration::from_secs))?;

    println!("{}", token);
    println!();
    println!("User: {}", user_id);
    println!("Contest: {}", contest_id);
    println!("Role: {}", role);
    match ttl_secs {
        Some(ttl) => println!("Expires in: {}s", ttl),
        None => println!("Expires: never"),
    }

    Ok(())
}

async fn publish(nats_url: &str, topic_prefix: &str, file: Option<PathBuf>) -> Result<()> {
    let raw = match &file {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("Failed to read envelope: {}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf).context("Failed to read stdin")?;
            buf
        }
    };

    // Validate before it reaches any session
    let envelope = events::decode(&raw).context("Envelope is not a valid solution update")?;
    let topic = Topic::solutions(topic_prefix, envelope.solution.contest_id)
        .context("Invalid topic prefix")?;

    let broker = NatsBroker::connect(nats_url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", nats_url))?;
    broker.publish(&topic, events::encode(&envelope)?).await?;
    broker.flush().await?;

    println!("Published {} for solution {} on {}", envelope.message_type, envelope.solution.id, topic);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping server");
}
