//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "observer")]
#[command(about = "Live contest solution feed over WebSocket", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Token signing/verification secret
    #[arg(long, env = "JWT_SECRET", global = true, hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// NATS server URL
    #[arg(long, env = "NATS_URL", global = true, default_value = "nats://localhost:4222")]
    pub nats_url: String,

    /// First segment of solution topics (`<prefix>-<contest>-solutions`)
    #[arg(long, env = "OBSERVER_TOPIC_PREFIX", global = true, default_value = "scope")]
    pub topic_prefix: String,

    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the WebSocket gateway
    Serve {
        /// Address to bind to
        #[arg(short, long, env = "OBSERVER_BIND", default_value = "0.0.0.0:13400")]
        bind: String,

        /// Undelivered events kept per session before the oldest is dropped
        #[arg(long, env = "OBSERVER_QUEUE_CAPACITY", default_value_t = 256)]
        queue_capacity: usize,
    },

    /// Mint a client token (development)
    ///
    /// Examples:
    ///   observer token --user-id 5 --contest-id 7 --role student
    ///   observer token --user-id 1 --contest-id 7 --role teacher --ttl-secs 3600
    Token {
        #[arg(long)]
        user_id: i32,

        #[arg(long)]
        contest_id: i32,

        /// guest, student, teacher, admin, or a numeric code
        #[arg(long, value_parser = parse_role, default_value = "student")]
        role: String,

        /// Lifetime in seconds; omit for a token without expiry
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Publish a solution update envelope (development)
    ///
    /// Reads JSON from FILE, or stdin when omitted, and publishes it on the
    /// topic of the envelope's contest.
    Publish {
        /// Envelope JSON file
        file: Option<PathBuf>,
    },
}

fn parse_role(s: &str) -> Result<String, String> {
    match observer::Role::parse(s) {
        Some(_) => Ok(s.to_string()),
        None => Err(format!(
            "Invalid role: {}. Must be guest, student, teacher, admin, or a number",
            s
        )),
    }
}
