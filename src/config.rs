//! Command line and runtime configuration.

use std::time::Duration;

use clap::Parser;

pub const DEFAULT_PORT: u16 = 8989;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_MAX_CLIENTS: usize = 10;

#[derive(Debug, Parser)]
#[command(name = "chat-relay")]
#[command(about = "Line-oriented TCP chat relay", version)]
pub struct Args {
    /// Port to listen on
    #[arg(default_value_t = DEFAULT_PORT, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Maximum concurrent sessions, including ones still handshaking
    #[arg(long, default_value_t = DEFAULT_MAX_CLIENTS, value_parser = positive)]
    pub max_clients: usize,

    /// Seconds a new connection may take to send the handshake and its name
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub handshake_timeout_secs: u64,

    /// Seconds a single write to a peer may stall before the peer is dropped
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub write_timeout_secs: u64,

    /// Lines queued per peer before it counts as too slow
    #[arg(long, default_value_t = 256, value_parser = positive)]
    pub outbox_capacity: usize,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

fn positive(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_clients: usize,
    pub handshake_timeout: Duration,
    pub write_timeout: Duration,
    pub outbox_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            handshake_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            outbox_capacity: 256,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&Args> for ServerConfig {
    fn from(args: &Args) -> Self {
        Self {
            host: args.host.clone(),
            port: args.port,
            max_clients: args.max_clients,
            handshake_timeout: Duration::from_secs(args.handshake_timeout_secs),
            write_timeout: Duration::from_secs(args.write_timeout_secs),
            outbox_capacity: args.outbox_capacity,
        }
    }
}
