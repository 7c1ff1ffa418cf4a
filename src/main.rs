use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::prelude::*;

use chat_relay::config::{Args, ServerConfig};
use chat_relay::server;
use chat_relay::state::ServerState;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_directive = if args.debug {
        "chat_relay=debug,info"
    } else {
        "chat_relay=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let state = ServerState::new(ServerConfig::from(&args));

    let signal_state = state.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            signal_state.shutdown();
        }
    });

    server::run(state).await
}
