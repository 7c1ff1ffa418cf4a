//! Terminal client for the chat relay.
//!
//! Usage: chat-client <host> <port>

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use chat_relay::codec::MAX_FRAME_LEN;
use chat_relay::protocol::{self, Command};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Parser)]
#[command(name = "chat-client", about = "Connect to a chat relay")]
struct Args {
    /// Server host name or address
    host: String,

    /// Server port
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let stream = connect(&args.host, args.port).await?;
    let (reader, mut writer) = stream.into_split();

    writer
        .write_all(format!("{}\n", protocol::HANDSHAKE_TOKEN).as_bytes())
        .await
        .context("failed to send handshake")?;
    println!("Connected to the server!");

    let mut incoming = tokio::spawn(print_incoming(reader));
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = &mut incoming => break,
            line = stdin.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(problem) = local_rejection(line) {
                    println!("{problem}");
                    continue;
                }
                writer
                    .write_all(format!("{line}\n").as_bytes())
                    .await
                    .context("failed to send message")?;
            }
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

// What the server would refuse anyway, caught before sending.
fn local_rejection(line: &str) -> Option<String> {
    if line.len() > MAX_FRAME_LEN {
        return Some(protocol::too_long());
    }
    match protocol::parse_command(line) {
        Command::Malformed(usage) => Some(usage.to_string()),
        _ => None,
    }
}

async fn connect(host: &str, port: u16) -> Result<TcpStream> {
    for attempt in 1..=MAX_ATTEMPTS {
        match timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(err)) => warn!(%host, port, attempt, error = %err, "unable to connect"),
            Err(_) => warn!(%host, port, attempt, "connect timed out"),
        }

        if attempt < MAX_ATTEMPTS {
            println!("Retrying in {}s... (attempt {attempt}/{MAX_ATTEMPTS})", RECONNECT_DELAY.as_secs());
            sleep(RECONNECT_DELAY).await;
        }
    }

    bail!("could not reach {host}:{port} after {MAX_ATTEMPTS} attempts")
}

// Copies raw bytes so the name prompt shows before its newline arrives.
async fn print_incoming(mut reader: OwnedReadHalf) {
    let mut stdout = tokio::io::stdout();
    match tokio::io::copy(&mut reader, &mut stdout).await {
        Ok(bytes) => {
            debug!(bytes, "server stream ended");
            println!("\nServer closed the connection");
        }
        Err(err) => println!("\nConnection error: {err}"),
    }
}
