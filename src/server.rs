use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::protocol;
use crate::registry::Admission;
use crate::state::ServerState;

// Pause after a failed accept (e.g. out of file descriptors) before retrying.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub async fn run(state: ServerState) -> Result<()> {
    let addr = state.config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind on {addr}"))?;

    info!(
        addr = %listener.local_addr()?,
        max_clients = state.registry.capacity(),
        "listening"
    );

    serve(listener, state).await
}

/// Accepts until shutdown. Admission is decided here, before any protocol
/// traffic; a full server answers and closes without spawning anything.
pub async fn serve(listener: TcpListener, state: ServerState) -> Result<()> {
    let shutdown = state.shutdown_token();

    loop {
        let (socket, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };

        let id = match state.registry.try_admit() {
            Admission::Admitted(id) => id,
            Admission::Full => {
                reject_full(&socket, peer);
                continue;
            }
        };

        debug!(session = %id, %peer, "admitted");

        let state = state.clone();
        tokio::spawn(async move {
            let (reader, writer) = socket.into_split();
            match crate::conn::handle(state, id, reader, writer, peer).await {
                Ok(()) => debug!(session = %id, %peer, "session ended"),
                Err(err) if err.is_protocol() => {
                    info!(session = %id, %peer, reason = %err, "session rejected")
                }
                Err(err) => debug!(session = %id, %peer, reason = %err, "session closed"),
            }
        });
    }

    drop(listener);
    info!("listener stopped");
    Ok(())
}

// Best effort and non-blocking; the listener never waits on one peer.
fn reject_full(socket: &TcpStream, peer: SocketAddr) {
    let _ = socket.try_write(format!("{}\n", protocol::SERVER_FULL).as_bytes());
    info!(%peer, "server full, connection refused");
}
