//! Per-session outbound queue; its writer task is the only socket writer.

use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

/// Enqueue failed: the queue is full (slow peer) or the writer is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("peer outbox unavailable")]
pub struct Undeliverable;

/// Sending side of a session's outbox plus its eviction switch.
#[derive(Debug, Clone)]
pub struct Link {
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

pub fn channel(capacity: usize, cancel: CancellationToken) -> (Link, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Link { tx, cancel }, rx)
}

impl Link {
    /// Queues one newline-terminated line.
    pub fn line(&self, text: impl AsRef<str>) -> Result<(), Undeliverable> {
        self.raw(format!("{}\n", text.as_ref()))
    }

    /// Queues text as-is.
    pub fn raw(&self, text: String) -> Result<(), Undeliverable> {
        if self.cancel.is_cancelled() {
            return Err(Undeliverable);
        }
        self.tx.try_send(text).map_err(|_| Undeliverable)
    }

    /// Tears the session down from the outside. Its handler notices through
    /// [`Link::cancelled`].
    pub fn evict(&self) {
        self.cancel.cancel();
    }

    pub fn is_evicted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

/// Drains `rx` into `writer` until every [`Link`] is dropped or the session
/// is cancelled. A failed or stalled write cancels the session.
pub fn spawn_writer<W>(
    writer: W,
    rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
    write_timeout: Duration,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(run_writer(writer, rx, cancel, write_timeout))
}

async fn run_writer<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
    write_timeout: Duration,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            chunk = rx.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
        };

        match timeout(write_timeout, writer.write_all(chunk.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(error = %err, "write to peer failed");
                cancel.cancel();
                break;
            }
            Err(_) => {
                debug!(?write_timeout, "write to peer timed out");
                cancel.cancel();
                break;
            }
        }
    }

    let _ = timeout(write_timeout, writer.shutdown()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn writes_in_order_then_closes() {
        let (client, server) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();
        let (link, rx) = channel(8, cancel.clone());
        let writer = spawn_writer(server, rx, cancel.clone(), Duration::from_secs(1));

        link.raw("prompt: ".into()).unwrap();
        link.line("one").unwrap();
        link.line("two").unwrap();
        drop(link);
        writer.await.unwrap();

        let mut out = String::new();
        let mut client = client;
        client.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "prompt: one\ntwo\n");
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn full_queue_is_undeliverable() {
        let (link, _rx) = channel(1, CancellationToken::new());
        link.line("fits").unwrap();
        assert_eq!(link.line("overflow"), Err(Undeliverable));
    }

    #[test]
    fn evicted_link_refuses_sends() {
        let (link, _rx) = channel(4, CancellationToken::new());
        link.evict();
        assert!(link.is_evicted());
        assert_eq!(link.line("late"), Err(Undeliverable));
    }

    #[tokio::test]
    async fn failed_write_cancels_session() {
        let (client, server) = tokio::io::duplex(16);
        drop(client);

        let cancel = CancellationToken::new();
        let (link, rx) = channel(8, cancel.clone());
        let writer = spawn_writer(server, rx, cancel.clone(), Duration::from_secs(1));

        link.line("nobody is listening").unwrap();
        writer.await.unwrap();
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn stalled_peer_times_out() {
        // Nobody reads the client side and the line exceeds the pipe buffer.
        let (_client, server) = tokio::io::duplex(4);
        let cancel = CancellationToken::new();
        let (link, rx) = channel(8, cancel.clone());
        let writer = spawn_writer(server, rx, cancel.clone(), Duration::from_millis(50));

        link.line("more than four bytes").unwrap();
        writer.await.unwrap();
        assert!(cancel.is_cancelled());
    }
}
