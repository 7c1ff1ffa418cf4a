use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use chat_relay::codec::{Frame, FrameReader, MAX_FRAME_LEN};
use chat_relay::config::ServerConfig;
use chat_relay::protocol;
use chat_relay::server;
use chat_relay::state::ServerState;

const WAIT: Duration = Duration::from_secs(3);

struct Client {
    frames: FrameReader<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, writer) = stream.into_split();
        Self {
            frames: FrameReader::new(BufReader::new(reader)),
            writer,
        }
    }

    async fn join(addr: SocketAddr, name: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.send(protocol::HANDSHAKE_TOKEN).await;
        client.send(name).await;
        client.expect(&protocol::welcome(name)).await;
        client
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("send");
    }

    async fn next(&mut self) -> Frame {
        timeout(WAIT, self.frames.next_frame())
            .await
            .expect("timed out waiting for the server")
    }

    async fn next_line(&mut self) -> String {
        match self.next().await {
            Frame::Line(line) => line,
            other => panic!("expected a line, got {other:?}"),
        }
    }

    async fn expect(&mut self, needle: &str) -> String {
        loop {
            let line = self.next_line().await;
            if line.contains(needle) {
                return line;
            }
        }
    }
}

async fn start(max_clients: usize) -> (SocketAddr, ServerState, JoinHandle<anyhow::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = ServerState::new(ServerConfig {
        host: "127.0.0.1".into(),
        port: addr.port(),
        max_clients,
        ..ServerConfig::default()
    });
    let handle = tokio::spawn(server::serve(listener, state.clone()));
    (addr, state, handle)
}

#[tokio::test]
async fn third_client_is_turned_away_when_capacity_is_two() {
    let (addr, state, _server) = start(2).await;

    let _alice = Client::join(addr, "Alice").await;
    let _bob = Client::join(addr, "Bob").await;

    let mut carol = Client::connect(addr).await;
    assert_eq!(carol.next_line().await, protocol::SERVER_FULL);
    assert_eq!(carol.next().await, Frame::Eof);

    assert_eq!(state.registry.active_count(), 2);
}

#[tokio::test]
async fn slot_frees_up_after_disconnect() {
    let (addr, state, _server) = start(1).await;

    let alice = Client::join(addr, "Alice").await;
    drop(alice);

    timeout(WAIT, async {
        while state.registry.active_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("slot was never released");

    let _bob = Client::join(addr, "Bob").await;
}

#[tokio::test]
async fn invalid_handshake_is_rejected() {
    let (addr, state, _server) = start(4).await;

    let mut client = Client::connect(addr).await;
    client.send("GET / HTTP/1.1").await;
    assert_eq!(client.next_line().await, protocol::INVALID_PROTOCOL);
    assert_eq!(client.next().await, Frame::Eof);

    assert!(state.registry.names().is_empty());
}

#[tokio::test]
async fn private_message_to_missing_user() {
    let (addr, _state, _server) = start(4).await;

    let mut alice = Client::join(addr, "Alice").await;
    alice.send("/msg Bob hi").await;
    assert_eq!(alice.next_line().await, "User Bob not found");
}

#[tokio::test]
async fn broadcast_goes_to_everyone_but_the_sender() {
    let (addr, _state, _server) = start(4).await;

    let mut alice = Client::join(addr, "Alice").await;
    let mut bob = Client::join(addr, "Bob").await;
    assert_eq!(alice.next_line().await, "Bob has joined our chat...");

    alice.send("hello").await;
    let line = bob.next_line().await;
    assert!(line.contains("Alice") && line.contains("hello"), "{line}");

    alice.send("/list").await;
    assert_eq!(alice.next_line().await, "Connected users: Alice, Bob");
}

#[tokio::test]
async fn oversized_message_is_not_relayed_or_recorded() {
    let (addr, state, _server) = start(4).await;

    let mut alice = Client::join(addr, "Alice").await;
    let mut bob = Client::join(addr, "Bob").await;
    assert_eq!(alice.next_line().await, "Bob has joined our chat...");

    alice.send(&"z".repeat(1025)).await;
    assert_eq!(alice.next_line().await, protocol::too_long());

    alice.send("short").await;
    let line = bob.next_line().await;
    assert!(line.ends_with("[Alice]: short"), "{line}");
    assert_eq!(state.router.history(), vec![line]);
}

#[tokio::test]
async fn every_relayed_line_fits_in_a_frame() {
    let (addr, state, _server) = start(4).await;
    let name = "n".repeat(protocol::MAX_NAME_LEN);

    let mut sender = Client::join(addr, &name).await;
    let mut bob = Client::join(addr, "Bob").await;
    sender.expect("Bob has joined our chat...").await;

    sender.send(&"a".repeat(MAX_FRAME_LEN)).await;
    assert_eq!(sender.next_line().await, protocol::too_long());

    // "[YYYY-MM-DD HH:MM:SS][" + name + "]: " leaves this much for the body.
    let longest = "a".repeat(MAX_FRAME_LEN - 25 - name.len());
    sender.send(&longest).await;
    let line = bob.next_line().await;
    assert_eq!(line.len(), MAX_FRAME_LEN);

    // Bob's reader would report anything longer as `Oversized`.
    let mut late = Client::join(addr, "Late").await;
    assert_eq!(late.next_line().await, line);
    assert!(state.router.history().iter().all(|l| l.len() <= MAX_FRAME_LEN));
    sender.expect("Late has joined our chat...").await;

    sender
        .send(&format!("/msg {} hi", "x".repeat(MAX_FRAME_LEN - 8)))
        .await;
    let reply = sender.next_line().await;
    assert!(reply.starts_with("User ") && reply.ends_with(" not found"), "{reply}");
}

#[tokio::test]
async fn long_names_are_refused() {
    let (addr, state, _server) = start(4).await;

    let mut client = Client::connect(addr).await;
    client.send(protocol::HANDSHAKE_TOKEN).await;
    client.send(&"n".repeat(protocol::MAX_NAME_LEN + 1)).await;
    client.expect(protocol::NAME_TOO_LONG).await;
    assert_eq!(client.next().await, Frame::Eof);
    assert!(state.registry.names().is_empty());
}

#[tokio::test]
async fn late_joiner_receives_history_verbatim() {
    let (addr, state, _server) = start(4).await;

    let mut alice = Client::join(addr, "Alice").await;
    for body in ["first", "second", "third"] {
        alice.send(body).await;
    }
    alice.send("/list").await;
    alice.expect("Connected users:").await;

    let mut bob = Client::join(addr, "Bob").await;
    for expected in state.router.history() {
        assert_eq!(bob.next_line().await, expected);
    }
}

#[tokio::test]
async fn shutdown_stops_listener_and_sessions() {
    let (addr, state, server) = start(4).await;

    let mut alice = Client::join(addr, "Alice").await;
    state.shutdown();

    timeout(WAIT, server)
        .await
        .expect("listener did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(alice.next().await, Frame::Eof);
    assert!(TcpStream::connect(addr).await.is_err());
}
