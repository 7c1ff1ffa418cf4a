use std::net::SocketAddr;
use std::time::Duration;

use chrono::Local;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::banner;
use crate::codec::{Frame, FrameReader};
use crate::error::SessionError;
use crate::outbox::{self, Link};
use crate::protocol::{self, Command};
use crate::registry::{BindResult, SessionId};
use crate::router::PrivateOutcome;
use crate::state::ServerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connected,
    HandshakeWait,
    NamePrompt,
    Active,
    Closed,
}

struct Session<R> {
    state: ServerState,
    id: SessionId,
    peer: SocketAddr,
    link: Link,
    frames: FrameReader<BufReader<R>>,
    phase: Phase,
}

/// Drives one admitted connection until it closes.
///
/// The caller has already reserved slot `id`; this function always gives it
/// back. `Ok(())` means the peer left an active chat normally.
pub async fn handle<R, W>(
    state: ServerState,
    id: SessionId,
    reader: R,
    writer: W,
    peer: SocketAddr,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let cancel = state.session_token();
    let write_timeout = state.config.write_timeout;
    let (link, rx) = outbox::channel(state.config.outbox_capacity, cancel.clone());
    let writer = outbox::spawn_writer(writer, rx, cancel.clone(), write_timeout);

    let mut session = Session {
        state,
        id,
        peer,
        link,
        frames: FrameReader::new(BufReader::new(reader)),
        phase: Phase::Connected,
    };

    let result = session.run().await;
    session.close();
    drop(session);

    // Let queued rejections and replies drain before the socket goes away.
    if timeout(write_timeout, writer).await.is_err() {
        cancel.cancel();
    }

    result
}

impl<R: AsyncRead + Unpin> Session<R> {
    async fn run(&mut self) -> Result<(), SessionError> {
        self.enter(Phase::HandshakeWait);
        self.handshake().await?;

        self.enter(Phase::NamePrompt);
        let name = self.negotiate_name().await?;

        self.enter(Phase::Active);
        self.chat(&name).await
    }

    fn enter(&mut self, phase: Phase) {
        debug!(session = %self.id, peer = %self.peer, from = ?self.phase, to = ?phase, "session transition");
        self.phase = phase;
    }

    async fn handshake(&mut self) -> Result<(), SessionError> {
        let limit = self.state.config.handshake_timeout;

        let rejected = match self.read(Some(limit)).await {
            Ok(Frame::Line(line)) if protocol::is_handshake(&line) => None,
            Ok(Frame::Eof) => Some(SessionError::Disconnected(self.phase)),
            Ok(_) => Some(SessionError::BadHandshake),
            Err(err @ SessionError::Timeout(_)) => Some(err),
            Err(err) => return Err(err),
        };

        if let Some(err) = rejected {
            let _ = self.reply(protocol::INVALID_PROTOCOL);
            return Err(err);
        }

        self.send_raw(banner::render())?;
        self.send_raw(protocol::NAME_PROMPT.to_string())
    }

    async fn negotiate_name(&mut self) -> Result<String, SessionError> {
        let limit = self.state.config.handshake_timeout;

        let candidate = match self.read(Some(limit)).await? {
            Frame::Line(line) => line,
            // Can't be a valid name; handled like an empty one.
            Frame::Oversized(_) => String::new(),
            Frame::Eof => return Err(SessionError::Disconnected(self.phase)),
        };

        match self.state.registry.try_bind_name(self.id, &candidate) {
            BindResult::Bound => {}
            BindResult::Empty => {
                let _ = self.reply(protocol::EMPTY_NAME);
                return Err(SessionError::EmptyName);
            }
            BindResult::TooLong => {
                let _ = self.reply(protocol::NAME_TOO_LONG);
                return Err(SessionError::NameTooLong(protocol::MAX_NAME_LEN));
            }
            BindResult::Duplicate => {
                let _ = self.reply(protocol::NAME_TAKEN);
                return Err(SessionError::DuplicateName(candidate));
            }
            BindResult::NoSlot => return Err(SessionError::Released),
        }

        self.reply(protocol::welcome(&candidate))?;

        if !self.state.router.join(self.id, &self.link) {
            return Err(if self.link.is_evicted() {
                self.closed_reason()
            } else {
                SessionError::Released
            });
        }

        self.state
            .router
            .announce(&protocol::joined(&candidate), Some(self.id));
        info!(session = %self.id, peer = %self.peer, name = %candidate, "joined");

        Ok(candidate)
    }

    async fn chat(&mut self, name: &str) -> Result<(), SessionError> {
        loop {
            match self.read(None).await? {
                Frame::Eof => return Ok(()),
                Frame::Oversized(len) => {
                    debug!(session = %self.id, len, "oversized message rejected");
                    self.reply(protocol::too_long())?;
                }
                Frame::Line(line) if line.is_empty() => {}
                Frame::Line(line) => self.dispatch(name, protocol::parse_command(&line))?,
            }
        }
    }

    fn dispatch(&self, name: &str, command: Command) -> Result<(), SessionError> {
        match command {
            Command::Broadcast(body) => {
                match self.state.router.broadcast(name, &body, Some(self.id)) {
                    Some(_) => Ok(()),
                    None => self.reply(protocol::too_long()),
                }
            }
            Command::Private { to, body } => {
                let reply = match self.state.router.deliver_private(name, &to, &body) {
                    PrivateOutcome::Delivered => protocol::pm_to(&to, &body),
                    PrivateOutcome::RecipientNotFound => protocol::user_not_found(&to),
                    PrivateOutcome::WriteFailed => protocol::delivery_failed(&to),
                    PrivateOutcome::TooLong => protocol::too_long(),
                };
                self.reply(reply)
            }
            Command::List => self.reply(self.state.router.list_names()),
            Command::Malformed(usage) => self.reply(usage),
        }
    }

    /// Next frame from the peer, abandoned if the session gets cancelled.
    async fn read(&mut self, deadline: Option<Duration>) -> Result<Frame, SessionError> {
        let phase = self.phase;
        let frames = &mut self.frames;
        let read = async move {
            match deadline {
                Some(limit) => timeout(limit, frames.next_frame())
                    .await
                    .map_err(|_| SessionError::Timeout(phase)),
                None => Ok(frames.next_frame().await),
            }
        };

        let frame = tokio::select! {
            _ = self.link.cancelled() => None,
            frame = read => Some(frame),
        };

        frame.unwrap_or_else(|| Err(self.closed_reason()))
    }

    fn reply(&self, line: impl AsRef<str>) -> Result<(), SessionError> {
        self.link.line(line).map_err(|_| self.fail_delivery())
    }

    fn send_raw(&self, text: String) -> Result<(), SessionError> {
        self.link.raw(text).map_err(|_| self.fail_delivery())
    }

    // Our own peer can't keep up with its replies.
    fn fail_delivery(&self) -> SessionError {
        self.link.evict();
        self.closed_reason()
    }

    fn closed_reason(&self) -> SessionError {
        if self.state.is_shutting_down() {
            SessionError::Shutdown
        } else {
            SessionError::Evicted
        }
    }

    fn close(&mut self) {
        let reached = self.phase;
        self.enter(Phase::Closed);

        match self.state.registry.release(self.id) {
            Some(departed) => {
                self.state
                    .router
                    .announce(&protocol::left(&departed.name), Some(self.id));
                let online = Local::now() - departed.joined_at;
                info!(
                    session = %self.id,
                    peer = %self.peer,
                    name = %departed.name,
                    online_secs = online.num_seconds(),
                    "left"
                );
            }
            None => {
                debug!(session = %self.id, peer = %self.peer, phase = ?reached, "closed before joining");
            }
        }
    }
}
