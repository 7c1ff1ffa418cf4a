use crate::conn::Phase;

/// Why a session ended other than a clean disconnect from an active chat.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("client did not send the protocol handshake")]
    BadHandshake,

    #[error("timed out in {0:?}")]
    Timeout(Phase),

    #[error("peer closed the connection in {0:?}")]
    Disconnected(Phase),

    #[error("empty display name")]
    EmptyName,

    #[error("display name longer than {0} bytes")]
    NameTooLong(usize),

    #[error("display name already in use: {0}")]
    DuplicateName(String),

    #[error("session slot was released before joining")]
    Released,

    #[error("evicted after a failed delivery")]
    Evicted,

    #[error("server shutting down")]
    Shutdown,
}

impl SessionError {
    /// Rejections the peer caused by speaking the protocol wrong.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::BadHandshake
                | Self::EmptyName
                | Self::NameTooLong(_)
                | Self::DuplicateName(_)
        )
    }
}
