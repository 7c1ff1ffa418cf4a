//! Line-oriented TCP chat relay speaking the `CHAT/1.0` protocol.

pub mod banner;
pub mod codec;
pub mod config;
pub mod conn;
pub mod error;
pub mod outbox;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod state;
