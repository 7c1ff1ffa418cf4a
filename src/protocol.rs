use chrono::{DateTime, Local};

use crate::codec::MAX_FRAME_LEN;

/// First line every client must send.
pub const HANDSHAKE_TOKEN: &str = "CHAT/1.0";

pub const INVALID_PROTOCOL: &str = "Invalid protocol. Please use TCP chat client.";
pub const SERVER_FULL: &str = "Server is full. Please try again later.";
/// Sent without a trailing newline so the client types on the same line.
pub const NAME_PROMPT: &str = "[ENTER YOUR NAME]: ";
pub const EMPTY_NAME: &str = "Name cannot be empty. Please reconnect.";
pub const NAME_TAKEN: &str = "Name is already in use. Please choose a different name.";
pub const NAME_TOO_LONG: &str = "Name is too long (max 32 characters). Please reconnect.";
pub const MSG_USAGE: &str = "Usage: /msg <username> <message>";

/// Longest display name, in bytes.
pub const MAX_NAME_LEN: usize = 32;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Broadcast(String),
    Private { to: String, body: String },
    List,
    Malformed(&'static str),
}

pub fn is_handshake(line: &str) -> bool {
    line.trim() == HANDSHAKE_TOKEN
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();

    if line == "/list" {
        return Command::List;
    }

    if let Some(rest) = line.strip_prefix("/msg") {
        if rest.is_empty() {
            return Command::Malformed(MSG_USAGE);
        }
        if rest.starts_with(char::is_whitespace) {
            return match rest.trim_start().split_once(char::is_whitespace) {
                Some((to, body)) if !body.trim().is_empty() => Command::Private {
                    to: to.to_string(),
                    body: body.trim().to_string(),
                },
                _ => Command::Malformed(MSG_USAGE),
            };
        }
    }

    Command::Broadcast(line.to_string())
}

pub fn welcome(name: &str) -> String {
    format!("Welcome, {name}!")
}

pub fn joined(name: &str) -> String {
    format!("{name} has joined our chat...")
}

pub fn left(name: &str) -> String {
    format!("{name} has left our chat...")
}

pub fn chat_line(at: DateTime<Local>, name: &str, body: &str) -> String {
    format!("[{}][{name}]: {body}", at.format(TIMESTAMP_FORMAT))
}

pub fn pm_from(sender: &str, body: &str) -> String {
    format!("[PM from {sender}]: {body}")
}

pub fn pm_to(recipient: &str, body: &str) -> String {
    format!("[PM to {recipient}]: {body}")
}

pub fn user_not_found(name: &str) -> String {
    format!("User {} not found", clip(name, MAX_NAME_LEN))
}

pub fn delivery_failed(name: &str) -> String {
    format!("Failed to deliver message to {}", clip(name, MAX_NAME_LEN))
}

pub fn roster(names: &[String]) -> String {
    let line = format!("Connected users: {}", names.join(", "));
    clip(&line, MAX_FRAME_LEN).to_string()
}

/// Whether a server line can be read back by a peer with the same cap.
pub fn fits(line: &str) -> bool {
    line.len() <= MAX_FRAME_LEN
}

// Longest prefix of `text` within `max` bytes, cut on a char boundary.
fn clip(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

pub fn too_long() -> String {
    format!("Message too long (max {MAX_FRAME_LEN} characters)")
}
