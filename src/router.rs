use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use tracing::warn;

use crate::outbox::Link;
use crate::protocol;
use crate::registry::{Recipient, Registry, SessionId};

/// Wall-clock source for chat timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivateOutcome {
    Delivered,
    RecipientNotFound,
    WriteFailed,
    /// The formatted line would not fit in a frame; nothing was sent.
    TooLong,
}

pub struct Router {
    registry: Arc<Registry>,
    // Taken before the registry lock and held through enqueue, so a join
    // sees each line exactly once: in its replay or live.
    history: Mutex<Vec<String>>,
    clock: Arc<dyn Clock>,
}

impl Router {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_clock(registry, Arc::new(SystemClock))
    }

    pub fn with_clock(registry: Arc<Registry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            history: Mutex::new(Vec::new()),
            clock,
        }
    }

    fn lock_history(&self) -> MutexGuard<'_, Vec<String>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Timestamps a chat line, records it and fans it out to every live
    /// session except `exclude`. Returns the formatted line, or `None` if it
    /// would exceed the frame cap.
    pub fn broadcast(
        &self,
        sender: &str,
        body: &str,
        exclude: Option<SessionId>,
    ) -> Option<String> {
        let line = protocol::chat_line(self.clock.now(), sender, body);
        if !protocol::fits(&line) {
            return None;
        }

        let failed = {
            let mut history = self.lock_history();
            history.push(line.clone());
            fan_out(&self.registry.snapshot(), &line, exclude)
        };
        evict_all(failed);

        Some(line)
    }

    /// Fans out a notice without recording it in history.
    pub fn announce(&self, notice: &str, exclude: Option<SessionId>) {
        let failed = {
            let _history = self.lock_history();
            fan_out(&self.registry.snapshot(), notice, exclude)
        };
        evict_all(failed);
    }

    /// Delivers `body` to the live session named `recipient`.
    ///
    /// Lookup and enqueue are separate steps; a recipient that vanished in
    /// between surfaces as [`PrivateOutcome::WriteFailed`].
    pub fn deliver_private(&self, sender: &str, recipient: &str, body: &str) -> PrivateOutcome {
        let Some(target) = self.registry.lookup(recipient) else {
            return PrivateOutcome::RecipientNotFound;
        };

        let line = protocol::pm_from(sender, body);
        if !protocol::fits(&line) || !protocol::fits(&protocol::pm_to(recipient, body)) {
            return PrivateOutcome::TooLong;
        }

        match target.link.line(line) {
            Ok(()) => PrivateOutcome::Delivered,
            Err(_) => {
                evict_all(vec![target]);
                PrivateOutcome::WriteFailed
            }
        }
    }

    pub fn list_names(&self) -> String {
        protocol::roster(&self.registry.names())
    }

    /// Replays the full history into `link`, then registers the session as
    /// a broadcast recipient. Returns `false` if the session can't go live.
    pub fn join(&self, id: SessionId, link: &Link) -> bool {
        let history = self.lock_history();

        if !history.is_empty() {
            let replay: String = history.iter().map(|line| format!("{line}\n")).collect();
            if link.raw(replay).is_err() {
                return false;
            }
        }

        self.registry.go_live(id, link.clone())
    }

    pub fn history(&self) -> Vec<String> {
        self.lock_history().clone()
    }
}

fn fan_out(recipients: &[Recipient], line: &str, exclude: Option<SessionId>) -> Vec<Recipient> {
    recipients
        .iter()
        .filter(|r| Some(r.id) != exclude)
        .filter(|r| r.link.line(line).is_err())
        .cloned()
        .collect()
}

fn evict_all(failed: Vec<Recipient>) {
    for recipient in failed {
        // Already closing; its own teardown is under way.
        if recipient.link.is_evicted() {
            continue;
        }
        warn!(session = %recipient.id, name = %recipient.name, "delivery failed, dropping session");
        recipient.link.evict();
    }
}
