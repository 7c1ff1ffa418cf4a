//! Admission control and the name table, under one mutex. No I/O while locked.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};

use crate::outbox::Link;
use crate::protocol::MAX_NAME_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted(SessionId),
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindResult {
    Bound,
    Empty,
    /// Longer than [`MAX_NAME_LEN`] bytes.
    TooLong,
    Duplicate,
    /// The id holds no unnamed slot: never admitted, already released, or
    /// already named.
    NoSlot,
}

/// A live session as seen by the router.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub id: SessionId,
    pub name: String,
    pub link: Link,
}

/// What [`Registry::release`] reports for a session that had gone live.
#[derive(Debug, Clone)]
pub struct Departed {
    pub name: String,
    pub joined_at: DateTime<Local>,
}

#[derive(Debug, Default)]
struct Slot {
    name: Option<String>,
    joined_at: Option<DateTime<Local>>,
    /// Set once the session receives broadcasts.
    link: Option<Link>,
}

#[derive(Debug, Default)]
struct Table {
    slots: HashMap<SessionId, Slot>,
    names: HashMap<String, SessionId>,
}

#[derive(Debug)]
pub struct Registry {
    capacity: usize,
    next_id: AtomicU64,
    table: Mutex<Table>,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_id: AtomicU64::new(1),
            table: Mutex::new(Table::default()),
        }
    }

    // Every critical section leaves the table consistent, so a poisoned lock
    // still holds usable data.
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reserves a slot if the server is under capacity.
    pub fn try_admit(&self) -> Admission {
        let mut table = self.lock();
        if table.slots.len() >= self.capacity {
            return Admission::Full;
        }

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        table.slots.insert(id, Slot::default());
        Admission::Admitted(id)
    }

    /// Binds `name` to an admitted, still unnamed session. Names compare
    /// exactly, case included.
    pub fn try_bind_name(&self, id: SessionId, name: &str) -> BindResult {
        let name = name.trim();
        if name.is_empty() {
            return BindResult::Empty;
        }
        if name.len() > MAX_NAME_LEN {
            return BindResult::TooLong;
        }

        let mut table = self.lock();
        if table.names.contains_key(name) {
            return BindResult::Duplicate;
        }

        let Some(slot) = table.slots.get_mut(&id) else {
            return BindResult::NoSlot;
        };
        if slot.name.is_some() {
            return BindResult::NoSlot;
        }

        slot.name = Some(name.to_string());
        slot.joined_at = Some(Local::now());
        table.names.insert(name.to_string(), id);
        BindResult::Bound
    }

    /// Makes a named session a broadcast recipient. Returns `false` if the
    /// session was released or never named.
    pub fn go_live(&self, id: SessionId, link: Link) -> bool {
        let mut table = self.lock();
        match table.slots.get_mut(&id) {
            Some(slot) if slot.name.is_some() => {
                slot.link = Some(link);
                true
            }
            _ => false,
        }
    }

    /// Frees the session's slot and name. Idempotent: a second call finds
    /// nothing and changes nothing.
    ///
    /// Returns the departed session only if it had gone live, which is
    /// exactly when a leave notice is owed.
    pub fn release(&self, id: SessionId) -> Option<Departed> {
        let mut table = self.lock();
        let slot = table.slots.remove(&id)?;

        if let Some(name) = &slot.name {
            if table.names.get(name) == Some(&id) {
                table.names.remove(name);
            }
        }

        match (slot.link, slot.name, slot.joined_at) {
            (Some(_), Some(name), Some(joined_at)) => Some(Departed { name, joined_at }),
            _ => None,
        }
    }

    /// Point-in-time copy of every live session.
    pub fn snapshot(&self) -> Vec<Recipient> {
        let table = self.lock();
        table
            .slots
            .iter()
            .filter_map(|(id, slot)| {
                let link = slot.link.as_ref()?;
                let name = slot.name.as_ref()?;
                Some(Recipient {
                    id: *id,
                    name: name.clone(),
                    link: link.clone(),
                })
            })
            .collect()
    }

    /// Sorted names of every live session.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .slots
            .values()
            .filter(|slot| slot.link.is_some())
            .filter_map(|slot| slot.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Finds the live session bound to exactly `name`.
    pub fn lookup(&self, name: &str) -> Option<Recipient> {
        let table = self.lock();
        let id = *table.names.get(name)?;
        let slot = table.slots.get(&id)?;
        Some(Recipient {
            id,
            name: name.to_string(),
            link: slot.link.clone()?,
        })
    }

    /// Admitted sessions, named or not.
    pub fn active_count(&self) -> usize {
        self.lock().slots.len()
    }
}
