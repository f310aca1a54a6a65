//! Session, turns and the append-only transcript.

use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

/// The upstream conversation thread for one run of the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    thread_id: String,
    created_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(thread_id: String) -> Self {
        Self {
            thread_id,
            created_at: Utc::now(),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "you"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message exchanged in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}> {}", self.role, self.text)
    }
}

/// Ordered, in-memory record of all turns.
///
/// Cloning yields another handle to the same record. Turns can only be
/// appended; there is no API to edit or remove them.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Arc<RwLock<Vec<Turn>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, turn: Turn) {
        self.turns.write().unwrap().push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<Turn> {
        self.turns.read().unwrap().last().cloned()
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.read().unwrap().clone()
    }
}
