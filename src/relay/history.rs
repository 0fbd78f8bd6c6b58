//! Per-sender conversation history.
//!
//! Each sender gets a sliding window of the most recent turns, created lazily
//! on first contact and kept for the lifetime of the process. Every sender's
//! window sits behind its own async mutex: a caller that holds the guard owns
//! that conversation until it drops it, so two handlers working on the same
//! sender can't interleave their appends.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Who said a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Bounded ordered log of turns for one sender.
#[derive(Debug)]
pub struct Conversation {
    turns: VecDeque<Turn>,
    limit: usize,
}

impl Conversation {
    fn new(limit: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(limit + 1),
            limit,
        }
    }

    /// Append a turn, evicting the oldest ones past the limit.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.limit {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

type Slot = Arc<AsyncMutex<Conversation>>;

/// All conversations, keyed by sender identifier.
#[derive(Clone)]
pub struct ConversationStore {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    limit: usize,
}

impl ConversationStore {
    pub fn new(limit: usize) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn slot(&self, sender: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(sender.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(Conversation::new(self.limit))))
            .clone()
    }

    /// Take exclusive ownership of a sender's conversation.
    ///
    /// The guard is owned, so it can be held across awaits (e.g. while a
    /// completion call is in flight).
    pub async fn lock(&self, sender: &str) -> OwnedMutexGuard<Conversation> {
        self.slot(sender).lock_owned().await
    }

    /// Append one turn to a sender's conversation.
    pub async fn append(&self, sender: &str, turn: Turn) {
        self.lock(sender).await.push(turn);
    }

    /// Copy of a sender's turns. Unknown senders have an empty history.
    pub async fn snapshot(&self, sender: &str) -> Vec<Turn> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.get(sender).cloned()
        };
        match slot {
            Some(slot) => slot.lock().await.turns(),
            None => Vec::new(),
        }
    }

    /// Number of senders seen so far.
    pub fn sender_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
