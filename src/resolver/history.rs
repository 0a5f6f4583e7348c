//! Bounded conversation history passed to the resolver.
//!
//! [`TurnHistory`] keeps the most recent turns in insertion order and drops
//! the oldest once it holds more than its capacity.  The session appends one
//! user turn and one assistant turn per completed exchange; the resolver only
//! reads it.

use std::collections::VecDeque;

/// Default number of turns kept.
pub const DEFAULT_CAPACITY: usize = 10;

/// Who produced a [`Turn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    /// Chat-completions role name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

/// One side of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// TurnHistory
// ---------------------------------------------------------------------------

/// Rolling window of the most recent turns.
///
/// # Example
/// ```rust
/// use voice_commander::resolver::{Turn, TurnHistory};
///
/// let mut history = TurnHistory::with_capacity(2);
/// history.push(Turn::user("hello"));
/// history.push(Turn::assistant("Greetings."));
/// history.push(Turn::user("pricing"));
/// assert_eq!(history.len(), 2);
/// assert_eq!(history.turns().next().unwrap().text, "Greetings.");
/// ```
#[derive(Debug, Clone)]
pub struct TurnHistory {
    turns: VecDeque<Turn>,
    capacity: usize,
}

impl TurnHistory {
    /// History holding [`DEFAULT_CAPACITY`] turns.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// History holding at most `capacity` turns (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a turn, dropping the oldest ones beyond capacity.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.capacity {
            self.turns.pop_front();
        }
    }

    /// Turns oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for TurnHistory {
    fn default() -> Self {
        Self::new()
    }
}
