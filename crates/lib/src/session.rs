//! Conversation history and the single-flight gate for one personality.
//!
//! History is an ordered list of turns (system/user/assistant) whose first entry is the
//! personality's system prompt. A request appends its user turn untrimmed, so the model
//! sees the question together with the full window; the trim runs once the exchange is
//! complete, leaving the system turn plus the most recent [`RECENT_TURNS`] turns.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Number of non-system turns kept after trimming.
pub const RECENT_TURNS: usize = 10;

/// Maximum history length: the system turn plus [`RECENT_TURNS`].
pub const MAX_HISTORY: usize = RECENT_TURNS + 1;

/// Speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single turn in a conversation (role + content).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Rolling conversation history anchored on a system turn.
#[derive(Debug, Clone)]
pub struct History {
    turns: Vec<ConversationTurn>,
}

impl History {
    /// Start a history with the given system prompt as turn 0.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![ConversationTurn::system(system_prompt)],
        }
    }

    /// Append a turn without trimming.
    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Rewrite to `[turn 0] + last RECENT_TURNS` if the history is too long.
    pub fn trim(&mut self) {
        if self.turns.len() > MAX_HISTORY {
            let excess = self.turns.len() - MAX_HISTORY;
            self.turns.drain(1..=excess);
        }
    }

    /// Append a turn, then trim.
    pub fn push(&mut self, turn: ConversationTurn) {
        self.append(turn);
        self.trim();
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Single-flight flag: at most one holder at a time; late callers are rejected, not queued.
#[derive(Debug, Default)]
pub struct SingleFlightGate {
    held: AtomicBool,
}

impl SingleFlightGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the gate if it is free. The gate is released when the returned guard drops.
    pub fn try_acquire(&self) -> Option<GateGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GateGuard { gate: self })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Holds a [`SingleFlightGate`] until dropped.
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a SingleFlightGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.held.store(false, Ordering::Release);
    }
}
