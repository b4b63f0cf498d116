//! Chat log shared by the players and the session itself.
//!
//! The log is append-only and ordered. It is trimmed to a display budget;
//! trimming never affects gameplay.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default number of chat lines retained.
pub const DEFAULT_CHAT_HISTORY: usize = 50;

/// Who wrote a chat line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatSender {
    Me,
    Opponent,
    /// Session notices (connects, disconnects, failures).
    System,
}

/// One chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: ChatSender,
    pub text: String,
    /// Unix time in milliseconds when the line was appended locally.
    pub timestamp: u64,
}

impl ChatMessage {
    pub fn new(sender: ChatSender, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
            timestamp: unix_millis(),
        }
    }
}

/// Bounded, ordered chat history.
#[derive(Debug, Clone)]
pub struct ChatLog {
    lines: VecDeque<ChatMessage>,
    capacity: usize,
}

impl ChatLog {
    /// A log keeping at most `capacity` lines (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a line and return a copy of it.
    pub fn push(&mut self, sender: ChatSender, text: impl Into<String>) -> ChatMessage {
        let message = ChatMessage::new(sender, text);
        self.lines.push_back(message.clone());
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
        message
    }

    pub fn lines(&self) -> impl Iterator<Item = &ChatMessage> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new(DEFAULT_CHAT_HISTORY)
    }
}

/// Current wall-clock time in unix milliseconds.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
