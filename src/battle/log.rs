//! Append-only per-match message list with duplicate suppression.

use crate::types::{Message, Sender};

/// The visible message feed of one match. An append whose `(sender, text)`
/// already exists anywhere in the log is elided, so engine re-entry (e.g. a
/// repeated turn announcement after resync) cannot produce doubled rows.
pub struct MessageLog {
    entries: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Returns true when the message was actually appended.
    pub fn append(&mut self, sender: Sender, text: impl Into<String>, timestamp_ms: i64) -> bool {
        let text = text.into();
        if self
            .entries
            .iter()
            .any(|m| m.sender == sender && m.text == text)
        {
            return false;
        }
        self.entries.push(Message {
            sender,
            text,
            timestamp_ms,
        });
        true
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}
