//! Capacity-bounded message window for a single session.

use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Ordered, capacity-bounded sequence of messages for one session.
///
/// Pushing past capacity evicts the oldest message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryBuffer {
    /// Session this buffer belongs to.
    pub session_id: String,
    /// Maximum number of retained messages.
    pub capacity: usize,
    /// Whether the buffer is included in persisted snapshots.
    #[serde(default)]
    pub durable: bool,
    messages: VecDeque<Message>,
}

impl MemoryBuffer {
    /// Creates an empty, non-durable buffer.
    #[must_use]
    pub fn new(session_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            session_id: session_id.into(),
            capacity,
            durable: false,
            messages: VecDeque::with_capacity(capacity),
        }
    }

    /// Marks the buffer as durable.
    #[must_use]
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Appends a message, evicting from the front until within capacity.
    pub fn push(&mut self, message: Message) {
        self.messages.push_back(message);
        self.trim();
    }

    /// Changes the capacity, evicting the oldest messages if it shrank.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.trim();
    }

    fn trim(&mut self) {
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }

    /// Returns the retained messages, oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Renders the history as `role: content` lines for prompt augmentation.
    #[must_use]
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_evicts_oldest_past_capacity() {
        let mut buffer = MemoryBuffer::new("s", 2);
        buffer.push(Message::user("one"));
        buffer.push(Message::assistant("two"));
        buffer.push(Message::user("three"));

        let contents: Vec<_> = buffer.messages().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "three"]);
    }

    #[test]
    fn shrinking_capacity_trims() {
        let mut buffer = MemoryBuffer::new("s", 5);
        for i in 0..5 {
            buffer.push(Message::user(i.to_string()));
        }
        buffer.set_capacity(2);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.messages().next().map(|m| m.content.as_str()), Some("3"));
    }

    #[test]
    fn transcript_format() {
        let mut buffer = MemoryBuffer::new("s", 4);
        buffer.push(Message::user("hi"));
        buffer.push(Message::assistant("hello"));
        assert_eq!(buffer.transcript(), "user: hi\nassistant: hello");
    }
}
