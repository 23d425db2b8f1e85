//! Bounded conversation memory
//!
//! Keeps the most recent messages across all sessions. When full, the
//! oldest message is dropped to make room.

use crate::channels::Message;
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Default number of messages kept in memory
pub const DEFAULT_MEMORY_CAPACITY: usize = 128;

/// FIFO ring buffer of recent messages
pub struct ConversationBuffer {
    messages: RwLock<VecDeque<Message>>,
    capacity: usize,
}

impl ConversationBuffer {
    /// Create a buffer holding at most `capacity` messages (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Append a message, evicting the oldest at capacity. Returns the new length.
    pub async fn push(&self, message: Message) -> usize {
        let mut messages = self.messages.write().await;
        while messages.len() >= self.capacity {
            messages.pop_front();
        }
        messages.push_back(message);
        messages.len()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the buffered messages, oldest first
    pub async fn snapshot(&self) -> Vec<Message> {
        self.messages.read().await.iter().cloned().collect()
    }
}

impl Default for ConversationBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> Message {
        Message::new("telegram", "1", "1", text)
    }

    #[tokio::test]
    async fn test_push_reports_length() {
        let buffer = ConversationBuffer::new(3);
        assert!(buffer.is_empty().await);
        assert_eq!(buffer.push(msg("a")).await, 1);
        assert_eq!(buffer.push(msg("b")).await, 2);
        assert_eq!(buffer.len().await, 2);
    }

    #[tokio::test]
    async fn test_oldest_dropped_at_capacity() {
        let buffer = ConversationBuffer::new(3);
        for text in ["a", "b", "c", "d", "e"] {
            buffer.push(msg(text)).await;
        }

        let texts: Vec<String> = buffer.snapshot().await.into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["c", "d", "e"]);
        assert_eq!(buffer.len().await, 3);
    }

    #[tokio::test]
    async fn test_default_capacity() {
        let buffer = ConversationBuffer::default();
        assert_eq!(buffer.capacity(), DEFAULT_MEMORY_CAPACITY);
        for i in 0..200 {
            buffer.push(msg(&i.to_string())).await;
        }
        assert_eq!(buffer.len().await, 128);
        assert_eq!(buffer.snapshot().await[0].text, "72");
    }

    #[test]
    fn test_zero_capacity_clamped() {
        assert_eq!(ConversationBuffer::new(0).capacity(), 1);
    }
}
