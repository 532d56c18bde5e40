//! Session registry for memory buffers.

use crate::buffer::MemoryBuffer;
use crate::error::MemoryError;
use crate::message::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Shared, session-keyed collection of memory buffers.
///
/// Cloning yields another handle to the same sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    sessions: Arc<RwLock<HashMap<String, MemoryBuffer>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message to a session, creating the buffer on first use.
    ///
    /// `capacity` is applied on every append so a node's window parameter
    /// always wins. Returns the buffer length after the append.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty session id or a zero capacity.
    pub async fn append(
        &self,
        session_id: &str,
        message: Message,
        capacity: usize,
        durable: bool,
    ) -> Result<usize, MemoryError> {
        if session_id.is_empty() {
            return Err(MemoryError::MissingSession);
        }
        if capacity == 0 {
            return Err(MemoryError::ZeroCapacity {
                session_id: session_id.to_string(),
            });
        }

        let mut sessions = self.sessions.write().await;
        let buffer = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| MemoryBuffer::new(session_id, capacity));
        buffer.set_capacity(capacity);
        buffer.durable |= durable;
        buffer.push(message);

        debug!(session_id, len = buffer.len(), durable = buffer.durable, "memory appended");
        Ok(buffer.len())
    }

    /// Returns a copy of a session's messages, oldest first.
    pub async fn history(&self, session_id: &str) -> Vec<Message> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|b| b.messages().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns a copy of a session's buffer.
    pub async fn buffer(&self, session_id: &str) -> Option<MemoryBuffer> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Removes a session, returning whether it existed.
    pub async fn clear(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    /// Lists session ids in sorted order.
    pub async fn sessions(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the durable buffers for persistence, sorted by session id.
    pub async fn durable_snapshot(&self) -> Vec<MemoryBuffer> {
        let mut buffers: Vec<_> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|b| b.durable)
            .cloned()
            .collect();
        buffers.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        buffers
    }

    /// Replaces all sessions with the given buffers.
    pub async fn restore(&self, buffers: Vec<MemoryBuffer>) {
        let mut sessions = self.sessions.write().await;
        sessions.clear();
        for buffer in buffers {
            sessions.insert(buffer.session_id.clone(), buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_creates_and_bounds_session() {
        let store = MemoryStore::new();
        for i in 0..4 {
            store
                .append("chat", Message::user(format!("m{i}")), 3, false)
                .await
                .unwrap();
        }
        let history = store.history("chat").await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "m1");
    }

    #[tokio::test]
    async fn append_rejects_empty_session_and_zero_capacity() {
        let store = MemoryStore::new();
        assert_eq!(
            store.append("", Message::user("x"), 3, false).await,
            Err(MemoryError::MissingSession)
        );
        assert!(store.append("s", Message::user("x"), 0, false).await.is_err());
    }

    #[tokio::test]
    async fn snapshot_includes_only_durable_sessions() {
        let store = MemoryStore::new();
        store.append("ephemeral", Message::user("a"), 5, false).await.unwrap();
        store.append("kept", Message::user("b"), 5, true).await.unwrap();

        let snapshot = store.durable_snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].session_id, "kept");

        let restored = MemoryStore::new();
        restored.restore(snapshot).await;
        assert_eq!(restored.sessions().await, vec!["kept".to_string()]);
        assert_eq!(restored.history("kept").await[0].content, "b");
    }

    #[tokio::test]
    async fn clones_share_sessions() {
        let store = MemoryStore::new();
        let handle = store.clone();
        handle.append("s", Message::user("x"), 2, false).await.unwrap();
        assert_eq!(store.history("s").await.len(), 1);
        assert!(store.clear("s").await);
        assert!(handle.history("s").await.is_empty());
    }
}
