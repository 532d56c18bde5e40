//! State persistence.
//!
//! Workflows, node templates, credentials and durable memory sessions are
//! written as one JSON blob under a single key and restored verbatim.

use crate::definition::Workflow;
use crate::error::PersistenceError;
use crate::store::NodeTemplate;
use async_trait::async_trait;
use flowloom_conversation::MemoryBuffer;
use flowloom_integration::Credential;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Key the engine state is stored under.
pub const STATE_KEY: &str = "flowloom-state";

/// Everything the engine persists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub workflows: Vec<Workflow>,
    #[serde(default)]
    pub templates: Vec<NodeTemplate>,
    #[serde(default)]
    pub credentials: Vec<Credential>,
    /// Durable memory sessions only.
    #[serde(default)]
    pub memory: Vec<MemoryBuffer>,
}

impl StateSnapshot {
    /// Encodes the snapshot as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if any value fails to serialize.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PersistenceError> {
        serde_json::to_vec_pretty(self).map_err(|e| PersistenceError::Serialization {
            reason: e.to_string(),
        })
    }

    /// Decodes a snapshot and restores derived graph state.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid snapshot.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PersistenceError> {
        let mut snapshot: Self =
            serde_json::from_slice(bytes).map_err(|e| PersistenceError::Serialization {
                reason: e.to_string(),
            })?;
        for workflow in &mut snapshot.workflows {
            workflow.normalize();
        }
        Ok(snapshot)
    }
}

/// Keyed byte storage for snapshots.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Loads a blob, or `None` if nothing is stored under `key`.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Stores a blob, replacing any previous value.
    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<(), PersistenceError>;
}

/// Stores each blob as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::Io {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        let io_error = |e: std::io::Error| PersistenceError::Io {
            key: key.to_string(),
            reason: e.to_string(),
        };
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_error)?;

        // Write then rename so a crash never leaves a truncated blob.
        let path = self.path(key);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, &bytes).await.map_err(io_error)?;
        tokio::fs::rename(&staging, &path).await.map_err(io_error)?;
        debug!(path = %path.display(), bytes = bytes.len(), "state blob written");
        Ok(())
    }
}

/// Keeps blobs in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        self.blobs.write().await.insert(key.to_string(), bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeKind, SetParams};

    fn snapshot() -> StateSnapshot {
        let mut workflow = Workflow::new("Persisted");
        let a = workflow
            .graph
            .add_node(Node::new("A", NodeKind::Set(SetParams::default())));
        let b = workflow.graph.add_node(Node::new("B", NodeKind::Merge));
        workflow
            .graph
            .add_edge(a, b, crate::edge::Edge::any())
            .unwrap();
        StateSnapshot {
            workflows: vec![workflow],
            ..StateSnapshot::default()
        }
    }

    #[tokio::test]
    async fn file_store_round_trips_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path().join("state"));
        assert_eq!(store.load(STATE_KEY).await.unwrap(), None);

        let original = snapshot();
        store.save(STATE_KEY, original.to_bytes().unwrap()).await.unwrap();
        assert!(dir.path().join("state").join("flowloom-state.json").exists());

        let bytes = store.load(STATE_KEY).await.unwrap().unwrap();
        let restored = StateSnapshot::from_bytes(&bytes).unwrap();
        assert_eq!(restored.workflows, original.workflows);
        let node = restored.workflows[0].graph.nodes().next().unwrap().id;
        assert!(restored.workflows[0].graph.get_node(node).is_some());
    }

    #[tokio::test]
    async fn memory_store_overwrites() {
        let store = MemoryBlobStore::new();
        store.save("k", b"one".to_vec()).await.unwrap();
        store.save("k", b"two".to_vec()).await.unwrap();
        assert_eq!(store.load("k").await.unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn corrupt_snapshot_is_a_serialization_error() {
        let err = StateSnapshot::from_bytes(b"{ not json").unwrap_err();
        assert!(matches!(err, PersistenceError::Serialization { .. }));
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let snapshot = StateSnapshot::from_bytes(b"{}").unwrap();
        assert!(snapshot.workflows.is_empty());
        assert!(snapshot.credentials.is_empty());
    }
}
