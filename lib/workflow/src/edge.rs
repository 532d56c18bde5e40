//! Edge types for workflow graphs.
//!
//! An edge connects a source node to a target node, optionally conditioned on
//! the branch label the source emits.

use flowloom_core::{EdgeId, NodeId};
use serde::{Deserialize, Serialize};

/// The weight stored on a graph edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Unique identifier for this edge.
    pub id: EdgeId,
    /// Branch label this edge fires on. `None` fires on any branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    /// Position among the graph's edges, assigned when the edge is added.
    #[serde(default)]
    pub order: u64,
}

impl Edge {
    /// Creates an edge that fires on any branch.
    #[must_use]
    pub fn any() -> Self {
        Self {
            id: EdgeId::new(),
            source_handle: None,
            order: 0,
        }
    }

    /// Creates an edge conditioned on a branch label.
    #[must_use]
    pub fn on(branch: impl Into<String>) -> Self {
        Self {
            id: EdgeId::new(),
            source_handle: Some(branch.into()),
            order: 0,
        }
    }

    /// Returns true if this edge fires for the emitted branch.
    #[must_use]
    pub fn matches(&self, branch: &str) -> bool {
        self.source_handle.as_deref().is_none_or(|h| h == branch)
    }
}

impl Default for Edge {
    fn default() -> Self {
        Self::any()
    }
}

/// A complete edge reference including source and target node IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRef {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub source_handle: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconditioned_edge_matches_every_branch() {
        let edge = Edge::any();
        assert!(edge.matches("default"));
        assert!(edge.matches("false"));
    }

    #[test]
    fn conditioned_edge_matches_only_its_branch() {
        let edge = Edge::on("true");
        assert!(edge.matches("true"));
        assert!(!edge.matches("false"));
    }

    #[test]
    fn edge_serde_omits_missing_handle() {
        let json = serde_json::to_string(&Edge::any()).expect("serialize");
        assert!(!json.contains("source_handle"));
        let parsed: Edge = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.source_handle, None);
    }
}
