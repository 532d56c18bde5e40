//! Workflow graph implementation using petgraph.
//!
//! Workflows are directed graphs where:
//! - Nodes are typed operations with declared output branches
//! - Edges connect a source node to a target node, optionally on one branch
//!
//! Cycles are representable; [`WorkflowGraph::validate`] reports them and the
//! executor bounds traversal with a step budget.

use crate::edge::{Edge, EdgeRef};
use crate::error::GraphError;
use crate::node::Node;
use flowloom_core::{EdgeId, NodeId};
use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A workflow graph using petgraph's directed graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// The underlying directed graph.
    #[serde(with = "graph_serde")]
    graph: DiGraph<Node, Edge>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    #[serde(skip)]
    node_index_map: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    /// Creates a new empty workflow graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_index_map: HashMap::new(),
        }
    }

    /// Adds a node to the graph.
    ///
    /// Returns the node ID.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let node_id = node.id;
        let index = self.graph.add_node(node);
        self.node_index_map.insert(node_id, index);
        node_id
    }

    /// Removes a node from the graph.
    ///
    /// Also removes all edges connected to this node.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let index = *self.node_index_map.get(&node_id)?;
        let removed = self.graph.remove_node(index);
        // petgraph moves the last node into the freed slot.
        self.rebuild_index_map();
        removed
    }

    /// Returns a reference to a node by its ID.
    #[must_use]
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(&node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns a mutable reference to a node by its ID.
    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        let index = self.node_index_map.get(&node_id)?;
        self.graph.node_weight_mut(*index)
    }

    /// Adds an edge between two nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Source or target node doesn't exist
    /// - The edge's branch is not an output of the source node
    /// - An edge with the same endpoints and branch already exists
    pub fn add_edge(
        &mut self,
        source_id: NodeId,
        target_id: NodeId,
        mut edge: Edge,
    ) -> Result<EdgeId, GraphError> {
        let source_index = *self
            .node_index_map
            .get(&source_id)
            .ok_or(GraphError::NodeNotFound { node_id: source_id })?;

        let target_index = *self
            .node_index_map
            .get(&target_id)
            .ok_or(GraphError::NodeNotFound { node_id: target_id })?;

        if let Some(branch) = &edge.source_handle {
            let declared = self
                .graph
                .node_weight(source_index)
                .is_some_and(|n| n.has_output(branch));
            if !declared {
                return Err(GraphError::UnknownBranch {
                    node_id: source_id,
                    branch: branch.clone(),
                });
            }
        }

        let duplicate = self
            .graph
            .edges_connecting(source_index, target_index)
            .any(|e| e.weight().source_handle == edge.source_handle);
        if duplicate {
            return Err(GraphError::DuplicateEdge {
                source: source_id,
                target: target_id,
            });
        }

        edge.order = self
            .graph
            .edge_weights()
            .map(|e| e.order + 1)
            .max()
            .unwrap_or(0);
        let edge_id = edge.id;
        self.graph.add_edge(source_index, target_index, edge);
        Ok(edge_id)
    }

    /// Removes an edge by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if no edge has this ID.
    pub fn remove_edge(&mut self, edge_id: EdgeId) -> Result<EdgeRef, GraphError> {
        let index = self
            .find_edge(edge_id)
            .ok_or(GraphError::EdgeNotFound { edge_id })?;
        let edge_ref = self
            .edge_ref(index)
            .ok_or(GraphError::EdgeNotFound { edge_id })?;
        self.graph.remove_edge(index);
        Ok(edge_ref)
    }

    /// Removes outgoing edges of a node whose branch it no longer declares.
    ///
    /// Returns the removed edges.
    pub fn prune_stale_edges(&mut self, node_id: NodeId) -> Vec<EdgeRef> {
        let Some(node) = self.get_node(node_id) else {
            return Vec::new();
        };
        let stale: Vec<EdgeId> = self
            .outgoing_edges(node_id)
            .into_iter()
            .filter(|e| e.source_handle.as_deref().is_some_and(|h| !node.has_output(h)))
            .map(|e| e.id)
            .collect();
        stale
            .into_iter()
            .filter_map(|id| self.remove_edge(id).ok())
            .collect()
    }

    fn find_edge(&self, edge_id: EdgeId) -> Option<EdgeIndex> {
        self.graph
            .edge_indices()
            .find(|&i| self.graph.edge_weight(i).is_some_and(|e| e.id == edge_id))
    }

    fn edge_ref(&self, index: EdgeIndex) -> Option<EdgeRef> {
        let (source, target) = self.graph.edge_endpoints(index)?;
        let weight = self.graph.edge_weight(index)?;
        Some(EdgeRef {
            id: weight.id,
            source: self.graph.node_weight(source)?.id,
            target: self.graph.node_weight(target)?.id,
            source_handle: weight.source_handle.clone(),
        })
    }

    /// Returns all nodes in the graph.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Returns all nodes mutably.
    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.graph.node_weights_mut()
    }

    /// Returns all edges with their endpoints.
    #[must_use]
    pub fn edges(&self) -> Vec<EdgeRef> {
        self.in_edge_order(self.graph.edge_indices())
    }

    /// Resolves edge indices sorted by insertion order.
    ///
    /// Removal swaps the last edge into the freed index, so indices alone
    /// do not preserve the order edges were added in.
    fn in_edge_order(&self, indices: impl Iterator<Item = EdgeIndex>) -> Vec<EdgeRef> {
        let mut indices: Vec<_> = indices
            .filter_map(|i| self.graph.edge_weight(i).map(|e| (e.order, i)))
            .collect();
        indices.sort();
        indices
            .into_iter()
            .filter_map(|(_, i)| self.edge_ref(i))
            .collect()
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns the nodes a run starts from.
    ///
    /// Trigger nodes if the graph has any, otherwise nodes with no incoming
    /// edges. Order follows insertion order.
    #[must_use]
    pub fn entry_nodes(&self) -> Vec<NodeId> {
        let triggers: Vec<NodeId> = self
            .nodes()
            .filter(|n| n.kind.is_trigger())
            .map(|n| n.id)
            .collect();
        if !triggers.is_empty() {
            return triggers;
        }
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .edges_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .filter_map(|idx| self.graph.node_weight(idx).map(|n| n.id))
            .collect()
    }

    /// Returns the outgoing edges of a node, in the order they were added.
    #[must_use]
    pub fn outgoing_edges(&self, node_id: NodeId) -> Vec<EdgeRef> {
        let Some(&index) = self.node_index_map.get(&node_id) else {
            return Vec::new();
        };
        self.in_edge_order(
            self.graph
                .edges_directed(index, Direction::Outgoing)
                .map(|e| e.id()),
        )
    }

    /// Returns the targets of edges that fire for `branch`, in edge order.
    #[must_use]
    pub fn targets_for_branch(&self, node_id: NodeId, branch: &str) -> Vec<NodeId> {
        self.outgoing_edges(node_id)
            .into_iter()
            .filter(|e| e.source_handle.as_deref().is_none_or(|h| h == branch))
            .map(|e| e.target)
            .collect()
    }

    /// Returns the upstream node IDs of a node.
    #[must_use]
    pub fn predecessors(&self, node_id: NodeId) -> Vec<NodeId> {
        let Some(&index) = self.node_index_map.get(&node_id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(index, Direction::Incoming)
            .filter_map(|edge| self.graph.node_weight(edge.source()).map(|n| n.id))
            .collect()
    }

    /// Returns true if the graph contains a cycle.
    #[must_use]
    pub fn is_cyclic(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }

    /// Validates the workflow graph.
    ///
    /// Checks:
    /// - Every conditioned edge uses a branch its source declares
    /// - No cycles
    ///
    /// # Errors
    ///
    /// Returns an error describing the first validation failure.
    pub fn validate(&self) -> Result<(), GraphError> {
        for edge in self.edges() {
            if let Some(branch) = &edge.source_handle {
                let declared = self.get_node(edge.source).is_some_and(|n| n.has_output(branch));
                if !declared {
                    return Err(GraphError::UnknownBranch {
                        node_id: edge.source,
                        branch: branch.clone(),
                    });
                }
            }
        }

        if self.is_cyclic() {
            return Err(GraphError::CycleDetected);
        }

        Ok(())
    }

    /// Rebuilds the node index map after deserialization or removal.
    pub fn rebuild_index_map(&mut self) {
        self.node_index_map.clear();
        for index in self.graph.node_indices() {
            if let Some(node) = self.graph.node_weight(index) {
                self.node_index_map.insert(node.id, index);
            }
        }
    }
}

impl Default for WorkflowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for WorkflowGraph {
    fn eq(&self, other: &Self) -> bool {
        self.nodes().eq(other.nodes()) && self.edges() == other.edges()
    }
}

/// Custom serde for petgraph DiGraph.
mod graph_serde {
    use super::*;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeStruct;

    pub fn serialize<S>(graph: &DiGraph<Node, Edge>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let nodes: Vec<_> = graph.node_weights().collect();
        let edges: Vec<_> = graph
            .edge_references()
            .map(|e| {
                let source_id = graph.node_weight(e.source()).map(|n| n.id);
                let target_id = graph.node_weight(e.target()).map(|n| n.id);
                (source_id, target_id, e.weight())
            })
            .collect();

        let mut state = serializer.serialize_struct("Graph", 2)?;
        state.serialize_field("nodes", &nodes)?;
        state.serialize_field("edges", &edges)?;
        state.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DiGraph<Node, Edge>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        type EdgeTuple = (Option<NodeId>, Option<NodeId>, Edge);

        struct GraphVisitor;

        impl<'de> Visitor<'de> for GraphVisitor {
            type Value = DiGraph<Node, Edge>;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a workflow graph with nodes and edges")
            }

            fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut nodes: Option<Vec<Node>> = None;
                let mut edges: Option<Vec<EdgeTuple>> = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "nodes" => nodes = Some(map.next_value()?),
                        "edges" => edges = Some(map.next_value()?),
                        _ => {
                            let _ = map.next_value::<serde::de::IgnoredAny>()?;
                        }
                    }
                }

                let mut graph = DiGraph::new();
                let mut id_to_index = HashMap::new();

                for mut node in nodes.unwrap_or_default() {
                    node.normalize();
                    let id = node.id;
                    let index = graph.add_node(node);
                    id_to_index.insert(id, index);
                }

                for (source_id, target_id, edge) in edges.unwrap_or_default() {
                    let (Some(source), Some(target)) = (source_id, target_id) else {
                        continue;
                    };
                    let (Some(&source_idx), Some(&target_idx)) =
                        (id_to_index.get(&source), id_to_index.get(&target))
                    else {
                        continue;
                    };
                    graph.add_edge(source_idx, target_idx, edge);
                }

                Ok(graph)
            }
        }

        deserializer.deserialize_struct("Graph", &["nodes", "edges"], GraphVisitor)
    }
}
