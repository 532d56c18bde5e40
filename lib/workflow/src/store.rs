//! Workflow store.
//!
//! Holds every workflow and the node template library. All graph edits go
//! through here and bump the workflow's `updated_at`. Runtime status writes
//! from running steps do not.

use crate::definition::{Workflow, WorkflowSummary};
use crate::edge::{Edge, EdgeRef};
use crate::error::{EngineError, GraphError};
use crate::graph::WorkflowGraph;
use crate::node::{Node, NodeKind, NodeRuntime, NodeStatus};
use crate::trigger::TriggerSettings;
use chrono::{DateTime, Utc};
use flowloom_core::{EdgeId, NodeId, TemplateId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Canvas offset applied to cloned nodes.
const CLONE_OFFSET: f64 = 40.0;

/// A reusable, pre-configured node in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTemplate {
    pub id: TemplateId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: NodeKind,
    pub created_at: DateTime<Utc>,
}

impl NodeTemplate {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: TemplateId::new(),
            name: name.into(),
            description: None,
            kind,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Creates a fresh node from this template.
    #[must_use]
    pub fn instantiate(&self) -> Node {
        Node::new(self.name.clone(), self.kind.clone())
    }
}

/// Shared, in-memory store of workflows and node templates.
///
/// Cloning yields another handle to the same data.
#[derive(Debug, Clone, Default)]
pub struct WorkflowStore {
    workflows: Arc<RwLock<BTreeMap<WorkflowId, Workflow>>>,
    templates: Arc<RwLock<BTreeMap<TemplateId, NodeTemplate>>>,
}

impl WorkflowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an edit to a workflow and bumps `updated_at` on success.
    async fn edit<T>(
        &self,
        workflow_id: WorkflowId,
        f: impl FnOnce(&mut Workflow) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(&workflow_id)
            .ok_or(EngineError::WorkflowNotFound { workflow_id })?;
        let value = f(workflow)?;
        workflow.touch();
        Ok(value)
    }

    /// Creates an empty, inactive workflow.
    pub async fn create_workflow(&self, name: impl Into<String>) -> WorkflowId {
        self.insert_workflow(Workflow::new(name)).await
    }

    /// Inserts a workflow, replacing any with the same id.
    pub async fn insert_workflow(&self, mut workflow: Workflow) -> WorkflowId {
        workflow.normalize();
        let id = workflow.id;
        debug!(workflow_id = %id, name = workflow.name(), "workflow stored");
        self.workflows.write().await.insert(id, workflow);
        id
    }

    /// Returns a copy of a workflow.
    pub async fn workflow(&self, workflow_id: WorkflowId) -> Option<Workflow> {
        self.workflows.read().await.get(&workflow_id).cloned()
    }

    /// Returns copies of every workflow in id order.
    pub async fn all_workflows(&self) -> Vec<Workflow> {
        self.workflows.read().await.values().cloned().collect()
    }

    /// Lists workflow summaries in id order.
    pub async fn summaries(&self) -> Vec<WorkflowSummary> {
        self.workflows
            .read()
            .await
            .values()
            .map(WorkflowSummary::from)
            .collect()
    }

    /// Finds a workflow id by exact name.
    pub async fn find_by_name(&self, name: &str) -> Option<WorkflowId> {
        self.workflows
            .read()
            .await
            .values()
            .find(|w| w.name() == name)
            .map(|w| w.id)
    }

    /// Copies a workflow under `"<name> (Copy)"` with fresh ids, inactive.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow does not exist.
    pub async fn duplicate_workflow(&self, workflow_id: WorkflowId) -> Result<WorkflowId, EngineError> {
        let original = self
            .workflow(workflow_id)
            .await
            .ok_or(EngineError::WorkflowNotFound { workflow_id })?;

        let mut copy = Workflow::new(format!("{} (Copy)", original.name()));
        let created_at = copy.metadata.created_at;
        copy.metadata = original.metadata.clone();
        copy.metadata.name = format!("{} (Copy)", original.name());
        copy.metadata.active = false;
        copy.metadata.created_at = created_at;
        copy.metadata.updated_at = created_at;

        let graph = copy_graph(&original.graph).map_err(|source| EngineError::Graph {
            workflow_id,
            source,
        })?;
        copy.graph = graph;
        Ok(self.insert_workflow(copy).await)
    }

    /// Removes a workflow.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow does not exist.
    pub async fn delete_workflow(&self, workflow_id: WorkflowId) -> Result<Workflow, EngineError> {
        self.workflows
            .write()
            .await
            .remove(&workflow_id)
            .ok_or(EngineError::WorkflowNotFound { workflow_id })
    }

    /// Flips the active flag and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow does not exist.
    pub async fn toggle_active(&self, workflow_id: WorkflowId) -> Result<bool, EngineError> {
        self.edit(workflow_id, |w| {
            w.metadata.active = !w.metadata.active;
            Ok(w.metadata.active)
        })
        .await
    }

    /// Renames a workflow.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow does not exist.
    pub async fn rename_workflow(
        &self,
        workflow_id: WorkflowId,
        name: impl Into<String>,
    ) -> Result<(), EngineError> {
        let name = name.into();
        self.edit(workflow_id, |w| {
            w.metadata.name = name;
            Ok(())
        })
        .await
    }

    /// Sets or clears a workflow's description.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow does not exist.
    pub async fn describe_workflow(
        &self,
        workflow_id: WorkflowId,
        description: Option<String>,
    ) -> Result<(), EngineError> {
        self.edit(workflow_id, |w| {
            w.metadata.description = description;
            Ok(())
        })
        .await
    }

    /// Replaces a workflow's trigger metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow does not exist.
    pub async fn set_trigger(
        &self,
        workflow_id: WorkflowId,
        trigger: TriggerSettings,
    ) -> Result<(), EngineError> {
        self.edit(workflow_id, |w| {
            w.metadata.trigger = trigger;
            Ok(())
        })
        .await
    }

    /// Adds a node to a workflow.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow does not exist.
    pub async fn add_node(&self, workflow_id: WorkflowId, node: Node) -> Result<NodeId, EngineError> {
        self.edit(workflow_id, |w| Ok(w.graph.add_node(node))).await
    }

    /// Adds a node built from a library template.
    ///
    /// # Errors
    ///
    /// Returns an error if the template or workflow does not exist.
    pub async fn add_node_from_template(
        &self,
        workflow_id: WorkflowId,
        template_id: TemplateId,
    ) -> Result<NodeId, EngineError> {
        let template = self
            .template(template_id)
            .await
            .ok_or(EngineError::TemplateNotFound { template_id })?;
        self.add_node(workflow_id, template.instantiate()).await
    }

    /// Copies a node with a fresh id, idle status and an offset position.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow or node does not exist.
    pub async fn clone_node(&self, workflow_id: WorkflowId, node_id: NodeId) -> Result<NodeId, EngineError> {
        self.edit(workflow_id, |w| {
            let original = w
                .graph
                .get_node(node_id)
                .ok_or(EngineError::NodeNotFound { workflow_id, node_id })?;
            let mut copy = original.clone().with_id(NodeId::new());
            copy.position.x += CLONE_OFFSET;
            copy.position.y += CLONE_OFFSET;
            copy.runtime = NodeRuntime::default();
            Ok(w.graph.add_node(copy))
        })
        .await
    }

    /// Deletes a node and its incident edges.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow or node does not exist.
    pub async fn delete_node(&self, workflow_id: WorkflowId, node_id: NodeId) -> Result<Node, EngineError> {
        self.edit(workflow_id, |w| {
            w.graph
                .remove_node(node_id)
                .ok_or(EngineError::NodeNotFound { workflow_id, node_id })
        })
        .await
    }

    /// Renames a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow or node does not exist.
    pub async fn rename_node(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
        name: impl Into<String>,
    ) -> Result<(), EngineError> {
        let name = name.into();
        self.edit(workflow_id, |w| {
            let node = w
                .graph
                .get_node_mut(node_id)
                .ok_or(EngineError::NodeNotFound { workflow_id, node_id })?;
            node.name = name;
            Ok(())
        })
        .await
    }

    /// Replaces a node's parameters.
    ///
    /// The node's outputs are recomputed from the new parameters, and edges
    /// on branches that no longer exist are removed and returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist or `kind` is a different
    /// node type.
    pub async fn update_node_params(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
        kind: NodeKind,
    ) -> Result<Vec<EdgeRef>, EngineError> {
        self.edit(workflow_id, |w| {
            let node = w
                .graph
                .get_node_mut(node_id)
                .ok_or(EngineError::NodeNotFound { workflow_id, node_id })?;
            if node.kind.type_name() != kind.type_name() {
                return Err(EngineError::NodeTypeMismatch {
                    node_id,
                    expected: node.kind.type_name().to_string(),
                    actual: kind.type_name().to_string(),
                });
            }
            node.outputs = kind.default_outputs();
            node.kind = kind;
            Ok(w.graph.prune_stale_edges(node_id))
        })
        .await
    }

    /// Connects two nodes, optionally on a named source branch.
    ///
    /// # Errors
    ///
    /// Returns an error if either endpoint is missing, the branch is not an
    /// output of the source, or the edge already exists.
    pub async fn connect(
        &self,
        workflow_id: WorkflowId,
        source: NodeId,
        target: NodeId,
        source_handle: Option<String>,
    ) -> Result<EdgeId, EngineError> {
        let edge = match source_handle {
            Some(branch) => Edge::on(branch),
            None => Edge::any(),
        };
        self.edit(workflow_id, |w| {
            w.graph
                .add_edge(source, target, edge)
                .map_err(|source| EngineError::Graph {
                    workflow_id,
                    source,
                })
        })
        .await
    }

    /// Removes an edge.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow or edge does not exist.
    pub async fn disconnect(&self, workflow_id: WorkflowId, edge_id: EdgeId) -> Result<EdgeRef, EngineError> {
        self.edit(workflow_id, |w| {
            w.graph
                .remove_edge(edge_id)
                .map_err(|source| EngineError::Graph {
                    workflow_id,
                    source,
                })
        })
        .await
    }

    /// Adds a template to the library.
    pub async fn add_template(&self, template: NodeTemplate) -> TemplateId {
        let id = template.id;
        self.templates.write().await.insert(id, template);
        id
    }

    /// Saves an existing node's kind as a library template.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow or node does not exist.
    pub async fn save_node_as_template(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
    ) -> Result<TemplateId, EngineError> {
        let workflow = self
            .workflow(workflow_id)
            .await
            .ok_or(EngineError::WorkflowNotFound { workflow_id })?;
        let node = workflow
            .graph
            .get_node(node_id)
            .ok_or(EngineError::NodeNotFound { workflow_id, node_id })?;
        Ok(self
            .add_template(NodeTemplate::new(node.name.clone(), node.kind.clone()))
            .await)
    }

    pub async fn template(&self, template_id: TemplateId) -> Option<NodeTemplate> {
        self.templates.read().await.get(&template_id).cloned()
    }

    /// Lists library templates in id order.
    pub async fn templates(&self) -> Vec<NodeTemplate> {
        self.templates.read().await.values().cloned().collect()
    }

    /// Returns a node's runtime status.
    pub async fn node_status(&self, workflow_id: WorkflowId, node_id: NodeId) -> Option<NodeStatus> {
        self.workflows
            .read()
            .await
            .get(&workflow_id)
            .and_then(|w| w.graph.get_node(node_id))
            .map(|n| n.runtime.status)
    }

    /// Returns a copy of a node's runtime state.
    pub async fn node_runtime(&self, workflow_id: WorkflowId, node_id: NodeId) -> Option<NodeRuntime> {
        self.workflows
            .read()
            .await
            .get(&workflow_id)
            .and_then(|w| w.graph.get_node(node_id))
            .map(|n| n.runtime.clone())
    }

    /// Mutates a node's runtime state. Returns false if the node is gone.
    pub(crate) async fn update_runtime(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
        f: impl FnOnce(&mut NodeRuntime),
    ) -> bool {
        let mut workflows = self.workflows.write().await;
        match workflows
            .get_mut(&workflow_id)
            .and_then(|w| w.graph.get_node_mut(node_id))
        {
            Some(node) => {
                f(&mut node.runtime);
                true
            }
            None => false,
        }
    }

    /// Sets every node of a workflow back to idle, returning their ids.
    ///
    /// With `clear_results`, stored results and errors are dropped too.
    pub(crate) async fn reset_runtimes(&self, workflow_id: WorkflowId, clear_results: bool) -> Vec<NodeId> {
        let mut workflows = self.workflows.write().await;
        let Some(workflow) = workflows.get_mut(&workflow_id) else {
            return Vec::new();
        };
        workflow
            .graph
            .nodes_mut()
            .map(|node| {
                if clear_results {
                    node.runtime = NodeRuntime::default();
                } else {
                    node.runtime.status = NodeStatus::Idle;
                }
                node.id
            })
            .collect()
    }

    /// Replaces all workflows and templates.
    pub(crate) async fn replace_all(&self, workflows: Vec<Workflow>, templates: Vec<NodeTemplate>) {
        let workflows = workflows
            .into_iter()
            .map(|mut w| {
                w.normalize();
                (w.id, w)
            })
            .collect();
        let templates = templates.into_iter().map(|t| (t.id, t)).collect();
        *self.workflows.write().await = workflows;
        *self.templates.write().await = templates;
    }
}

/// Copies a graph with fresh node and edge ids.
fn copy_graph(original: &WorkflowGraph) -> Result<WorkflowGraph, GraphError> {
    let mut graph = WorkflowGraph::new();
    let mut ids = HashMap::new();
    for node in original.nodes() {
        let mut copy = node.clone().with_id(NodeId::new());
        copy.runtime = NodeRuntime::default();
        ids.insert(node.id, graph.add_node(copy));
    }
    for edge in original.edges() {
        let (Some(&source), Some(&target)) = (ids.get(&edge.source), ids.get(&edge.target)) else {
            continue;
        };
        let weight = match edge.source_handle {
            Some(branch) => Edge::on(branch),
            None => Edge::any(),
        };
        graph.add_edge(source, target, weight)?;
    }
    Ok(graph)
}
