//! Engine events.
//!
//! Status changes are broadcast to any number of subscribers. Slow
//! subscribers lag and miss events; publishing never blocks a run.

use crate::dispatcher::ExecutionMode;
use crate::execution::RunStatus;
use crate::node::NodeStatus;
use chrono::{DateTime, Utc};
use flowloom_core::{NodeId, WorkflowId, WorkflowRunId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Something observable that happened inside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A run was admitted.
    RunStarted {
        run_id: WorkflowRunId,
        workflow_id: WorkflowId,
        mode: ExecutionMode,
        timestamp: DateTime<Utc>,
    },
    /// A node's runtime status changed.
    NodeStatusChanged {
        run_id: WorkflowRunId,
        workflow_id: WorkflowId,
        node_id: NodeId,
        status: NodeStatus,
        timestamp: DateTime<Utc>,
    },
    /// A node is held at a debug breakpoint.
    NodePaused {
        run_id: WorkflowRunId,
        workflow_id: WorkflowId,
        node_id: NodeId,
        timestamp: DateTime<Utc>,
    },
    /// A run reached a terminal status.
    RunFinished {
        run_id: WorkflowRunId,
        workflow_id: WorkflowId,
        status: RunStatus,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// Debug mode was switched on or off.
    DebugModeChanged {
        enabled: bool,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// The run this event belongs to, if any.
    #[must_use]
    pub fn run_id(&self) -> Option<WorkflowRunId> {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::NodeStatusChanged { run_id, .. }
            | Self::NodePaused { run_id, .. }
            | Self::RunFinished { run_id, .. } => Some(*run_id),
            Self::DebugModeChanged { .. } => None,
        }
    }
}

/// Broadcast channel for [`EngineEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event. Events published with no subscriber are dropped.
    pub fn publish(&self, event: EngineEvent) {
        if self.sender.send(event).is_err() {
            trace!("event dropped, no subscribers");
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}
