//! Graph traversal for a single run.
//!
//! Each entry node starts a recursive step. A successful step fans out to
//! every target whose edge matches the emitted branch and waits for all of
//! them. A failed step cancels the run's `stop` token so no further node is
//! scheduled; steps already dispatched finish on their own.

use crate::controller::RunController;
use crate::definition::Workflow;
use crate::dispatcher::{DispatchContext, NodeDispatcher};
use crate::error::NodeError;
use crate::events::{EngineEvent, EventBus};
use crate::item::ExecutionItem;
use crate::node::{NodeFailure, NodeStatus};
use crate::store::WorkflowStore;
use chrono::Utc;
use flowloom_core::NodeId;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-node results gathered during a run, one entry per invocation.
pub type RunResults = BTreeMap<NodeId, Vec<Vec<ExecutionItem>>>;

/// Per-run state threaded through every step.
#[derive(Debug)]
pub struct RunContext {
    pub dispatch: DispatchContext,
    /// Cancelled on the first failure, or on abort.
    stop: CancellationToken,
    /// Whether successful steps descend into their targets.
    descend: bool,
    max_steps: usize,
    steps: AtomicUsize,
    results: Mutex<RunResults>,
    failure: Mutex<Option<String>>,
}

impl RunContext {
    #[must_use]
    pub fn new(dispatch: DispatchContext, max_steps: usize) -> Self {
        let stop = dispatch.abort.child_token();
        Self {
            dispatch,
            stop,
            descend: true,
            max_steps,
            steps: AtomicUsize::new(0),
            results: Mutex::new(BTreeMap::new()),
            failure: Mutex::new(None),
        }
    }

    /// Runs only the entry nodes, without descending.
    #[must_use]
    pub fn single_node(mut self) -> Self {
        self.descend = false;
        self
    }
}

/// What a finished traversal produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub results: RunResults,
    /// Message of the first node failure.
    pub failure: Option<String>,
    pub aborted: bool,
    pub steps: usize,
}

/// Walks one workflow snapshot for one run.
pub struct GraphExecutor<'a> {
    workflow: &'a Workflow,
    store: &'a WorkflowStore,
    dispatcher: &'a NodeDispatcher,
    controller: &'a RunController,
    events: &'a EventBus,
    ctx: RunContext,
}

impl<'a> GraphExecutor<'a> {
    #[must_use]
    pub fn new(
        workflow: &'a Workflow,
        store: &'a WorkflowStore,
        dispatcher: &'a NodeDispatcher,
        controller: &'a RunController,
        events: &'a EventBus,
        ctx: RunContext,
    ) -> Self {
        Self {
            workflow,
            store,
            dispatcher,
            controller,
            events,
            ctx,
        }
    }

    /// Runs every entry node concurrently on the same input and waits for
    /// the whole traversal.
    pub async fn run(self, entries: Vec<NodeId>, input: Vec<ExecutionItem>) -> RunOutcome {
        let roots = entries.into_iter().map(|id| self.step(id, input.clone()));
        join_all(roots).await;

        RunOutcome {
            results: self.ctx.results.into_inner(),
            failure: self.ctx.failure.into_inner(),
            aborted: self.ctx.dispatch.abort.is_cancelled(),
            steps: self.ctx.steps.into_inner(),
        }
    }

    fn step<'s>(&'s self, node_id: NodeId, items: Vec<ExecutionItem>) -> BoxFuture<'s, ()> {
        async move {
            if self.ctx.stop.is_cancelled() {
                return;
            }
            let Some(node) = self.workflow.graph.get_node(node_id) else {
                warn!(%node_id, "step target missing from workflow");
                return;
            };

            let step = self.ctx.steps.fetch_add(1, Ordering::AcqRel) + 1;
            if step > self.ctx.max_steps {
                self.fail(
                    node_id,
                    NodeError::StepBudgetExceeded {
                        limit: self.ctx.max_steps,
                    },
                )
                .await;
                return;
            }

            if self.controller.is_debug_mode() && !self.wait_for_step(node_id).await {
                self.set_status(node_id, NodeStatus::Idle).await;
                return;
            }

            self.set_status(node_id, NodeStatus::Executing).await;
            let delay = self.dispatcher.config().node_delay();
            if !delay.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = self.ctx.stop.cancelled() => {
                        self.set_status(node_id, NodeStatus::Idle).await;
                        return;
                    }
                }
            }

            match self.dispatcher.execute(node, items, &self.ctx.dispatch).await {
                Ok(output) => {
                    self.succeed(node_id, &output.items).await;
                    if !self.ctx.descend {
                        return;
                    }
                    let targets = self.workflow.graph.targets_for_branch(node_id, &output.branch);
                    debug!(%node_id, branch = %output.branch, targets = targets.len(), "fanning out");
                    let branches = targets
                        .into_iter()
                        .map(|target| self.step(target, output.items.clone()));
                    join_all(branches).await;
                }
                Err(NodeError::Cancelled) => {
                    self.set_status(node_id, NodeStatus::Idle).await;
                }
                Err(error) => self.fail(node_id, error).await,
            }
        }
        .boxed()
    }

    /// Holds the step at a debug breakpoint. Returns false if the run
    /// stopped while waiting.
    async fn wait_for_step(&self, node_id: NodeId) -> bool {
        // Registered before any await so a concurrent toggle-off releases it.
        let Some(release) = self.controller.pause(node_id) else {
            return true;
        };
        self.set_status(node_id, NodeStatus::Waiting).await;
        self.events.publish(EngineEvent::NodePaused {
            run_id: self.ctx.dispatch.run_id,
            workflow_id: self.ctx.dispatch.workflow_id,
            node_id,
            timestamp: Utc::now(),
        });
        tokio::select! {
            released = release => released.is_ok() && !self.ctx.stop.is_cancelled(),
            () = self.ctx.stop.cancelled() => false,
        }
    }

    async fn set_status(&self, node_id: NodeId, status: NodeStatus) {
        self.store
            .update_runtime(self.ctx.dispatch.workflow_id, node_id, |rt| rt.status = status)
            .await;
        self.publish_status(node_id, status);
    }

    fn publish_status(&self, node_id: NodeId, status: NodeStatus) {
        self.events.publish(EngineEvent::NodeStatusChanged {
            run_id: self.ctx.dispatch.run_id,
            workflow_id: self.ctx.dispatch.workflow_id,
            node_id,
            status,
            timestamp: Utc::now(),
        });
    }

    async fn succeed(&self, node_id: NodeId, items: &[ExecutionItem]) {
        let result = vec![items.to_vec()];
        self.store
            .update_runtime(self.ctx.dispatch.workflow_id, node_id, |rt| {
                rt.status = NodeStatus::Success;
                rt.last_result = Some(result);
                rt.last_error = None;
            })
            .await;
        self.ctx
            .results
            .lock()
            .await
            .entry(node_id)
            .or_default()
            .push(items.to_vec());
        self.publish_status(node_id, NodeStatus::Success);
    }

    async fn fail(&self, node_id: NodeId, error: NodeError) {
        let message = error.to_string();
        warn!(%node_id, error = %message, "node failed");
        let failure = NodeFailure {
            message: message.clone(),
            timestamp: Utc::now(),
        };
        self.store
            .update_runtime(self.ctx.dispatch.workflow_id, node_id, |rt| {
                rt.status = NodeStatus::Error;
                rt.last_error = Some(failure);
            })
            .await;
        self.publish_status(node_id, NodeStatus::Error);

        self.ctx.failure.lock().await.get_or_insert(message);
        self.ctx.stop.cancel();
    }
}
