//! The engine facade.
//!
//! [`Engine`] ties the store, dispatcher, run controller, event bus and run
//! log together and exposes the operations callers drive: running
//! workflows and single nodes, debug stepping, abort, credential
//! management and persistence. Graph editing lives on [`WorkflowStore`],
//! reachable through [`Engine::store`].

use crate::config::EngineConfig;
use crate::controller::RunController;
use crate::definition::{Workflow, WorkflowSummary};
use crate::dispatcher::{DispatchContext, ExecutionMode, NodeDispatcher};
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::execution::{RunLog, RunRecord, RunStatus};
use crate::executor::{GraphExecutor, RunContext};
use crate::item::ExecutionItem;
use crate::node::{NodeRuntime, NodeStatus};
use crate::persistence::{BlobStore, MemoryBlobStore, STATE_KEY, StateSnapshot};
use crate::store::WorkflowStore;
use chrono::Utc;
use flowloom_ai::{ModelProvider, OpenAiCompatibleProvider, OpenAiConfig};
use flowloom_conversation::MemoryStore;
use flowloom_core::{CredentialId, NodeId, WorkflowId, WorkflowRunId};
use flowloom_integration::{
    Credential, CredentialStatus, CredentialVault, HttpClient, InMemoryVault, OpenSshShell,
    RemoteShell, ReqwestHttpClient,
};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::{info, instrument, warn};

/// Builds an [`Engine`], defaulting every collaborator that is not supplied.
pub struct EngineBuilder {
    config: EngineConfig,
    http: Option<Arc<dyn HttpClient>>,
    shell: Option<Arc<dyn RemoteShell>>,
    model: Option<Arc<dyn ModelProvider>>,
    vault: Option<Arc<dyn CredentialVault>>,
    memory: Option<MemoryStore>,
    blobs: Option<Arc<dyn BlobStore>>,
}

impl EngineBuilder {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            http: None,
            shell: None,
            model: None,
            vault: None,
            memory: None,
            blobs: None,
        }
    }

    #[must_use]
    pub fn with_http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    #[must_use]
    pub fn with_shell(mut self, shell: Arc<dyn RemoteShell>) -> Self {
        self.shell = Some(shell);
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: Arc<dyn ModelProvider>) -> Self {
        self.model = Some(model);
        self
    }

    #[must_use]
    pub fn with_vault(mut self, vault: Arc<dyn CredentialVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    #[must_use]
    pub fn with_memory(mut self, memory: MemoryStore) -> Self {
        self.memory = Some(memory);
        self
    }

    #[must_use]
    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    #[must_use]
    pub fn build(self) -> Engine {
        let http = self
            .http
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));
        let shell = self.shell.unwrap_or_else(|| Arc::new(OpenSshShell::new()));
        let model = self
            .model
            .unwrap_or_else(|| Arc::new(OpenAiCompatibleProvider::new(OpenAiConfig::default())));
        let vault = self.vault.unwrap_or_else(|| Arc::new(InMemoryVault::new()));
        let blobs = self
            .blobs
            .unwrap_or_else(|| Arc::new(MemoryBlobStore::new()));
        let memory = self.memory.unwrap_or_default();

        let dispatcher =
            NodeDispatcher::new(self.config.clone(), http, shell, model, vault, memory);
        Engine {
            inner: Arc::new(EngineInner {
                store: WorkflowStore::new(),
                dispatcher,
                controller: Arc::new(RunController::new()),
                events: EventBus::new(self.config.event_buffer),
                log: RwLock::new(RunLog::new(self.config.run_log_capacity)),
                blobs,
                config: self.config,
            }),
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    store: WorkflowStore,
    dispatcher: NodeDispatcher,
    controller: Arc<RunController>,
    events: EventBus,
    log: RwLock<RunLog>,
    blobs: Arc<dyn BlobStore>,
}

/// The workflow execution engine. Cloning yields another handle.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    #[must_use]
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Workflow and template storage, for graph editing.
    #[must_use]
    pub fn store(&self) -> &WorkflowStore {
        &self.inner.store
    }

    #[must_use]
    pub fn memory(&self) -> &MemoryStore {
        self.inner.dispatcher.memory()
    }

    /// Subscribes to engine events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub async fn workflow(&self, workflow_id: WorkflowId) -> Option<Workflow> {
        self.inner.store.workflow(workflow_id).await
    }

    pub async fn workflows(&self) -> Vec<WorkflowSummary> {
        self.inner.store.summaries().await
    }

    pub async fn node_status(&self, workflow_id: WorkflowId, node_id: NodeId) -> Option<NodeStatus> {
        self.inner.store.node_status(workflow_id, node_id).await
    }

    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.inner.controller.is_running()
    }

    #[must_use]
    pub fn is_debug_mode(&self) -> bool {
        self.inner.controller.is_debug_mode()
    }

    /// The oldest node held at a debug breakpoint.
    #[must_use]
    pub fn paused_node(&self) -> Option<NodeId> {
        self.inner.controller.paused_node()
    }

    /// Run records, oldest first.
    pub async fn executions(&self) -> Vec<RunRecord> {
        self.inner.log.read().await.records()
    }

    pub async fn clear_executions(&self) {
        self.inner.log.write().await.clear();
    }

    /// Flips debug mode and returns the new setting.
    pub fn toggle_debug_mode(&self) -> bool {
        let enabled = self.inner.controller.toggle_debug_mode();
        self.inner.events.publish(EngineEvent::DebugModeChanged {
            enabled,
            timestamp: Utc::now(),
        });
        enabled
    }

    /// Releases the oldest paused node.
    pub fn step(&self) -> Option<NodeId> {
        self.inner.controller.step()
    }

    /// Releases every paused node. Debug mode stays on.
    pub fn resume(&self) -> usize {
        self.inner.controller.resume()
    }

    /// Aborts the active run and resets its node statuses to idle.
    ///
    /// Returns false if nothing was running.
    pub async fn abort_execution(&self) -> bool {
        let Some(active) = self.inner.controller.abort() else {
            return false;
        };
        let reset = self
            .inner
            .store
            .reset_runtimes(active.workflow_id, false)
            .await;
        for node_id in reset {
            self.inner.events.publish(EngineEvent::NodeStatusChanged {
                run_id: active.run_id,
                workflow_id: active.workflow_id,
                node_id,
                status: NodeStatus::Idle,
                timestamp: Utc::now(),
            });
        }
        info!(run_id = %active.run_id, "run aborted");
        true
    }

    /// Runs a workflow from its entry nodes and records the run.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow does not exist or another run is in
    /// flight. Node failures do not error; they are reported in the record.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn run_workflow(&self, workflow_id: WorkflowId) -> Result<RunRecord, EngineError> {
        let workflow = self
            .inner
            .store
            .workflow(workflow_id)
            .await
            .ok_or(EngineError::WorkflowNotFound { workflow_id })?;
        let run_id = WorkflowRunId::new();
        let guard = self.inner.controller.admit(run_id, workflow_id)?;

        if workflow.graph.is_cyclic() {
            warn!(%run_id, limit = self.inner.config.max_steps_per_run, "workflow graph contains cycles; bounded by step budget");
        }
        self.inner.store.reset_runtimes(workflow_id, true).await;

        let mut record = RunRecord::start(run_id, workflow_id, workflow.name());
        self.publish_started(run_id, workflow_id, ExecutionMode::Workflow);
        let entries = workflow.graph.entry_nodes();
        info!(%run_id, entries = entries.len(), "run started");

        let dispatch = DispatchContext::new(run_id, workflow_id, ExecutionMode::Workflow)
            .with_abort(guard.abort_token().clone());
        let ctx = RunContext::new(dispatch, self.inner.config.max_steps_per_run);
        let input = vec![ExecutionItem::new(json!({ "trigger": "manual" }))];
        let outcome = self.executor(&workflow, ctx).run(entries, input).await;

        record.data_snapshot = outcome.results;
        if outcome.aborted {
            record.fail("aborted");
        } else if let Some(error) = outcome.failure {
            record.fail(error);
        } else {
            record.succeed();
        }

        self.inner.log.write().await.push(record.clone());
        drop(guard);

        match &record.error {
            Some(error) => warn!(%run_id, steps = outcome.steps, error = %error, "run failed"),
            None => info!(%run_id, steps = outcome.steps, duration = %record.duration_display(), "run succeeded"),
        }
        self.publish_finished(run_id, workflow_id, record.status, record.error.clone());
        Ok(record)
    }

    /// Runs one node on its own with `{ "trigger": "isolation" }`.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow or node does not exist or another
    /// run is in flight.
    pub async fn run_node_instance(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
    ) -> Result<NodeRuntime, EngineError> {
        self.run_single(
            workflow_id,
            node_id,
            ExecutionMode::Isolation,
            json!({ "trigger": "isolation" }),
        )
        .await
    }

    /// Re-runs one node on its own with `{ "retry": true }`.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow or node does not exist or another
    /// run is in flight.
    pub async fn retry_node(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
    ) -> Result<NodeRuntime, EngineError> {
        self.run_single(workflow_id, node_id, ExecutionMode::Retry, json!({ "retry": true }))
            .await
    }

    #[instrument(skip(self, seed), fields(workflow_id = %workflow_id, node_id = %node_id, mode = mode.as_str()))]
    async fn run_single(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
        mode: ExecutionMode,
        seed: JsonValue,
    ) -> Result<NodeRuntime, EngineError> {
        let workflow = self
            .inner
            .store
            .workflow(workflow_id)
            .await
            .ok_or(EngineError::WorkflowNotFound { workflow_id })?;
        if workflow.graph.get_node(node_id).is_none() {
            return Err(EngineError::NodeNotFound {
                workflow_id,
                node_id,
            });
        }
        let run_id = WorkflowRunId::new();
        let guard = self.inner.controller.admit(run_id, workflow_id)?;
        self.publish_started(run_id, workflow_id, mode);

        let dispatch =
            DispatchContext::new(run_id, workflow_id, mode).with_abort(guard.abort_token().clone());
        let ctx = RunContext::new(dispatch, self.inner.config.max_steps_per_run).single_node();
        let outcome = self
            .executor(&workflow, ctx)
            .run(vec![node_id], vec![ExecutionItem::new(seed)])
            .await;
        drop(guard);

        let (status, error) = match (outcome.aborted, outcome.failure) {
            (true, _) => (RunStatus::Error, Some("aborted".to_string())),
            (false, Some(error)) => (RunStatus::Error, Some(error)),
            (false, None) => (RunStatus::Success, None),
        };
        self.publish_finished(run_id, workflow_id, status, error);

        self.inner
            .store
            .node_runtime(workflow_id, node_id)
            .await
            .ok_or(EngineError::NodeNotFound {
                workflow_id,
                node_id,
            })
    }

    fn executor<'a>(&'a self, workflow: &'a Workflow, ctx: RunContext) -> GraphExecutor<'a> {
        GraphExecutor::new(
            workflow,
            &self.inner.store,
            &self.inner.dispatcher,
            &self.inner.controller,
            &self.inner.events,
            ctx,
        )
    }

    fn publish_started(&self, run_id: WorkflowRunId, workflow_id: WorkflowId, mode: ExecutionMode) {
        self.inner.events.publish(EngineEvent::RunStarted {
            run_id,
            workflow_id,
            mode,
            timestamp: Utc::now(),
        });
    }

    fn publish_finished(
        &self,
        run_id: WorkflowRunId,
        workflow_id: WorkflowId,
        status: RunStatus,
        error: Option<String>,
    ) {
        self.inner.events.publish(EngineEvent::RunFinished {
            run_id,
            workflow_id,
            status,
            error,
            timestamp: Utc::now(),
        });
    }

    /// Stores a credential, returning its id.
    pub async fn add_credential(&self, credential: Credential) -> CredentialId {
        let id = credential.id;
        self.inner.dispatcher.vault().put(credential).await;
        id
    }

    /// Removes a credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential does not exist.
    pub async fn remove_credential(&self, credential_id: CredentialId) -> Result<Credential, EngineError> {
        self.inner
            .dispatcher
            .vault()
            .remove(credential_id)
            .await
            .ok_or(EngineError::CredentialNotFound { credential_id })
    }

    pub async fn credentials(&self) -> Vec<Credential> {
        self.inner.dispatcher.vault().list().await
    }

    /// Records the outcome of validating a credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential does not exist.
    pub async fn set_credential_status(
        &self,
        credential_id: CredentialId,
        status: CredentialStatus,
    ) -> Result<(), EngineError> {
        let vault = self.inner.dispatcher.vault();
        // `get` refuses invalid credentials, so look the credential up by listing.
        let mut credential = vault
            .list()
            .await
            .into_iter()
            .find(|c| c.id == credential_id)
            .ok_or(EngineError::CredentialNotFound { credential_id })?;
        credential.status = status;
        credential.mark_updated();
        vault.put(credential).await;
        Ok(())
    }

    /// Persists workflows, templates, credentials and durable memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be encoded or written.
    pub async fn save(&self) -> Result<(), EngineError> {
        let snapshot = StateSnapshot {
            workflows: self.inner.store.all_workflows().await,
            templates: self.inner.store.templates().await,
            credentials: self.credentials().await,
            memory: self.memory().durable_snapshot().await,
        };
        self.inner
            .blobs
            .save(STATE_KEY, snapshot.to_bytes()?)
            .await?;
        info!(
            workflows = snapshot.workflows.len(),
            templates = snapshot.templates.len(),
            credentials = snapshot.credentials.len(),
            sessions = snapshot.memory.len(),
            "state saved"
        );
        Ok(())
    }

    /// Replaces engine state with the persisted snapshot.
    ///
    /// Returns false if nothing has been saved yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read or decoded.
    pub async fn restore(&self) -> Result<bool, EngineError> {
        let Some(bytes) = self.inner.blobs.load(STATE_KEY).await? else {
            return Ok(false);
        };
        let snapshot = StateSnapshot::from_bytes(&bytes)?;
        let workflows = snapshot.workflows.len();

        self.inner
            .store
            .replace_all(snapshot.workflows, snapshot.templates)
            .await;
        let vault = self.inner.dispatcher.vault();
        for existing in vault.list().await {
            vault.remove(existing.id).await;
        }
        for credential in snapshot.credentials {
            vault.put(credential).await;
        }
        self.memory().restore(snapshot.memory).await;

        info!(workflows, "state restored");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{
        CodeParams, HttpRequestParams, MemoryParams, MemoryVariant, Node, NodeKind, SetParams,
        WaitParams, WaitUnit, WebhookParams,
    };
    use async_trait::async_trait;
    use flowloom_integration::{ConnectorError, CredentialType, HttpRequest, HttpResponse};
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    struct OkHttp;

    #[async_trait]
    impl HttpClient for OkHttp {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, ConnectorError> {
            let mut headers = BTreeMap::new();
            headers.insert("content-type".to_string(), "application/json".to_string());
            Ok(HttpResponse {
                status: 200,
                headers,
                body: br#"{"ok":true}"#.to_vec(),
            })
        }
    }

    struct SlowHttp(Duration);

    #[async_trait]
    impl HttpClient for SlowHttp {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ConnectorError> {
            tokio::time::sleep(self.0).await;
            OkHttp.send(request).await
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            sandbox_timeout_ms: 100,
            script_loop_limit: 1_000_000,
            ..EngineConfig::default()
        }
    }

    fn engine_with(config: EngineConfig) -> Engine {
        Engine::builder(config).with_http(Arc::new(OkHttp)).build()
    }

    fn engine() -> Engine {
        engine_with(config())
    }

    fn set(json: JsonValue) -> Node {
        Node::new(
            "Set",
            NodeKind::Set(SetParams {
                json,
                ..SetParams::default()
            }),
        )
    }

    fn wait_ms(ms: u64) -> Node {
        Node::new(
            "Wait",
            NodeKind::Wait(WaitParams {
                amount: json!(ms),
                unit: WaitUnit::Ms,
            }),
        )
    }

    fn webhook() -> Node {
        Node::new("Webhook", NodeKind::Webhook(WebhookParams::default()))
    }

    async fn chain(engine: &Engine, nodes: Vec<Node>) -> (WorkflowId, Vec<NodeId>) {
        let store = engine.store();
        let wf = store.create_workflow("Chain").await;
        let mut ids = Vec::new();
        for node in nodes {
            ids.push(store.add_node(wf, node).await.unwrap());
        }
        for pair in ids.windows(2) {
            store.connect(wf, pair[0], pair[1], None).await.unwrap();
        }
        (wf, ids)
    }

    async fn wait_for_status(engine: &Engine, wf: WorkflowId, node: NodeId, status: NodeStatus) {
        for _ in 0..400 {
            if engine.node_status(wf, node).await == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("node never reached {status}");
    }

    async fn wait_for_pause(engine: &Engine, node: NodeId) {
        for _ in 0..400 {
            if engine.paused_node() == Some(node) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("node never paused");
    }

    #[tokio::test]
    async fn webhook_set_http_run_succeeds() {
        let engine = engine();
        let http = Node::new(
            "HTTP",
            NodeKind::HttpRequest(HttpRequestParams {
                url: json!("https://example.com/hook"),
                ..HttpRequestParams::default()
            }),
        );
        let (wf, ids) = chain(&engine, vec![webhook(), set(json!({ "status": "ok" })), http]).await;

        let record = engine.run_workflow(wf).await.unwrap();
        assert_eq!(record.status, RunStatus::Success);
        assert!(record.stopped_at.is_some());

        let workflow = engine.workflow(wf).await.unwrap();
        let set_node = workflow.graph.get_node(ids[1]).unwrap();
        assert_eq!(
            set_node.runtime.last_result,
            Some(vec![vec![ExecutionItem::new(json!({ "status": "ok" }))]])
        );
        assert_eq!(record.data_snapshot[&ids[2]][0][0].json, json!({ "ok": true }));
        assert_eq!(engine.executions().await.len(), 1);
        assert!(!engine.is_executing());
    }

    #[tokio::test]
    async fn runaway_script_times_out_and_fails_run() {
        let engine = engine();
        let code = Node::new(
            "Loop",
            NodeKind::Code(CodeParams {
                script: "while (true) {}".to_string(),
            }),
        );
        let (wf, ids) = chain(&engine, vec![code]).await;

        let started = Instant::now();
        let record = engine.run_workflow(wf).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(2000));
        assert_eq!(record.status, RunStatus::Error);
        assert!(record.error.unwrap().contains("timed out"));
        assert_eq!(engine.node_status(wf, ids[0]).await, Some(NodeStatus::Error));
    }

    #[tokio::test]
    async fn schema_violation_names_missing_field_and_stops_descent() {
        let engine = engine();
        let mut invalid = set(json!({ "name": "x" }));
        if let NodeKind::Set(params) = &mut invalid.kind {
            params.schema = json!({ "required": ["id"] });
        }
        let (wf, ids) = chain(&engine, vec![invalid, set(json!({}))]).await;

        let record = engine.run_workflow(wf).await.unwrap();
        assert_eq!(record.status, RunStatus::Error);

        let workflow = engine.workflow(wf).await.unwrap();
        let failed = workflow.graph.get_node(ids[0]).unwrap();
        assert_eq!(failed.runtime.status, NodeStatus::Error);
        let message = &failed.runtime.last_error.as_ref().unwrap().message;
        assert!(message.contains("'id'"), "{message}");
        assert_eq!(
            workflow.graph.get_node(ids[1]).unwrap().runtime.status,
            NodeStatus::Idle
        );
    }

    #[tokio::test]
    async fn fan_out_runs_branches_concurrently() {
        let engine = engine();
        let store = engine.store();
        let wf = store.create_workflow("Fan").await;
        let a = store.add_node(wf, set(json!({ "n": 1 }))).await.unwrap();
        let b = store.add_node(wf, wait_ms(150)).await.unwrap();
        let c = store.add_node(wf, wait_ms(150)).await.unwrap();
        store.connect(wf, a, b, None).await.unwrap();
        store.connect(wf, a, c, None).await.unwrap();

        let started = Instant::now();
        let record = engine.run_workflow(wf).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(290));
        assert_eq!(record.status, RunStatus::Success);
        assert_eq!(engine.node_status(wf, b).await, Some(NodeStatus::Success));
        assert_eq!(engine.node_status(wf, c).await, Some(NodeStatus::Success));
        assert!(record.data_snapshot.contains_key(&b));
        assert!(record.data_snapshot.contains_key(&c));
    }

    #[tokio::test]
    async fn failure_stops_scheduling_but_siblings_finish() {
        let engine = engine();
        let store = engine.store();
        let wf = store.create_workflow("Siblings").await;
        let a = store.add_node(wf, set(json!({}))).await.unwrap();
        let broken = store
            .add_node(wf, Node::new("Broken", NodeKind::HttpRequest(HttpRequestParams::default())))
            .await
            .unwrap();
        let slow = store.add_node(wf, wait_ms(80)).await.unwrap();
        let after = store.add_node(wf, set(json!({}))).await.unwrap();
        store.connect(wf, a, broken, None).await.unwrap();
        store.connect(wf, a, slow, None).await.unwrap();
        store.connect(wf, slow, after, None).await.unwrap();

        let record = engine.run_workflow(wf).await.unwrap();
        assert_eq!(record.status, RunStatus::Error);
        assert_eq!(record.error.as_deref(), Some("URL is required"));
        assert_eq!(engine.node_status(wf, slow).await, Some(NodeStatus::Success));
        assert_eq!(engine.node_status(wf, after).await, Some(NodeStatus::Idle));
    }

    #[tokio::test]
    async fn second_run_is_rejected_while_one_is_in_flight() {
        let engine = engine();
        let (wf, ids) = chain(&engine, vec![wait_ms(200)]).await;

        let running = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_workflow(wf).await }
        });
        wait_for_status(&engine, wf, ids[0], NodeStatus::Executing).await;

        assert_eq!(engine.run_workflow(wf).await.unwrap_err(), EngineError::RunInFlight);
        assert_eq!(
            engine.run_node_instance(wf, ids[0]).await.unwrap_err(),
            EngineError::RunInFlight
        );
        assert_eq!(running.await.unwrap().unwrap().status, RunStatus::Success);
        assert_eq!(engine.executions().await.len(), 1);
    }

    #[tokio::test]
    async fn debug_mode_steps_one_node_at_a_time() {
        let engine = engine();
        let (wf, ids) = chain(&engine, vec![set(json!({ "a": 1 })), set(json!({ "b": 2 }))]).await;
        assert!(engine.toggle_debug_mode());

        let running = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_workflow(wf).await }
        });

        wait_for_pause(&engine, ids[0]).await;
        assert_eq!(engine.node_status(wf, ids[0]).await, Some(NodeStatus::Waiting));
        assert_eq!(engine.node_status(wf, ids[1]).await, Some(NodeStatus::Idle));

        assert_eq!(engine.step(), Some(ids[0]));
        wait_for_pause(&engine, ids[1]).await;
        assert_eq!(engine.node_status(wf, ids[0]).await, Some(NodeStatus::Success));

        assert_eq!(engine.resume(), 1);
        let record = running.await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Success);
        assert!(engine.is_debug_mode());
    }

    #[tokio::test]
    async fn abort_interrupts_wait_and_resets_statuses() {
        let engine = engine();
        let (wf, ids) = chain(&engine, vec![wait_ms(10_000), set(json!({}))]).await;

        let running = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_workflow(wf).await }
        });
        wait_for_status(&engine, wf, ids[0], NodeStatus::Executing).await;

        assert!(engine.abort_execution().await);
        let record = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("run stops after abort")
            .unwrap()
            .unwrap();
        assert_eq!(record.status, RunStatus::Error);
        assert_eq!(record.error.as_deref(), Some("aborted"));
        assert_eq!(engine.node_status(wf, ids[0]).await, Some(NodeStatus::Idle));
        assert_eq!(engine.node_status(wf, ids[1]).await, Some(NodeStatus::Idle));
        assert!(!engine.is_executing());
        assert!(!engine.abort_execution().await);
    }

    #[tokio::test]
    async fn abort_releases_debug_pause() {
        let engine = engine();
        let (wf, ids) = chain(&engine, vec![set(json!({}))]).await;
        engine.toggle_debug_mode();

        let running = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_workflow(wf).await }
        });
        wait_for_pause(&engine, ids[0]).await;
        engine.abort_execution().await;

        let record = running.await.unwrap().unwrap();
        assert_eq!(record.error.as_deref(), Some("aborted"));
        assert_eq!(engine.paused_node(), None);
    }

    #[tokio::test]
    async fn abort_lets_dispatched_node_finish_but_schedules_nothing_more() {
        let engine = Engine::builder(config())
            .with_http(Arc::new(SlowHttp(Duration::from_millis(150))))
            .build();
        let http = Node::new(
            "HTTP",
            NodeKind::HttpRequest(HttpRequestParams {
                url: json!("https://example.com/slow"),
                ..HttpRequestParams::default()
            }),
        );
        let (wf, ids) = chain(&engine, vec![http, set(json!({ "after": true }))]).await;

        let running = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_workflow(wf).await }
        });
        wait_for_status(&engine, wf, ids[0], NodeStatus::Executing).await;
        assert!(engine.abort_execution().await);

        let record = running.await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Error);
        assert_eq!(record.error.as_deref(), Some("aborted"));
        assert_eq!(engine.node_status(wf, ids[0]).await, Some(NodeStatus::Success));
        assert_eq!(record.data_snapshot[&ids[0]][0][0].json, json!({ "ok": true }));
        assert_eq!(engine.node_status(wf, ids[1]).await, Some(NodeStatus::Idle));
        assert!(!record.data_snapshot.contains_key(&ids[1]));
    }

    #[tokio::test]
    async fn turning_debug_off_never_strands_a_run() {
        let engine = engine();
        let (wf, ids) = chain(&engine, vec![webhook(), set(json!({}))]).await;

        // Toggle off at varying points relative to the first breakpoint.
        for delay_ms in [0, 1, 2, 5, 10] {
            assert!(engine.toggle_debug_mode());
            let running = tokio::spawn({
                let engine = engine.clone();
                async move { engine.run_workflow(wf).await }
            });
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            assert!(!engine.toggle_debug_mode());

            let record = tokio::time::timeout(Duration::from_secs(2), running)
                .await
                .expect("run finishes after debug mode is turned off")
                .unwrap()
                .unwrap();
            assert_eq!(record.status, RunStatus::Success);
            assert_eq!(engine.paused_node(), None);
            assert_eq!(engine.node_status(wf, ids[1]).await, Some(NodeStatus::Success));
        }

        assert!(engine.toggle_debug_mode());
        let running = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_workflow(wf).await }
        });
        wait_for_pause(&engine, ids[0]).await;
        assert!(!engine.toggle_debug_mode());
        let record = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("paused run resumes when debug mode is turned off")
            .unwrap()
            .unwrap();
        assert_eq!(record.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn cycles_are_bounded_by_step_budget() {
        let engine = engine_with(EngineConfig {
            max_steps_per_run: 20,
            ..config()
        });
        let store = engine.store();
        let wf = store.create_workflow("Loop").await;
        let trigger = store.add_node(wf, webhook()).await.unwrap();
        let a = store.add_node(wf, set(json!({}))).await.unwrap();
        let b = store.add_node(wf, set(json!({}))).await.unwrap();
        store.connect(wf, trigger, a, None).await.unwrap();
        store.connect(wf, a, b, None).await.unwrap();
        store.connect(wf, b, a, None).await.unwrap();

        let record = engine.run_workflow(wf).await.unwrap();
        assert_eq!(record.status, RunStatus::Error);
        assert!(record.error.unwrap().contains("budget of 20"));
    }

    #[tokio::test]
    async fn single_node_runs_do_not_descend_or_log() {
        let engine = engine();
        let echo = Node::new(
            "Echo",
            NodeKind::Set(SetParams {
                fields: vec![crate::node::FieldAssignment {
                    key: json!("seen"),
                    value: json!("{{ $execution.mode }}"),
                }],
                ..SetParams::default()
            }),
        );
        let (wf, ids) = chain(&engine, vec![echo, set(json!({}))]).await;

        let runtime = engine.run_node_instance(wf, ids[0]).await.unwrap();
        assert_eq!(runtime.status, NodeStatus::Success);
        let item = &runtime.last_result.unwrap()[0][0];
        assert_eq!(item.json, json!({ "trigger": "isolation", "seen": "isolation" }));

        let runtime = engine.retry_node(wf, ids[0]).await.unwrap();
        let item = &runtime.last_result.unwrap()[0][0];
        assert_eq!(item.json, json!({ "retry": true, "seen": "retry" }));

        assert_eq!(engine.node_status(wf, ids[1]).await, Some(NodeStatus::Idle));
        assert!(engine.executions().await.is_empty());
        assert!(matches!(
            engine.run_node_instance(wf, NodeId::new()).await,
            Err(EngineError::NodeNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn events_report_run_lifecycle() {
        let engine = engine();
        let mut events = engine.subscribe();
        let (wf, ids) = chain(&engine, vec![set(json!({}))]).await;
        engine.run_workflow(wf).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(matches!(seen.first(), Some(EngineEvent::RunStarted { .. })));
        assert!(matches!(
            seen.last(),
            Some(EngineEvent::RunFinished {
                status: RunStatus::Success,
                ..
            })
        ));
        assert!(seen.iter().any(|e| matches!(
            e,
            EngineEvent::NodeStatusChanged { node_id, status: NodeStatus::Success, .. } if *node_id == ids[0]
        )));
    }

    #[tokio::test]
    async fn run_log_is_capacity_bounded() {
        let engine = engine_with(EngineConfig {
            run_log_capacity: 2,
            ..config()
        });
        let (wf, _) = chain(&engine, vec![set(json!({}))]).await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(engine.run_workflow(wf).await.unwrap().id);
        }
        let records: Vec<_> = engine.executions().await.into_iter().map(|r| r.id).collect();
        assert_eq!(records, ids[1..].to_vec());

        engine.clear_executions().await;
        assert!(engine.executions().await.is_empty());
    }

    #[tokio::test]
    async fn save_and_restore_round_trip() {
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let engine = Engine::builder(config())
            .with_blob_store(blobs.clone())
            .build();
        let (wf, _) = chain(&engine, vec![webhook(), set(json!({ "k": 1 }))]).await;
        let credential_id = engine
            .add_credential(Credential::new("API", CredentialType::ApiKey).with_secret("token", "t"))
            .await;
        engine
            .set_credential_status(credential_id, CredentialStatus::Invalid)
            .await
            .unwrap();

        let remember = |variant, session: &str| {
            Node::new(
                "Memory",
                NodeKind::Memory(MemoryParams {
                    variant,
                    session_id: json!(session),
                    ..MemoryParams::default()
                }),
            )
        };
        let (mem_wf, _) = chain(
            &engine,
            vec![
                remember(MemoryVariant::DurableStore, "kept"),
                remember(MemoryVariant::WindowBuffer, "dropped"),
            ],
        )
        .await;
        engine.run_workflow(mem_wf).await.unwrap();
        engine.save().await.unwrap();

        let restored = Engine::builder(config()).with_blob_store(blobs).build();
        assert!(restored.restore().await.unwrap());
        let (before, after) = (
            engine.workflow(wf).await.unwrap(),
            restored.workflow(wf).await.unwrap(),
        );
        assert_eq!(after.name(), before.name());
        assert_eq!(after.graph.node_count(), 2);
        assert_eq!(after.graph.edge_count(), 1);
        let credentials = restored.credentials().await;
        assert_eq!(credentials.len(), 1);
        assert_eq!(credentials[0].status, CredentialStatus::Invalid);
        assert_eq!(restored.memory().sessions().await, vec!["kept".to_string()]);

        let empty = Engine::builder(config()).build();
        assert!(!empty.restore().await.unwrap());
    }
}
