//! Node dispatcher.
//!
//! One exhaustive match over [`NodeKind`] executes a node against its input
//! batch and returns the output batch plus the branch label that selects
//! outgoing edges. Handlers resolve their parameters per item (transforms)
//! or against the first item (control flow and external calls).

use crate::config::EngineConfig;
use crate::error::NodeError;
use crate::expression::{ExpressionContext, resolve, resolve_deep};
use crate::item::{BinaryData, ExecutionItem, first_payload, wrap_in_items};
use crate::node::{
    CodeParams, FilterOperator, FilterParams, HttpRequestParams, JsonParserParams, LimitParams,
    MemoryParams, MemoryVariant, ModelCallParams, ModelVariant, Node, NodeKind, SetParams,
    SortParams, SplitBatchesParams, SshParams, SwitchParams, WaitParams, WaitUnit,
};
use crate::sandbox::ScriptSandbox;
use crate::schema;
use crate::value::{display_string, lookup_path, loose_eq, sort_cmp, to_number};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flowloom_ai::{ModelImage, ModelProvider, ModelRequest};
use flowloom_conversation::{MemoryStore, Message, MessageRole};
use flowloom_core::{WorkflowId, WorkflowRunId};
use flowloom_integration::{
    CredentialError, CredentialVault, HttpClient, HttpMethod, HttpRequest, HttpResponse,
    RemoteShell, ShellTarget,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Branch emitted by nodes without a routing decision.
pub const DEFAULT_BRANCH: &str = "default";

/// MIME type assumed for inline base64 images.
const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Longest response body quoted in an HTTP status error.
const ERROR_BODY_LIMIT: usize = 500;

/// Why a node is being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Part of a full workflow run.
    Workflow,
    /// A single node run on its own.
    Isolation,
    /// A single node re-run after a failure.
    Retry,
}

impl ExecutionMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::Isolation => "isolation",
            Self::Retry => "retry",
        }
    }
}

/// Per-run information handed to every node.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub run_id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    pub mode: ExecutionMode,
    /// Cancelled when the run is aborted.
    pub abort: CancellationToken,
}

impl DispatchContext {
    #[must_use]
    pub fn new(run_id: WorkflowRunId, workflow_id: WorkflowId, mode: ExecutionMode) -> Self {
        Self {
            run_id,
            workflow_id,
            mode,
            abort: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    /// Expression context for one item payload.
    #[must_use]
    pub fn expression(&self, json: JsonValue) -> ExpressionContext {
        ExpressionContext::new(json).with_execution(json!({
            "id": self.run_id.to_string(),
            "mode": self.mode.as_str(),
            "workflowId": self.workflow_id.to_string(),
        }))
    }
}

/// Result of executing one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutput {
    pub items: Vec<ExecutionItem>,
    /// Branch label selecting outgoing edges.
    pub branch: String,
}

impl NodeOutput {
    /// Output on the default branch.
    #[must_use]
    pub fn new(items: Vec<ExecutionItem>) -> Self {
        Self::on(items, DEFAULT_BRANCH)
    }

    /// Output on a named branch.
    #[must_use]
    pub fn on(items: Vec<ExecutionItem>, branch: impl Into<String>) -> Self {
        Self {
            items,
            branch: branch.into(),
        }
    }
}

/// Executes nodes by kind using the engine's collaborators.
#[derive(Clone)]
pub struct NodeDispatcher {
    http: Arc<dyn HttpClient>,
    shell: Arc<dyn RemoteShell>,
    model: Arc<dyn ModelProvider>,
    vault: Arc<dyn CredentialVault>,
    memory: MemoryStore,
    sandbox: ScriptSandbox,
    config: EngineConfig,
}

impl NodeDispatcher {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        http: Arc<dyn HttpClient>,
        shell: Arc<dyn RemoteShell>,
        model: Arc<dyn ModelProvider>,
        vault: Arc<dyn CredentialVault>,
        memory: MemoryStore,
    ) -> Self {
        let sandbox = ScriptSandbox::new(config.sandbox_timeout(), config.script_loop_limit);
        Self {
            http,
            shell,
            model,
            vault,
            memory,
            sandbox,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    #[must_use]
    pub fn vault(&self) -> &Arc<dyn CredentialVault> {
        &self.vault
    }

    /// Executes `node` on `items`.
    ///
    /// # Errors
    ///
    /// Returns the handler's failure. Any error is fatal to the run.
    #[instrument(skip_all, fields(node_id = %node.id, node_type = node.kind.type_name()))]
    pub async fn execute(
        &self,
        node: &Node,
        items: Vec<ExecutionItem>,
        ctx: &DispatchContext,
    ) -> Result<NodeOutput, NodeError> {
        let output = match &node.kind {
            NodeKind::Webhook(_) | NodeKind::Cron(_) | NodeKind::Merge => NodeOutput::new(items),
            NodeKind::Set(params) => NodeOutput::new(set(params, &items, ctx)?),
            NodeKind::Code(params) => NodeOutput::new(self.code(params, &items).await?),
            NodeKind::JsonParser(params) => NodeOutput::new(json_parser(params, &items, ctx)?),
            NodeKind::Filter(params) => filter(params, items, ctx),
            NodeKind::Switch(params) => switch(params, items, ctx),
            NodeKind::Wait(params) => {
                wait(params, &items, ctx).await?;
                NodeOutput::new(items)
            }
            NodeKind::Limit(params) => NodeOutput::new(limit(params, items, ctx)),
            NodeKind::Sort(params) => NodeOutput::new(sort(params, items, ctx)),
            NodeKind::SplitBatches(params) => NodeOutput::new(split_batches(params, items, ctx)),
            NodeKind::HttpRequest(params) => {
                NodeOutput::new(self.http_request(params, &items, ctx).await?)
            }
            NodeKind::Ssh(params) => NodeOutput::new(self.ssh(params, &items, ctx).await?),
            NodeKind::ModelCall(params) => {
                NodeOutput::new(self.model_call(params, &items, ctx).await?)
            }
            NodeKind::Memory(params) => NodeOutput::new(self.remember(params, &items, ctx).await?),
        };
        debug!(branch = %output.branch, items = output.items.len(), "node dispatched");
        Ok(output)
    }

    async fn code(
        &self,
        params: &CodeParams,
        items: &[ExecutionItem],
    ) -> Result<Vec<ExecutionItem>, NodeError> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let result = self.sandbox.run(&params.script, &item.json).await?;
            out.push(item.derive(result));
        }
        Ok(out)
    }

    /// Runs an external call under the configured timeout.
    async fn bounded<T, E>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, NodeError>
    where
        NodeError: From<E>,
    {
        match tokio::time::timeout(self.config.external_call_timeout(), call).await {
            Ok(result) => result.map_err(NodeError::from),
            Err(_) => Err(NodeError::Timeout {
                operation: operation.to_string(),
                timeout_ms: self.config.external_call_timeout_ms,
            }),
        }
    }

    async fn http_request(
        &self,
        params: &HttpRequestParams,
        items: &[ExecutionItem],
        ctx: &DispatchContext,
    ) -> Result<Vec<ExecutionItem>, NodeError> {
        let ectx = ctx.expression(first_payload(items));
        let url = resolve_text(&params.url, &ectx);
        if url.trim().is_empty() {
            return Err(NodeError::MissingParameter {
                name: "URL".to_string(),
            });
        }
        let method: HttpMethod = resolve_text(&params.method, &ectx).parse()?;

        let mut request = HttpRequest::new(method, url.trim());
        for (name, value) in &params.headers {
            request = request.with_header(name.clone(), resolve_text(value, &ectx));
        }
        let body = resolve_deep(&params.body, &ectx);
        if !body.is_null() {
            request = request.with_body(body);
        }
        if let Some(id) = params.credential_id {
            let credential = self.vault.get(id).await?;
            let token = credential
                .bearer_token()
                .ok_or_else(|| CredentialError::MissingSecret {
                    id,
                    key: "token".to_string(),
                })?;
            request = request.with_bearer(token);
        }

        debug!(method = %request.method, url = %request.url, "sending HTTP request");
        let response = self.bounded("HTTP request", self.http.send(request)).await?;
        if !response.is_success() {
            let body: String = String::from_utf8_lossy(&response.body)
                .chars()
                .take(ERROR_BODY_LIMIT)
                .collect();
            return Err(NodeError::HttpStatus {
                status: response.status,
                body,
            });
        }
        Ok(response_items(response))
    }

    async fn ssh(
        &self,
        params: &SshParams,
        items: &[ExecutionItem],
        ctx: &DispatchContext,
    ) -> Result<Vec<ExecutionItem>, NodeError> {
        let ectx = ctx.expression(first_payload(items));
        let host = resolve_text(&params.host, &ectx);
        if host.trim().is_empty() {
            return Err(NodeError::MissingParameter {
                name: "host".to_string(),
            });
        }
        let command = resolve_text(&params.command, &ectx);
        if command.trim().is_empty() {
            return Err(NodeError::MissingParameter {
                name: "command".to_string(),
            });
        }

        let credential = match params.credential_id {
            Some(id) => Some(self.vault.get(id).await?),
            None => None,
        };

        let mut username = resolve_text(&params.username, &ectx);
        if username.is_empty() {
            if let Some(credential) = &credential {
                username = credential.require_secret("username")?.to_string();
            }
        }
        if username.is_empty() {
            return Err(NodeError::MissingParameter {
                name: "username".to_string(),
            });
        }

        let port = match resolve_text(&params.port, &ectx) {
            text if !text.is_empty() => Some(text),
            _ => credential
                .as_ref()
                .and_then(|c| c.secret("port"))
                .map(str::to_string),
        };
        let port = match port {
            Some(text) => text
                .trim()
                .parse::<u16>()
                .map_err(|_| NodeError::InvalidParameter {
                    name: "port".to_string(),
                    reason: format!("'{text}' is not a valid port"),
                })?,
            None => 22,
        };

        let mut target = ShellTarget::new(host.trim(), username).with_port(port);
        let identity = credential
            .as_ref()
            .and_then(|c| c.secret("identityFile").or_else(|| c.secret("privateKeyPath")));
        if let Some(path) = identity {
            target = target.with_identity_file(path);
        }

        debug!(host = %target.host, port = target.port, "running remote command");
        let output = self
            .bounded("SSH command", self.shell.exec(&target, &command))
            .await?;
        Ok(vec![ExecutionItem::new(json!({
            "stdout": output.stdout,
            "stderr": output.stderr,
            "exitCode": output.exit_code,
            "host": target.host,
        }))])
    }

    async fn model_call(
        &self,
        params: &ModelCallParams,
        items: &[ExecutionItem],
        ctx: &DispatchContext,
    ) -> Result<Vec<ExecutionItem>, NodeError> {
        let ectx = ctx.expression(first_payload(items));
        let text = resolve_text(&params.prompt, &ectx);
        if text.trim().is_empty() && params.variant != ModelVariant::Vision {
            return Err(NodeError::MissingParameter {
                name: "prompt".to_string(),
            });
        }

        let prompt = match params.variant {
            ModelVariant::Summarization => {
                format!("Summarize the following text concisely:\n\n{text}")
            }
            ModelVariant::QuestionAnswer => {
                let context = resolve_text(&params.context, &ectx);
                format!(
                    "Answer the question using only the context below.\n\nContext:\n{context}\n\nQuestion: {text}"
                )
            }
            ModelVariant::Chat | ModelVariant::Vision => text,
        };

        let mut request = ModelRequest::new(prompt);
        let system = resolve_text(&params.system, &ectx);
        if !system.is_empty() {
            request = request.with_system(system);
        }
        if let Some(model) = &params.model {
            request = request.with_model(model.clone());
        }
        if let Some(temperature) = params.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = params.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        if params.variant == ModelVariant::Vision {
            let image = resolve_text(&params.image, &ectx);
            let image = if image.is_empty() {
                let name = params.binary_property.as_deref().unwrap_or("data");
                items
                    .first()
                    .and_then(|item| item.binary.get(name))
                    .map(|binary| ModelImage {
                        mime_type: binary.mime_type.clone(),
                        data: binary.data.clone(),
                    })
            } else {
                Some(ModelImage {
                    mime_type: DEFAULT_IMAGE_MIME.to_string(),
                    data: image,
                })
            };
            let image = image.ok_or_else(|| NodeError::MissingParameter {
                name: "image".to_string(),
            })?;
            request = request.with_image(image);
        }

        let session = resolve_text(&params.session_id, &ectx);
        if !session.is_empty() {
            request = request.with_context(self.memory.history(&session).await);
        }

        debug!(provider = self.model.name(), context = request.context.len(), "calling model");
        let response = self
            .bounded("model call", self.model.generate(&request))
            .await?;
        Ok(vec![ExecutionItem::new(json!({
            "response": response.content,
            "model": response.model,
            "usage": {
                "inputTokens": response.usage.input_tokens,
                "outputTokens": response.usage.output_tokens,
                "totalTokens": response.usage.total(),
            },
        }))])
    }

    async fn remember(
        &self,
        params: &MemoryParams,
        items: &[ExecutionItem],
        ctx: &DispatchContext,
    ) -> Result<Vec<ExecutionItem>, NodeError> {
        let window = params.window.unwrap_or(self.config.memory_window);
        let durable = params.variant == MemoryVariant::DurableStore;

        let mut session_id = resolve_text(&params.session_id, &ctx.expression(first_payload(items)));
        let mut stored = 0usize;
        let mut size = self
            .memory
            .buffer(&session_id)
            .await
            .map_or(0, |buffer| buffer.len());

        for item in items {
            let ectx = ctx.expression(item.json.clone());
            session_id = resolve_text(&params.session_id, &ectx);
            let role = match resolve_text(&params.role, &ectx) {
                role if role.is_empty() => MessageRole::User,
                role => role
                    .parse::<MessageRole>()
                    .map_err(|reason| NodeError::InvalidParameter {
                        name: "role".to_string(),
                        reason,
                    })?,
            };
            let text = match &params.text {
                JsonValue::Null => display_string(Some(&item.json)),
                value => resolve_text(value, &ectx),
            };
            size = self
                .memory
                .append(&session_id, Message::new(role, text), window, durable)
                .await?;
            stored += 1;
        }

        Ok(vec![ExecutionItem::new(json!({
            "sessionId": session_id,
            "stored": stored,
            "size": size,
            "durable": durable,
        }))])
    }
}

/// Resolves a parameter to text; null and missing become empty.
fn resolve_text(value: &JsonValue, ctx: &ExpressionContext) -> String {
    match resolve(value, ctx) {
        JsonValue::Null => String::new(),
        other => display_string(Some(&other)),
    }
}

/// Resolves a positive count; NaN, zero and negatives fall back to `default`.
fn resolve_count(value: &JsonValue, ctx: &ExpressionContext, default: usize) -> usize {
    match to_number(Some(&resolve(value, ctx))) {
        Some(n) if n >= 1.0 => n.floor() as usize,
        _ => default,
    }
}

/// The single item of a batch together with its array payload.
fn single_array(items: &[ExecutionItem]) -> Option<(&ExecutionItem, &Vec<JsonValue>)> {
    match items {
        [only] => only.json.as_array().map(|elements| (only, elements)),
        _ => None,
    }
}

fn set(
    params: &SetParams,
    items: &[ExecutionItem],
    ctx: &DispatchContext,
) -> Result<Vec<ExecutionItem>, NodeError> {
    items
        .iter()
        .map(|item| {
            let ectx = ctx.expression(item.json.clone());
            let literal = matches!(&params.json, JsonValue::String(raw) if !raw.contains("{{"));
            let mut payload = match resolve_deep(&params.json, &ectx) {
                JsonValue::Null => item.json.clone(),
                JsonValue::String(text) if literal => {
                    serde_json::from_str(&text).map_err(|e| NodeError::JsonParse {
                        reason: e.to_string(),
                    })?
                }
                other => other,
            };

            for field in &params.fields {
                let key = resolve_text(&field.key, &ectx);
                if key.is_empty() {
                    continue;
                }
                let value = resolve_deep(&field.value, &ectx);
                if !payload.is_object() {
                    payload = json!({ "value": payload });
                }
                if let JsonValue::Object(map) = &mut payload {
                    map.insert(key, value);
                }
            }

            schema::validate(&payload, &params.schema)?;
            Ok(item.derive(payload))
        })
        .collect()
}

fn json_parser(
    params: &JsonParserParams,
    items: &[ExecutionItem],
    ctx: &DispatchContext,
) -> Result<Vec<ExecutionItem>, NodeError> {
    items
        .iter()
        .map(|item| {
            let ectx = ctx.expression(item.json.clone());
            let parsed = match resolve(&params.json_string, &ectx) {
                JsonValue::Null => JsonValue::Object(serde_json::Map::new()),
                JsonValue::String(raw) if raw.trim().is_empty() => {
                    JsonValue::Object(serde_json::Map::new())
                }
                JsonValue::String(raw) => {
                    serde_json::from_str(&raw).map_err(|e| NodeError::JsonParse {
                        reason: e.to_string(),
                    })?
                }
                structured => structured,
            };
            schema::validate(&parsed, &params.schema)?;
            Ok(item.derive(parsed))
        })
        .collect()
}

fn filter(params: &FilterParams, items: Vec<ExecutionItem>, ctx: &DispatchContext) -> NodeOutput {
    let payload = first_payload(&items);
    let ectx = ctx.expression(payload.clone());
    let operand = match &params.property {
        JsonValue::String(text) if text.contains("{{") => match resolve(&params.property, &ectx) {
            JsonValue::Null => None,
            value => Some(value),
        },
        JsonValue::String(path) => lookup_path(&payload, path).cloned(),
        JsonValue::Null => None,
        literal => Some(literal.clone()),
    };
    let expected = resolve(&params.compare_value, &ectx);

    let pass = match params.operator {
        FilterOperator::Equal => loose_eq(operand.as_ref(), Some(&expected)),
        FilterOperator::NotEqual => !loose_eq(operand.as_ref(), Some(&expected)),
        FilterOperator::Contains => match &operand {
            Some(JsonValue::Array(elements)) => elements
                .iter()
                .any(|e| loose_eq(Some(e), Some(&expected))),
            Some(value) => display_string(Some(value)).contains(&display_string(Some(&expected))),
            None => false,
        },
        FilterOperator::Exists => operand.is_some(),
    };
    NodeOutput::on(items, if pass { "true" } else { "false" })
}

fn switch(params: &SwitchParams, items: Vec<ExecutionItem>, ctx: &DispatchContext) -> NodeOutput {
    let ectx = ctx.expression(first_payload(&items));
    let value = resolve(&params.value, &ectx);
    // Rules are resolved lazily so later rules are never evaluated after a match.
    let branch = params
        .rules
        .iter()
        .position(|rule| !rule.is_null() && loose_eq(Some(&value), Some(&resolve(rule, &ectx))))
        .map_or_else(|| DEFAULT_BRANCH.to_string(), |i| format!("case_{}", i + 1));
    NodeOutput::on(items, branch)
}

async fn wait(
    params: &WaitParams,
    items: &[ExecutionItem],
    ctx: &DispatchContext,
) -> Result<(), NodeError> {
    let ectx = ctx.expression(first_payload(items));
    let amount = match to_number(Some(&resolve(&params.amount, &ectx))) {
        Some(n) if n != 0.0 => n.max(0.0),
        _ => 1.0,
    };
    let seconds = match params.unit {
        WaitUnit::Ms => amount / 1000.0,
        WaitUnit::Seconds => amount,
        WaitUnit::Minutes => amount * 60.0,
    };
    let duration =
        Duration::try_from_secs_f64(seconds).map_err(|e| NodeError::InvalidParameter {
            name: "amount".to_string(),
            reason: e.to_string(),
        })?;

    debug!(wait_ms = duration.as_millis(), "waiting");
    tokio::select! {
        () = tokio::time::sleep(duration) => Ok(()),
        () = ctx.abort.cancelled() => Err(NodeError::Cancelled),
    }
}

fn limit(params: &LimitParams, items: Vec<ExecutionItem>, ctx: &DispatchContext) -> Vec<ExecutionItem> {
    let count = resolve_count(&params.count, &ctx.expression(first_payload(&items)), 1);
    if let Some((item, elements)) = single_array(&items) {
        let kept = elements.iter().take(count).cloned().collect();
        return vec![item.derive(JsonValue::Array(kept))];
    }
    items.into_iter().take(count).collect()
}

fn sort(params: &SortParams, items: Vec<ExecutionItem>, ctx: &DispatchContext) -> Vec<ExecutionItem> {
    let key = match &params.key {
        JsonValue::Null => String::new(),
        other => display_string(Some(other)),
    };
    let key_of = |value: &JsonValue| -> Option<JsonValue> {
        if key.contains("{{") {
            match resolve(&JsonValue::String(key.clone()), &ctx.expression(value.clone())) {
                JsonValue::Null => None,
                resolved => Some(resolved),
            }
        } else {
            lookup_path(value, &key).cloned()
        }
    };
    // Items missing the key sort last in either direction.
    let keyed = |v: &Option<JsonValue>| !matches!(v, None | Some(JsonValue::Null));
    let order = |a: &Option<JsonValue>, b: &Option<JsonValue>| {
        let ordering = sort_cmp(a.as_ref(), b.as_ref());
        if params.descending && keyed(a) && keyed(b) {
            ordering.reverse()
        } else {
            ordering
        }
    };

    if let Some((item, elements)) = single_array(&items) {
        let mut keyed: Vec<_> = elements.iter().map(|e| (key_of(e), e.clone())).collect();
        keyed.sort_by(|a, b| order(&a.0, &b.0));
        let sorted = keyed.into_iter().map(|(_, e)| e).collect();
        return vec![item.derive(JsonValue::Array(sorted))];
    }

    let mut keyed: Vec<_> = items.into_iter().map(|i| (key_of(&i.json), i)).collect();
    keyed.sort_by(|a, b| order(&a.0, &b.0));
    keyed.into_iter().map(|(_, item)| item).collect()
}

fn split_batches(
    params: &SplitBatchesParams,
    items: Vec<ExecutionItem>,
    ctx: &DispatchContext,
) -> Vec<ExecutionItem> {
    let size = resolve_count(&params.batch_size, &ctx.expression(first_payload(&items)), 10);
    let elements: Vec<JsonValue> = match single_array(&items) {
        Some((_, elements)) => elements.clone(),
        None if items.len() > 1 => items.iter().map(|item| item.json.clone()).collect(),
        None => return items,
    };
    elements
        .chunks(size)
        .enumerate()
        .map(|(index, chunk)| {
            ExecutionItem::new(JsonValue::Array(chunk.to_vec())).with_paired_item(index)
        })
        .collect()
}

/// Converts a successful HTTP response into items.
fn response_items(response: HttpResponse) -> Vec<ExecutionItem> {
    let status = response.status;
    let declared = response.content_type().map(str::to_string);
    let try_json = response.is_json() || declared.is_none();

    if try_json {
        if let Ok(value) = serde_json::from_slice::<JsonValue>(&response.body) {
            return wrap_in_items(value);
        }
    }
    if try_json || response.is_text() {
        if let Ok(text) = std::str::from_utf8(&response.body) {
            return vec![ExecutionItem::new(json!({ "status": status, "body": text }))];
        }
    }

    let mime_type = declared.unwrap_or_else(|| "application/octet-stream".to_string());
    let size = response.body.len();
    let binary = BinaryData {
        data: STANDARD.encode(&response.body),
        mime_type: mime_type.clone(),
        file_name: None,
    };
    vec![
        ExecutionItem::new(json!({ "status": status, "mimeType": mime_type, "size": size }))
            .with_binary("data", binary),
    ]
}
