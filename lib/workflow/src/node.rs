//! Workflow node types and parameters.
//!
//! Each node kind carries its own parameter struct. Parameter values are
//! JSON: either literals or strings containing `{{ expr }}` templates that
//! are resolved per item at dispatch time.

use crate::item::ExecutionItem;
use chrono::{DateTime, Utc};
use flowloom_core::{CredentialId, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// Broad grouping of node kinds, used by palettes and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Entry points that initiate workflow execution.
    Trigger,
    /// Payload rewriting (set, code, json-parser).
    Transform,
    /// Branching, joining, pacing and batch shaping.
    ControlFlow,
    /// Calls to external services.
    Integration,
    /// Model inference.
    Ai,
    /// Conversational memory.
    Memory,
}

/// Webhook trigger parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebhookParams {
    pub path: String,
    pub method: String,
}

/// Cron trigger parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CronParams {
    pub expression: String,
}

/// A single key/value assignment for the `set` node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldAssignment {
    pub key: JsonValue,
    pub value: JsonValue,
}

/// `set` node parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SetParams {
    /// Replacement payload. Null keeps the incoming payload.
    pub json: JsonValue,
    /// Fields merged into the payload after replacement.
    pub fields: Vec<FieldAssignment>,
    /// Optional schema the final payload must satisfy.
    pub schema: JsonValue,
}

/// `code` node parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CodeParams {
    pub script: String,
}

/// `json-parser` node parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JsonParserParams {
    /// JSON text to parse, usually a template.
    pub json_string: JsonValue,
    pub schema: JsonValue,
}

/// Comparison applied by the `filter` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    #[default]
    Equal,
    NotEqual,
    Contains,
    Exists,
}

/// `filter` node parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterParams {
    /// A dot-path into the first item, or a template yielding the operand.
    pub property: JsonValue,
    pub operator: FilterOperator,
    pub compare_value: JsonValue,
}

/// `switch` node parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SwitchParams {
    pub value: JsonValue,
    /// Compared in order; rule `i` routes to `case_{i+1}`.
    pub rules: Vec<JsonValue>,
}

impl Default for SwitchParams {
    fn default() -> Self {
        Self {
            value: JsonValue::Null,
            rules: vec![JsonValue::Null; 3],
        }
    }
}

/// Time unit for the `wait` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUnit {
    Ms,
    #[default]
    Seconds,
    Minutes,
}

/// `wait` node parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WaitParams {
    /// Duration in `unit`s; defaults to 1.
    pub amount: JsonValue,
    pub unit: WaitUnit,
}

/// `limit` node parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LimitParams {
    /// Maximum items kept; defaults to 1.
    pub count: JsonValue,
}

/// `sort` node parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SortParams {
    /// A dot-path or template evaluated per element. Empty sorts by value.
    pub key: JsonValue,
    pub descending: bool,
}

/// `split-batches` node parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SplitBatchesParams {
    /// Elements per batch; defaults to 10.
    pub batch_size: JsonValue,
}

/// `http-request` node parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpRequestParams {
    pub url: JsonValue,
    pub method: JsonValue,
    pub headers: BTreeMap<String, JsonValue>,
    pub body: JsonValue,
    /// Credential providing a bearer token.
    pub credential_id: Option<CredentialId>,
}

/// `ssh` node parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SshParams {
    pub host: JsonValue,
    pub port: JsonValue,
    pub username: JsonValue,
    pub command: JsonValue,
    /// Credential providing username, port and identity file.
    pub credential_id: Option<CredentialId>,
}

/// Flavor of a model-call node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelVariant {
    #[default]
    Chat,
    Vision,
    Summarization,
    QuestionAnswer,
}

/// `model-call` node parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelCallParams {
    pub variant: ModelVariant,
    /// Prompt, text to summarize, or question, depending on the variant.
    pub prompt: JsonValue,
    pub system: JsonValue,
    /// Reference text for question answering.
    pub context: JsonValue,
    /// Image as base64 or URL for vision calls.
    pub image: JsonValue,
    /// Binary attachment used when `image` is empty.
    pub binary_property: Option<String>,
    /// Memory session whose history is prepended.
    pub session_id: JsonValue,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Flavor of a memory node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryVariant {
    /// In-process window, lost on restart.
    #[default]
    WindowBuffer,
    /// Window included in persisted snapshots.
    DurableStore,
}

/// Memory node parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoryParams {
    pub variant: MemoryVariant,
    pub session_id: JsonValue,
    /// Message role; defaults to `user`.
    pub role: JsonValue,
    /// Message text; defaults to the item payload.
    pub text: JsonValue,
    /// Messages retained; defaults to the engine's memory window.
    pub window: Option<usize>,
}

/// The closed set of node kinds, each with typed parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "kebab-case")]
pub enum NodeKind {
    Webhook(WebhookParams),
    Cron(CronParams),
    Set(SetParams),
    Code(CodeParams),
    JsonParser(JsonParserParams),
    Filter(FilterParams),
    Switch(SwitchParams),
    Merge,
    Wait(WaitParams),
    Limit(LimitParams),
    Sort(SortParams),
    SplitBatches(SplitBatchesParams),
    HttpRequest(HttpRequestParams),
    Ssh(SshParams),
    ModelCall(ModelCallParams),
    Memory(MemoryParams),
}

impl NodeKind {
    /// Every type name, in palette order.
    pub const TYPE_NAMES: &'static [&'static str] = &[
        "webhook",
        "cron",
        "set",
        "code",
        "json-parser",
        "filter",
        "switch",
        "merge",
        "wait",
        "limit",
        "sort",
        "split-batches",
        "http-request",
        "ssh",
        "model-call",
        "memory",
    ];

    /// Creates a kind with default parameters from its type name.
    #[must_use]
    pub fn from_type_name(name: &str) -> Option<Self> {
        let kind = match name {
            "webhook" => Self::Webhook(WebhookParams::default()),
            "cron" => Self::Cron(CronParams::default()),
            "set" => Self::Set(SetParams::default()),
            "code" => Self::Code(CodeParams::default()),
            "json-parser" => Self::JsonParser(JsonParserParams::default()),
            "filter" => Self::Filter(FilterParams::default()),
            "switch" => Self::Switch(SwitchParams::default()),
            "merge" => Self::Merge,
            "wait" => Self::Wait(WaitParams::default()),
            "limit" => Self::Limit(LimitParams::default()),
            "sort" => Self::Sort(SortParams::default()),
            "split-batches" => Self::SplitBatches(SplitBatchesParams::default()),
            "http-request" => Self::HttpRequest(HttpRequestParams::default()),
            "ssh" => Self::Ssh(SshParams::default()),
            "model-call" => Self::ModelCall(ModelCallParams::default()),
            "memory" => Self::Memory(MemoryParams::default()),
            _ => return None,
        };
        Some(kind)
    }

    /// Returns the serialized type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Webhook(_) => "webhook",
            Self::Cron(_) => "cron",
            Self::Set(_) => "set",
            Self::Code(_) => "code",
            Self::JsonParser(_) => "json-parser",
            Self::Filter(_) => "filter",
            Self::Switch(_) => "switch",
            Self::Merge => "merge",
            Self::Wait(_) => "wait",
            Self::Limit(_) => "limit",
            Self::Sort(_) => "sort",
            Self::SplitBatches(_) => "split-batches",
            Self::HttpRequest(_) => "http-request",
            Self::Ssh(_) => "ssh",
            Self::ModelCall(_) => "model-call",
            Self::Memory(_) => "memory",
        }
    }

    #[must_use]
    pub const fn category(&self) -> NodeCategory {
        match self {
            Self::Webhook(_) | Self::Cron(_) => NodeCategory::Trigger,
            Self::Set(_) | Self::Code(_) | Self::JsonParser(_) => NodeCategory::Transform,
            Self::Filter(_)
            | Self::Switch(_)
            | Self::Merge
            | Self::Wait(_)
            | Self::Limit(_)
            | Self::Sort(_)
            | Self::SplitBatches(_) => NodeCategory::ControlFlow,
            Self::HttpRequest(_) | Self::Ssh(_) => NodeCategory::Integration,
            Self::ModelCall(_) => NodeCategory::Ai,
            Self::Memory(_) => NodeCategory::Memory,
        }
    }

    #[must_use]
    pub const fn is_trigger(&self) -> bool {
        matches!(self.category(), NodeCategory::Trigger)
    }

    /// Returns the branch labels this kind can emit.
    #[must_use]
    pub fn default_outputs(&self) -> Vec<String> {
        match self {
            Self::Filter(_) => vec!["true".to_string(), "false".to_string()],
            Self::Switch(params) => (1..=params.rules.len())
                .map(|i| format!("case_{i}"))
                .chain(std::iter::once("default".to_string()))
                .collect(),
            _ => vec!["default".to_string()],
        }
    }
}

/// Runtime status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Idle,
    Executing,
    Success,
    Error,
    /// Paused at a debug breakpoint.
    Waiting,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Executing => "executing",
            Self::Success => "success",
            Self::Error => "error",
            Self::Waiting => "waiting",
        };
        f.write_str(s)
    }
}

/// The most recent failure of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Transient execution state. Owned by the engine, overwritten on every run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRuntime {
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<Vec<Vec<ExecutionItem>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<NodeFailure>,
}

/// Canvas position; carried for editors, ignored by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node.
    pub id: NodeId,
    /// Human-readable name.
    pub name: String,
    /// Node kind and parameters.
    pub kind: NodeKind,
    /// Declared output branch labels.
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub runtime: NodeRuntime,
}

impl Node {
    /// Creates a new node with the kind's default outputs.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        let outputs = kind.default_outputs();
        Self {
            id: NodeId::new(),
            name: name.into(),
            kind,
            outputs,
            position: Position::default(),
            runtime: NodeRuntime::default(),
        }
    }

    /// Creates a node with a specific ID.
    #[must_use]
    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = id;
        self
    }

    /// Sets the canvas position.
    #[must_use]
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    /// Returns true if `branch` is one of this node's outputs.
    #[must_use]
    pub fn has_output(&self, branch: &str) -> bool {
        self.outputs.iter().any(|o| o == branch)
    }

    /// Fills in outputs for nodes deserialized without them.
    pub fn normalize(&mut self) {
        if self.outputs.is_empty() {
            self.outputs = self.kind.default_outputs();
        }
    }
}
