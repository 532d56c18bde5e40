//! Error types for the workflow crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ExpressionError`: Template evaluation failures (never fatal to a run)
//! - `ValidationError`: Schema mismatches
//! - `SandboxError`: Script failures and timeouts
//! - `NodeError`: Any handler-level failure; fatal to the run
//! - `GraphError`: Structural graph operations (nodes, edges, branches)
//! - `PersistenceError`: Snapshot load/save failures
//! - `EngineError`: Operation-level failures returned to callers

use flowloom_ai::ModelError;
use flowloom_conversation::MemoryError;
use flowloom_core::{CredentialId, EdgeId, NodeId, TemplateId, WorkflowId};
use flowloom_integration::{ConnectorError, CredentialError};
use std::fmt;

/// Errors from evaluating a template expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    /// The expression could not be parsed.
    Syntax { expression: String, reason: String },
    /// An identifier outside the supplied context was referenced.
    UnknownIdentifier { name: String },
    /// An operation was applied to a value of the wrong type.
    Type { reason: String },
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax { expression, reason } => {
                write!(f, "syntax error in '{expression}': {reason}")
            }
            Self::UnknownIdentifier { name } => write!(f, "{name} is not defined"),
            Self::Type { reason } => write!(f, "type error: {reason}"),
        }
    }
}

impl std::error::Error for ExpressionError {}

/// Errors from validating data against a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The schema itself is not valid.
    InvalidSchema { reason: String },
    /// A required property is absent.
    MissingRequired { path: String },
    /// A value has the wrong type.
    TypeMismatch {
        path: String,
        expected: String,
        actual: String,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSchema { reason } => {
                write!(f, "Invalid JSON Schema definition: {reason}")
            }
            Self::MissingRequired { path } => {
                write!(f, "Required property '{path}' is missing")
            }
            Self::TypeMismatch {
                path,
                expected,
                actual,
            } => write!(f, "Path '{path}' expected {expected}, got {actual}"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors from the script sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    /// The script did not finish within its wall-clock bound.
    Timeout { timeout_ms: u64 },
    /// The script threw or failed to compile.
    Script { message: String },
    /// The script's result could not be converted back to JSON.
    InvalidOutput { reason: String },
    /// The worker thread running the script failed.
    Internal { reason: String },
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { timeout_ms } => {
                write!(f, "Sandbox execution timed out after {timeout_ms}ms")
            }
            Self::Script { message } => write!(f, "{message}"),
            Self::InvalidOutput { reason } => write!(f, "script produced invalid output: {reason}"),
            Self::Internal { reason } => write!(f, "sandbox failure: {reason}"),
        }
    }
}

impl std::error::Error for SandboxError {}

/// Errors raised by a node handler. Any of these fails the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    Validation(ValidationError),
    Sandbox(SandboxError),
    Connector(ConnectorError),
    Credential(CredentialError),
    Model(ModelError),
    Memory(MemoryError),
    /// A required parameter resolved to nothing.
    MissingParameter { name: String },
    /// A parameter resolved to an unusable value.
    InvalidParameter { name: String, reason: String },
    /// Input that should be JSON did not parse.
    JsonParse { reason: String },
    /// An HTTP call returned a non-2xx status.
    HttpStatus { status: u16, body: String },
    /// An external call exceeded its bound.
    Timeout { operation: String, timeout_ms: u64 },
    /// The run executed more nodes than allowed.
    StepBudgetExceeded { limit: usize },
    /// The run was aborted while this node was suspended.
    Cancelled,
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "Schema Violation: {e}"),
            Self::Sandbox(e) => write!(f, "{e}"),
            Self::Connector(e) => write!(f, "{e}"),
            Self::Credential(e) => write!(f, "{e}"),
            Self::Model(e) => write!(f, "{e}"),
            Self::Memory(e) => write!(f, "{e}"),
            Self::MissingParameter { name } => write!(f, "{name} is required"),
            Self::InvalidParameter { name, reason } => {
                write!(f, "invalid parameter '{name}': {reason}")
            }
            Self::JsonParse { reason } => write!(f, "JSON Parse Error: {reason}"),
            Self::HttpStatus { status, body } => {
                write!(f, "HTTP request failed with status {status}: {body}")
            }
            Self::Timeout {
                operation,
                timeout_ms,
            } => write!(f, "{operation} timed out after {timeout_ms}ms"),
            Self::StepBudgetExceeded { limit } => {
                write!(f, "run exceeded the budget of {limit} node executions")
            }
            Self::Cancelled => write!(f, "execution cancelled"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<ValidationError> for NodeError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<SandboxError> for NodeError {
    fn from(e: SandboxError) -> Self {
        Self::Sandbox(e)
    }
}

impl From<ConnectorError> for NodeError {
    fn from(e: ConnectorError) -> Self {
        Self::Connector(e)
    }
}

impl From<CredentialError> for NodeError {
    fn from(e: CredentialError) -> Self {
        Self::Credential(e)
    }
}

impl From<ModelError> for NodeError {
    fn from(e: ModelError) -> Self {
        Self::Model(e)
    }
}

impl From<MemoryError> for NodeError {
    fn from(e: MemoryError) -> Self {
        Self::Memory(e)
    }
}

/// Errors from graph operations.
///
/// These errors contain only information available at the graph layer.
/// Workflow-level context is added by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Node with the given ID was not found in the graph.
    NodeNotFound { node_id: NodeId },
    /// Edge with the given ID was not found in the graph.
    EdgeNotFound { edge_id: EdgeId },
    /// The edge's branch label is not an output of its source node.
    UnknownBranch { node_id: NodeId, branch: String },
    /// An identical edge already exists.
    DuplicateEdge { source: NodeId, target: NodeId },
    /// Graph contains cycles.
    CycleDetected,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeNotFound { node_id } => write!(f, "node not found: {node_id}"),
            Self::EdgeNotFound { edge_id } => write!(f, "edge not found: {edge_id}"),
            Self::UnknownBranch { node_id, branch } => {
                write!(f, "node {node_id} has no output branch '{branch}'")
            }
            Self::DuplicateEdge { source, target } => {
                write!(f, "edge {source} -> {target} already exists")
            }
            Self::CycleDetected => write!(f, "graph contains cycles"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors from loading or saving engine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Reading or writing the blob failed.
    Io { key: String, reason: String },
    /// The blob could not be encoded or decoded.
    Serialization { reason: String },
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { key, reason } => write!(f, "state blob '{key}' I/O failed: {reason}"),
            Self::Serialization { reason } => {
                write!(f, "state snapshot serialization failed: {reason}")
            }
        }
    }
}

impl std::error::Error for PersistenceError {}

/// Operation-level engine errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A run is already in flight; the request is rejected, not queued.
    RunInFlight,
    /// Workflow not found.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// Node not found in the workflow.
    NodeNotFound {
        workflow_id: WorkflowId,
        node_id: NodeId,
    },
    /// Node template not found in the library.
    TemplateNotFound { template_id: TemplateId },
    /// Credential not found in the vault.
    CredentialNotFound { credential_id: CredentialId },
    /// A parameter update tried to change a node's type.
    NodeTypeMismatch {
        node_id: NodeId,
        expected: String,
        actual: String,
    },
    /// A graph edit was rejected.
    Graph {
        workflow_id: WorkflowId,
        source: GraphError,
    },
    /// State could not be persisted or restored.
    Persistence(PersistenceError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunInFlight => write!(f, "a workflow run is already in progress"),
            Self::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            Self::NodeNotFound {
                workflow_id,
                node_id,
            } => write!(f, "node {node_id} not found in workflow {workflow_id}"),
            Self::TemplateNotFound { template_id } => {
                write!(f, "node template not found: {template_id}")
            }
            Self::CredentialNotFound { credential_id } => {
                write!(f, "credential not found: {credential_id}")
            }
            Self::NodeTypeMismatch {
                node_id,
                expected,
                actual,
            } => write!(
                f,
                "node {node_id} is of type '{expected}', cannot apply '{actual}' parameters"
            ),
            Self::Graph {
                workflow_id,
                source,
            } => write!(f, "graph operation failed for workflow {workflow_id}: {source}"),
            Self::Persistence(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<PersistenceError> for EngineError {
    fn from(e: PersistenceError) -> Self {
        Self::Persistence(e)
    }
}
