//! Workflow engine for flowloom.
//!
//! This crate provides the workflow execution engine, including:
//!
//! - **Graph Model**: Directed graphs using petgraph with typed nodes and branch-labelled edges
//! - **Node Types**: Triggers, transforms, flow control, integrations, model calls and memory
//! - **Expressions**: `{{ ... }}` templates resolved against the current item
//! - **Execution**: Concurrent graph traversal with debug stepping, abort and a bounded run log
//! - **Persistence**: Snapshots of workflows, templates, credentials and durable memory

pub mod config;
pub mod controller;
pub mod definition;
pub mod dispatcher;
pub mod edge;
pub mod engine;
pub mod error;
pub mod events;
pub mod execution;
pub mod executor;
pub mod expression;
pub mod graph;
pub mod item;
pub mod node;
pub mod persistence;
pub mod sandbox;
pub mod schema;
pub mod store;
pub mod trigger;
pub mod value;

pub use config::EngineConfig;
pub use definition::{Workflow, WorkflowMetadata, WorkflowSummary};
pub use dispatcher::{ExecutionMode, NodeDispatcher};
pub use edge::{Edge, EdgeRef};
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, GraphError, NodeError, PersistenceError};
pub use events::EngineEvent;
pub use execution::{RunLog, RunRecord, RunStatus};
pub use graph::WorkflowGraph;
pub use item::{BinaryData, ExecutionItem};
pub use node::{Node, NodeCategory, NodeKind, NodeRuntime, NodeStatus};
pub use persistence::{BlobStore, FileBlobStore, MemoryBlobStore, StateSnapshot};
pub use store::{NodeTemplate, WorkflowStore};
pub use trigger::{TriggerMode, TriggerSettings};
