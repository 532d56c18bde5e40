//! Core types shared by every flowloom crate.
//!
//! This crate provides the strongly-typed identifiers for engine entities
//! and the `Result` alias used at layer boundaries.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{CredentialId, EdgeId, NodeId, ParseIdError, TemplateId, WorkflowId, WorkflowRunId};
