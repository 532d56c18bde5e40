//! Model inference primitives for flowloom.
//!
//! Model-call nodes (chat, vision, summarization, question answering) build a
//! [`ModelRequest`] and hand it to a [`ModelProvider`]. The provider is the
//! only part that knows about a concrete API.

pub mod backend;
pub mod error;
pub mod openai;

pub use backend::{ModelImage, ModelProvider, ModelRequest, ModelResponse, TokenUsage};
pub use error::ModelError;
pub use openai::{OpenAiCompatibleProvider, OpenAiConfig};
