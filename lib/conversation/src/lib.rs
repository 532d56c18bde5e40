//! Conversational memory for flowloom.
//!
//! This crate provides:
//!
//! - **Messages**: Role-tagged conversational exchanges
//! - **Memory Buffer**: A capacity-bounded message window for one session
//! - **Memory Store**: Session registry shared by memory and model-call nodes

pub mod buffer;
pub mod error;
pub mod message;
pub mod store;

pub use buffer::MemoryBuffer;
pub use error::MemoryError;
pub use message::{Message, MessageRole};
pub use store::MemoryStore;
