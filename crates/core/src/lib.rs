//! # rago core
//!
//! Domain types, traits, and error definitions shared by every rago crate.
//! This crate has **no framework dependencies**: it defines the model the
//! provider, tool, engine and gateway crates implement against.
//!
//! ## Layout
//!
//! - [`message`]: role-tagged messages and the per-request conversation
//! - [`provider`]: the upstream LLM abstraction and its streaming deltas
//! - [`tool`]: local actions, their results, and the dispatch table
//! - [`error`]: bounded-context error enums

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, ToolError};
pub use message::{Conversation, Message, Role};
pub use provider::{ChunkMeta, Provider, ProviderRequest, StreamChunk, ToolCallDelta, ToolDefinition};
pub use tool::{Tool, ToolRegistry, ToolResult};
