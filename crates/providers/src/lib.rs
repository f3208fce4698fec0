//! Upstream LLM provider implementations for rago.
//!
//! All providers implement the `rago_core::Provider` trait. Every backend
//! rago talks to exposes the OpenAI chat-completions wire format, so one
//! implementation covers Groq, OpenAI, OpenRouter and Ollama.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
