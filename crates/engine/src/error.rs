//! Engine error taxonomy.
//!
//! Every variant here is fatal to the request: the relay is closed with the
//! error and no `[DONE]` sentinel is written. Tool failures and unknown
//! actions never reach this type; they are folded into the conversation.

use rago_core::error::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The upstream stream could not be opened or failed part way through.
    #[error("Upstream error: {0}")]
    Provider(ProviderError),

    /// A structured tool call carried arguments that are not valid JSON.
    #[error("Invalid arguments for {tool}: {reason}")]
    ToolArguments { tool: String, reason: String },

    #[error("Summarizer failed: {0}")]
    Summarizer(ProviderError),

    #[error("Round limit of {0} exceeded")]
    RoundLimitExceeded(u32),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The reading side went away.
    #[error("Reader disconnected")]
    Disconnected,

    #[error("Failed to encode frame: {0}")]
    Encode(String),
}

impl EngineError {
    /// Short machine-readable label, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider",
            Self::ToolArguments { .. } => "tool_arguments",
            Self::Summarizer(_) => "summarizer",
            Self::RoundLimitExceeded(_) => "round_limit",
            Self::Cancelled => "cancelled",
            Self::Relay(_) => "relay",
        }
    }
}
