//! Summarizer: a secondary model call that turns a prompt, the action taken
//! and its raw result into a short answer for the user.

use rago_core::message::Message;
use rago_core::provider::{Provider, ProviderRequest};
use rago_core::tool::ToolResult;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::EngineError;

/// System instruction for every summary call.
pub const SUMMARY_INSTRUCTION: &str = "Provide a concise and clear answer to the user's prompt by using the executed action and its result. Ensure the answer directly confirms the action taken and includes the outcome. NEVER repeat the question or this instruction. If there are any errors, include the full details, including the commands run.";

/// Combine what was asked, what was done and what came back.
pub fn narrative(prompt: &str, action: &str, result: &ToolResult) -> String {
    let mut text = format!("Prompt: {prompt}\n\nAction: {action}\n\nResult: {}", result.output);
    if let Some(error) = result.error.as_deref()
        && !result.output.contains(error)
    {
        text.push_str(&format!("\n\nError: {error}"));
    }
    text
}

#[derive(Clone)]
pub struct Summarizer {
    provider: Arc<dyn Provider>,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            temperature: 0.2,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Run one summary call and drain it into a single string.
    pub async fn summarize(
        &self,
        model: &str,
        narrative: &str,
        cancel: &CancellationToken,
    ) -> Result<String, EngineError> {
        let mut request = ProviderRequest::new(
            model,
            vec![Message::system(SUMMARY_INSTRUCTION), Message::user(narrative)],
        );
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;

        let mut rx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            started = self.provider.stream(request) => started.map_err(EngineError::Summarizer)?,
        };

        let mut summary = String::new();
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                item = rx.recv() => item,
            };
            let Some(item) = item else { break };
            let chunk = item.map_err(EngineError::Summarizer)?;
            if let Some(text) = chunk.content {
                summary.push_str(&text);
            }
            if chunk.done {
                break;
            }
        }

        debug!(chars = summary.len(), "Summary complete");
        Ok(summary.trim().to_string())
    }
}
