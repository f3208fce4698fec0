//! Orchestration state machine.
//!
//! One run per request, owned by one task:
//!
//! ```text
//! Streaming ──(tool-call delta | PAUSE + Action marker)──▶ AwaitingAction
//! AwaitingAction ──(known action)──▶ Executing ──▶ Summarizing
//! Summarizing ──(textual round, no Answer)──▶ Streaming (new round)
//! Summarizing ──(structured round | Answer)──▶ Done
//! Streaming ──(upstream ends, nothing pending)──▶ Done
//! ```
//!
//! Plain content is relayed as it arrives, except that text from the first
//! `Action:` on is held until the round resolves and is released only if no
//! action follows. Once an action is detected the rest of the round is
//! drained without relaying, so a structured call that shows up after a
//! textual marker still takes precedence.

use rago_config::OrchestrationConfig;
use rago_core::message::{Conversation, Message, MessageToolCall};
use rago_core::provider::{Provider, ProviderRequest, ToolCallDelta, ToolDefinition};
use rago_core::tool::{Tool, ToolRegistry, ToolResult};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::marker::{self, ActionMarker};
use crate::relay::{RelayReceiver, RelaySender, relay};
use crate::summarizer::{Summarizer, narrative};

/// Default system prompt: the Thought / Action / PAUSE / Observation loop.
pub const REACT_SYSTEM_PROMPT: &str = "\
You run in a loop of Thought, Action, PAUSE, Observation.
At the end of the loop you output an Answer.
Use Thought to describe your reasoning about the question you have been asked.
Use Action to run one of the actions available to you, then return PAUSE.
Observation will be the result of running that action.

Your available actions are:

Command:
e.g. Action: Command[kubectl get pods -n default]
Runs a command on the host and returns its output.

Lifx:
e.g. Action: Lifx[bedroom, on]
Turns a light on or off.

Example session:

Question: Turn on the bedroom light
Thought: I should switch the bedroom light on.
Action: Lifx[bedroom, on]
PAUSE

You will be called again with this:

Observation: bedroom light has been set to true

You then output:

Answer: The bedroom light is now on.

If no action is needed, reply directly with Answer: followed by your answer.";

/// Sent with a single tool schema when a textual action could not be used as-is.
pub const HANDOFF_PROMPT: &str = "Use the provided tool definition to answer the user's prompt using the thought and action above.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Streaming,
    AwaitingAction,
    Executing,
    Summarizing,
    Done,
}

/// What the caller asked for.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl EngineRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.2,
            max_tokens: None,
        }
    }
}

/// A structured call being assembled from deltas.
#[derive(Debug, Clone, Default, PartialEq)]
struct PendingCall {
    index: u32,
    id: String,
    name: String,
    arguments: String,
}

impl PendingCall {
    /// Fold one fragment in. Fragments for another call index are dropped:
    /// one tool invocation per round.
    fn absorb(slot: &mut Option<PendingCall>, delta: ToolCallDelta) {
        match slot {
            None => {
                *slot = Some(PendingCall {
                    index: delta.index,
                    id: delta.id.unwrap_or_default(),
                    name: delta.name.unwrap_or_default(),
                    arguments: delta.arguments,
                });
            }
            Some(call) if call.index == delta.index => {
                if call.id.is_empty()
                    && let Some(id) = delta.id
                {
                    call.id = id;
                }
                if call.name.is_empty()
                    && let Some(name) = delta.name
                {
                    call.name = name;
                }
                call.arguments.push_str(&delta.arguments);
            }
            Some(call) => {
                warn!(
                    kept = call.index,
                    dropped = delta.index,
                    name = ?delta.name,
                    "Ignoring second tool call in one round"
                );
            }
        }
    }

    fn arguments(&self) -> Result<serde_json::Value, EngineError> {
        let raw = self.arguments.trim();
        if raw.is_empty() {
            return Ok(serde_json::json!({}));
        }
        serde_json::from_str(raw).map_err(|e| EngineError::ToolArguments {
            tool: self.name.clone(),
            reason: e.to_string(),
        })
    }
}

/// How an upstream round ended.
#[derive(Debug)]
enum RoundEnd {
    /// Nothing to act on; the run is complete.
    Finished,
    Structured(PendingCall),
    Textual(ActionMarker),
}

enum Next {
    Continue,
    Finish,
}

/// Per-request context. Owned by the task running the request.
pub struct OrchestrationState {
    pub conversation: Conversation,
    /// Tool schemas attached to the next upstream call
    pub active_tools: Vec<ToolDefinition>,
    /// Text of the current round
    pub buffer: String,
    /// The user's original prompt
    pub prompt: String,
    pub round: u32,
    pub phase: Phase,
    relay: RelaySender,
}

/// The orchestration engine. Cheap to clone; collaborators are shared.
#[derive(Clone)]
pub struct Engine {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    summarizer: Summarizer,
    max_rounds: u32,
    system_prompt: String,
}

impl Engine {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            summarizer: Summarizer::new(provider.clone()),
            provider,
            tools,
            max_rounds: 6,
            system_prompt: REACT_SYSTEM_PROMPT.into(),
        }
    }

    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        config: &OrchestrationConfig,
    ) -> Self {
        let engine = Self::new(provider, tools).with_max_rounds(config.max_rounds);
        match &config.system_prompt {
            Some(prompt) => engine.with_system_prompt(prompt.clone()),
            None => engine,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Start a run on its own task and hand back the reading side.
    pub fn spawn(&self, request: EngineRequest, cancel: CancellationToken) -> RelayReceiver {
        let (sender, receiver) = relay(request.model.clone());
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run(request, sender, cancel).await;
        });
        receiver
    }

    /// Run a request to completion and close the relay exactly once.
    pub async fn run(&self, request: EngineRequest, relay: RelaySender, cancel: CancellationToken) {
        let mut state = self.initial_state(&request, relay);
        let outcome = self.drive(&mut state, &request, &cancel).await;
        state.phase = Phase::Done;

        match outcome {
            Ok(()) => {
                info!(model = %request.model, rounds = state.round, "Request complete");
                state.relay.close(None).await;
            }
            Err(e) => {
                warn!(
                    model = %request.model,
                    rounds = state.round,
                    kind = e.kind(),
                    error = %e,
                    "Request failed"
                );
                state.relay.close(Some(e)).await;
            }
        }
    }

    fn initial_state(&self, request: &EngineRequest, relay: RelaySender) -> OrchestrationState {
        let mut conversation = Conversation::new();
        conversation.push(Message::system(&self.system_prompt));
        for message in &request.messages {
            conversation.push(message.clone());
        }
        let prompt = conversation.last_user_message().unwrap_or_default().to_string();

        OrchestrationState {
            conversation,
            active_tools: self.tools.definitions(),
            buffer: String::new(),
            prompt,
            round: 0,
            phase: Phase::Streaming,
            relay,
        }
    }

    async fn drive(
        &self,
        state: &mut OrchestrationState,
        request: &EngineRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        loop {
            if state.round >= self.max_rounds {
                return Err(EngineError::RoundLimitExceeded(self.max_rounds));
            }
            state.round += 1;

            let next = match self.stream_round(state, request, cancel).await? {
                RoundEnd::Finished => Next::Finish,
                RoundEnd::Structured(call) => {
                    self.handle_structured(state, request, call, cancel).await?
                }
                RoundEnd::Textual(found) => {
                    self.handle_textual(state, request, found, cancel).await?
                }
            };

            if let Next::Finish = next {
                return Ok(());
            }
        }
    }

    /// Open one upstream call and consume it to the end.
    async fn stream_round(
        &self,
        state: &mut OrchestrationState,
        request: &EngineRequest,
        cancel: &CancellationToken,
    ) -> Result<RoundEnd, EngineError> {
        state.phase = Phase::Streaming;
        state.buffer.clear();

        let upstream = ProviderRequest {
            model: request.model.clone(),
            messages: state.conversation.messages.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: state.active_tools.clone(),
            stop: Vec::new(),
        };

        debug!(
            round = state.round,
            messages = upstream.messages.len(),
            tools = upstream.tools.len(),
            "Opening upstream round"
        );

        let mut rx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            started = self.provider.stream(upstream) => started.map_err(EngineError::Provider)?,
        };

        let mut call: Option<PendingCall> = None;
        let mut textual: Option<ActionMarker> = None;
        // Bytes of `state.buffer` already relayed.
        let mut relayed = 0;

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                item = rx.recv() => item,
            };
            let Some(item) = item else { break };
            let chunk = item.map_err(EngineError::Provider)?;

            state.relay.set_meta(&chunk.meta);

            for delta in chunk.tool_calls {
                PendingCall::absorb(&mut call, delta);
            }
            if call.is_some() && state.phase == Phase::Streaming {
                debug!(round = state.round, "Structured tool call detected");
                state.phase = Phase::AwaitingAction;
            }

            if let Some(text) = chunk.content {
                state.buffer.push_str(&text);
                if state.phase == Phase::Streaming {
                    if let Some(found) = marker::paused_action(&state.buffer) {
                        debug!(round = state.round, action = %found.name, "Action marker detected");
                        textual = Some(found);
                        state.phase = Phase::AwaitingAction;
                    } else {
                        let safe = marker::relay_boundary(&state.buffer);
                        if safe > relayed {
                            let from = std::mem::replace(&mut relayed, safe);
                            relay_send(&state.relay, &state.buffer[from..safe], cancel).await?;
                        }
                    }
                }
            }

            if chunk.done {
                break;
            }
        }

        // No action followed, so held-back text is plain answer text.
        if call.is_none() && textual.is_none() && state.buffer.len() > relayed {
            relay_send(&state.relay, &state.buffer[relayed..], cancel).await?;
        }

        Ok(match (call, textual) {
            (Some(call), _) => RoundEnd::Structured(call),
            (None, Some(found)) => RoundEnd::Textual(found),
            (None, None) => RoundEnd::Finished,
        })
    }

    /// A structured call: execute, summarize, and finish.
    async fn handle_structured(
        &self,
        state: &mut OrchestrationState,
        request: &EngineRequest,
        call: PendingCall,
        cancel: &CancellationToken,
    ) -> Result<Next, EngineError> {
        let thought = std::mem::take(&mut state.buffer);
        let Some(tool) = self.tools.resolve(&call.name) else {
            self.observe_unsupported(state, thought, &call.name);
            return Ok(Next::Continue);
        };

        let arguments = call.arguments()?;
        let call_id = if call.id.is_empty() {
            format!("call_{}", uuid::Uuid::new_v4().simple())
        } else {
            call.id.clone()
        };

        let mut assistant = Message::assistant(thought);
        assistant.tool_calls = vec![MessageToolCall {
            id: call_id.clone(),
            name: tool.name().to_string(),
            arguments: call.arguments.clone(),
        }];
        state.conversation.push(assistant);

        let result = self.execute(state, tool, &call_id, &arguments, cancel).await?;
        state
            .conversation
            .push(Message::tool_result(&call_id, &result.output));

        self.summarize_and_relay(state, request, tool, &arguments, &result, cancel)
            .await?;
        Ok(Next::Finish)
    }

    /// A textual `Action: Name[arg]` marker.
    async fn handle_textual(
        &self,
        state: &mut OrchestrationState,
        request: &EngineRequest,
        found: ActionMarker,
        cancel: &CancellationToken,
    ) -> Result<Next, EngineError> {
        let thought = std::mem::take(&mut state.buffer);
        let Some(tool) = self.tools.resolve(&found.name) else {
            self.observe_unsupported(state, thought, &found.name);
            return Ok(Next::Continue);
        };

        let Some(arguments) = tool.parse_marker_argument(&found.argument) else {
            debug!(
                action = %found.name,
                argument = %found.argument,
                "Handing textual action off to a structured call"
            );
            state.conversation.push(Message::assistant(thought));
            state.conversation.push(Message::system(HANDOFF_PROMPT));
            state.active_tools = vec![tool.to_definition()];
            return Ok(Next::Continue);
        };

        let call_id = format!("call_{}", uuid::Uuid::new_v4().simple());
        let result = self.execute(state, tool, &call_id, &arguments, cancel).await?;
        self.summarize_and_relay(state, request, tool, &arguments, &result, cancel)
            .await?;

        if marker::has_final_answer(&thought) {
            return Ok(Next::Finish);
        }

        state.conversation.push(Message::assistant(thought));
        state
            .conversation
            .push(Message::user(format!("Observation: {}", result.output)));
        state.active_tools = vec![tool.to_definition()];
        Ok(Next::Continue)
    }

    /// Record an action the table does not know, and let the model retry.
    fn observe_unsupported(&self, state: &mut OrchestrationState, thought: String, name: &str) {
        warn!(action = %name, round = state.round, "Unsupported action requested");
        if !thought.is_empty() {
            state.conversation.push(Message::assistant(thought));
        }
        state
            .conversation
            .push(Message::user(format!("Observation: unsupported action '{name}'")));
        state.active_tools = self.tools.definitions();
    }

    /// Run a tool. Tool errors become a failed result; only cancellation is fatal.
    async fn execute(
        &self,
        state: &mut OrchestrationState,
        tool: &dyn Tool,
        call_id: &str,
        arguments: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<ToolResult, EngineError> {
        state.phase = Phase::Executing;
        info!(tool = tool.name(), action = %tool.describe_call(arguments), "Executing action");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            outcome = tool.execute(arguments.clone()) => outcome,
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = tool.name(), error = %e, "Action failed");
                ToolResult::from_error(&e)
            }
        };
        debug!(tool = tool.name(), success = result.success, "Action finished");
        Ok(result.for_call(call_id))
    }

    async fn summarize_and_relay(
        &self,
        state: &mut OrchestrationState,
        request: &EngineRequest,
        tool: &dyn Tool,
        arguments: &serde_json::Value,
        result: &ToolResult,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        state.phase = Phase::Summarizing;
        let story = narrative(&state.prompt, &tool.describe_call(arguments), result);
        let summary = self
            .summarizer
            .summarize(&request.model, &story, cancel)
            .await?;

        if !summary.is_empty() {
            relay_send(&state.relay, &summary, cancel).await?;
        }
        Ok(())
    }
}

async fn relay_send(
    relay: &RelaySender,
    text: &str,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        sent = relay.send(text) => sent.map_err(EngineError::from),
    }
}
