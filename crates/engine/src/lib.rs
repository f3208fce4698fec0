//! Streaming tool-orchestration engine for rago.
//!
//! Sits between a caller and an upstream model: relays the model's text as
//! it streams, notices when the model asks for a local action (a structured
//! tool call or a textual `Action: Name[arg]` + `PAUSE`), runs it, has the
//! result summarized, and stitches the summary into the same outgoing
//! stream.
//!
//! - [`orchestrator`]: the per-request state machine
//! - [`summarizer`]: the secondary call that explains an action's result
//! - [`relay`]: the rendezvous channel and frame format
//! - [`marker`]: textual marker parsing

pub mod error;
pub mod marker;
pub mod orchestrator;
pub mod relay;
pub mod summarizer;

#[cfg(test)]
mod test_helpers;

pub use error::{EngineError, RelayError};
pub use orchestrator::{Engine, EngineRequest, OrchestrationState, Phase};
pub use relay::{DONE_FRAME, RelayReceiver, RelaySender, relay};
pub use summarizer::Summarizer;
