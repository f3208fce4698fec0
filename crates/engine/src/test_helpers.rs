//! Shared test helpers: a provider that plays back scripted streams.

use rago_core::error::ProviderError;
use rago_core::provider::{
    ChunkMeta, ChunkReceiver, Provider, ProviderRequest, StreamChunk, ToolCallDelta,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One scripted upstream call.
pub enum Turn {
    /// The stream opens and yields these items, then closes.
    Stream(Vec<Result<StreamChunk, ProviderError>>),
    /// The stream fails to open.
    FailStart(ProviderError),
}

fn meta() -> ChunkMeta {
    ChunkMeta {
        id: "chatcmpl-scripted".into(),
        created: 1718000000,
        model: "scripted-model".into(),
        system_fingerprint: Some("fp_scripted".into()),
    }
}

impl Turn {
    /// Content deltas followed by the final chunk.
    pub fn text(parts: &[&str]) -> Self {
        let mut items: Vec<_> = parts
            .iter()
            .map(|p| {
                Ok(StreamChunk {
                    meta: meta(),
                    ..StreamChunk::text(*p)
                })
            })
            .collect();
        items.push(Ok(StreamChunk::finished()));
        Self::Stream(items)
    }

    /// A structured call to `name` whose argument JSON arrives in `fragments`.
    pub fn tool_call(name: &str, fragments: &[&str]) -> Self {
        let mut items = vec![Ok(StreamChunk {
            meta: meta(),
            tool_calls: vec![ToolCallDelta {
                index: 0,
                id: Some("call_scripted".into()),
                name: Some(name.into()),
                arguments: String::new(),
            }],
            ..StreamChunk::default()
        })];
        items.extend(fragments.iter().map(|f| {
            Ok(StreamChunk {
                meta: meta(),
                tool_calls: vec![ToolCallDelta {
                    index: 0,
                    arguments: f.to_string(),
                    ..ToolCallDelta::default()
                }],
                ..StreamChunk::default()
            })
        }));
        items.push(Ok(StreamChunk {
            finish_reason: Some("tool_calls".into()),
            ..StreamChunk::finished()
        }));
        Self::Stream(items)
    }

    pub fn fail_start(error: ProviderError) -> Self {
        Self::FailStart(error)
    }

    /// Arbitrary stream items.
    pub fn items(items: Vec<Result<StreamChunk, ProviderError>>) -> Self {
        Self::Stream(items)
    }
}

/// A mock provider that returns a sequence of scripted streams.
///
/// Each call to `stream` plays the next turn. Running out of turns is an
/// API error, so an engine that loops too often fails loudly.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Turn>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let turn = self.turns.lock().unwrap().pop_front();

        match turn {
            None => Err(ProviderError::ApiError {
                status_code: 500,
                message: "ScriptedProvider: no more turns".into(),
            }),
            Some(Turn::FailStart(e)) => Err(e),
            Some(Turn::Stream(items)) => {
                let (tx, rx) = mpsc::channel(items.len().max(1));
                for item in items {
                    let _ = tx.try_send(item);
                }
                Ok(rx)
            }
        }
    }
}
