//! Stream relay: the single-writer, single-reader channel between the
//! orchestration task and whoever serves the response.
//!
//! Every `send` blocks until the reader has taken the frame, so a slow
//! client slows the upstream read loop down instead of buffering. The
//! sender is closed exactly once: `close` consumes it.
//!
//! Frames look like
//!
//! ```text
//! data: {"id":"...","object":"chat.completion.chunk",...}\n
//! ```
//!
//! and a clean close adds `data: [DONE]\n`.

use futures::Stream;
use rago_core::provider::ChunkMeta;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{EngineError, RelayError};

/// Terminal sentinel written on a clean close.
pub const DONE_FRAME: &str = "data: [DONE]\n";

enum Envelope {
    Frame { text: String, ack: oneshot::Sender<()> },
    Done,
    Failed(EngineError),
}

/// Create a connected relay pair for one request.
///
/// `model` is the model name the caller asked for; it is echoed in every
/// frame regardless of what the upstream reports.
pub fn relay(model: impl Into<String>) -> (RelaySender, RelayReceiver) {
    let (tx, rx) = mpsc::channel(1);
    let meta = ChunkMeta {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        created: chrono::Utc::now().timestamp(),
        model: model.into(),
        system_fingerprint: None,
    };
    (
        RelaySender { tx, meta },
        RelayReceiver { rx, finished: false },
    )
}

#[derive(Serialize)]
struct CompletionChunk<'a> {
    id: &'a str,
    object: &'static str,
    created: i64,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_fingerprint: Option<&'a str>,
    choices: [ChunkChoice<'a>; 1],
}

#[derive(Serialize)]
struct ChunkChoice<'a> {
    index: u32,
    delta: ChunkDelta<'a>,
    finish_reason: Option<&'static str>,
}

#[derive(Serialize)]
struct ChunkDelta<'a> {
    content: &'a str,
}

/// Writing half. Owned by the orchestration task.
pub struct RelaySender {
    tx: mpsc::Sender<Envelope>,
    meta: ChunkMeta,
}

impl RelaySender {
    /// Adopt the identifiers of the upstream response currently streaming.
    /// The requested model name is kept.
    pub fn set_meta(&mut self, upstream: &ChunkMeta) {
        if !upstream.id.is_empty() {
            self.meta.id.clone_from(&upstream.id);
        }
        if upstream.created != 0 {
            self.meta.created = upstream.created;
        }
        if upstream.system_fingerprint.is_some() {
            self.meta.system_fingerprint.clone_from(&upstream.system_fingerprint);
        }
    }

    pub fn meta(&self) -> &ChunkMeta {
        &self.meta
    }

    /// Frame `content` as a completion chunk.
    pub fn frame(&self, content: &str) -> Result<String, RelayError> {
        let chunk = CompletionChunk {
            id: &self.meta.id,
            object: "chat.completion.chunk",
            created: self.meta.created,
            model: &self.meta.model,
            system_fingerprint: self.meta.system_fingerprint.as_deref(),
            choices: [ChunkChoice {
                index: 0,
                delta: ChunkDelta { content },
                finish_reason: None,
            }],
        };
        let json = serde_json::to_string(&chunk).map_err(|e| RelayError::Encode(e.to_string()))?;
        Ok(format!("data: {json}\n"))
    }

    /// Send one content frame and wait until the reader has taken it.
    pub async fn send(&self, content: &str) -> Result<(), RelayError> {
        let text = self.frame(content)?;
        let (ack, taken) = oneshot::channel();
        self.tx
            .send(Envelope::Frame { text, ack })
            .await
            .map_err(|_| RelayError::Disconnected)?;
        taken.await.map_err(|_| RelayError::Disconnected)
    }

    /// Close the relay. `None` ends the stream with `[DONE]`; an error is
    /// handed to the reader instead and no sentinel is written.
    pub async fn close(self, error: Option<EngineError>) {
        let envelope = match error {
            None => Envelope::Done,
            Some(e) => Envelope::Failed(e),
        };
        if self.tx.send(envelope).await.is_err() {
            debug!("Relay closed after reader went away");
        }
    }
}

/// Reading half. Served as the response body.
pub struct RelayReceiver {
    rx: mpsc::Receiver<Envelope>,
    finished: bool,
}

impl RelayReceiver {
    /// Take the next frame.
    ///
    /// Yields `Ok(frame)` for content and for the final `[DONE]`, `Err` once
    /// if the run failed, then `None`.
    pub async fn recv(&mut self) -> Option<Result<String, EngineError>> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(Envelope::Frame { text, ack }) => {
                let _ = ack.send(());
                Some(Ok(text))
            }
            Some(Envelope::Done) => {
                self.finished = true;
                Some(Ok(DONE_FRAME.to_string()))
            }
            Some(Envelope::Failed(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    /// Drain everything into a vector of frames and the terminal error, if any.
    pub async fn collect(mut self) -> (Vec<String>, Option<EngineError>) {
        let mut frames = Vec::new();
        while let Some(item) = self.recv().await {
            match item {
                Ok(frame) => frames.push(frame),
                Err(e) => return (frames, Some(e)),
            }
        }
        (frames, None)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<String, EngineError>> + Send {
        futures::stream::unfold(self, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        })
    }
}

/// Pull the `delta.content` text back out of a frame.
pub fn frame_content(frame: &str) -> Option<String> {
    let json = frame.strip_prefix("data: ")?.trim_end();
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    value["choices"][0]["delta"]["content"]
        .as_str()
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn frame_envelope_shape() {
        let (mut tx, _rx) = relay("llama3-70b-8192");
        tx.set_meta(&ChunkMeta {
            id: "chatcmpl-up".into(),
            created: 1718000000,
            model: "llama3-70b-8192-upstream".into(),
            system_fingerprint: Some("fp_x".into()),
        });

        let frame = tx.frame("Hello").unwrap();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("}\n"));

        let value: serde_json::Value =
            serde_json::from_str(frame.trim_start_matches("data: ").trim_end()).unwrap();
        assert_eq!(value["object"], "chat.completion.chunk");
        assert_eq!(value["id"], "chatcmpl-up");
        assert_eq!(value["created"], 1718000000);
        assert_eq!(value["model"], "llama3-70b-8192");
        assert_eq!(value["system_fingerprint"], "fp_x");
        assert_eq!(value["choices"][0]["index"], 0);
        assert_eq!(value["choices"][0]["delta"]["content"], "Hello");
        assert_eq!(frame_content(&frame).as_deref(), Some("Hello"));
    }

    #[test]
    fn fresh_relay_has_generated_id() {
        let (tx, _rx) = relay("m");
        assert!(tx.meta().id.starts_with("chatcmpl-"));
        assert!(tx.meta().created > 0);
    }

    #[tokio::test]
    async fn clean_close_writes_done() {
        let (tx, rx) = relay("m");
        let writer = tokio::spawn(async move {
            tx.send("a").await.unwrap();
            tx.send("b").await.unwrap();
            tx.close(None).await;
        });

        let (frames, err) = rx.collect().await;
        writer.await.unwrap();
        assert!(err.is_none());
        assert_eq!(frames.len(), 3);
        assert_eq!(frame_content(&frames[0]).as_deref(), Some("a"));
        assert_eq!(frame_content(&frames[1]).as_deref(), Some("b"));
        assert_eq!(frames[2], DONE_FRAME);
    }

    #[tokio::test]
    async fn error_close_has_no_sentinel() {
        let (tx, rx) = relay("m");
        tokio::spawn(async move {
            tx.send("partial").await.unwrap();
            tx.close(Some(EngineError::Cancelled)).await;
        });

        let (frames, err) = rx.collect().await;
        assert_eq!(frames.len(), 1);
        assert!(!frames.iter().any(|f| f == DONE_FRAME));
        assert!(matches!(err, Some(EngineError::Cancelled)));
    }

    #[tokio::test]
    async fn send_waits_for_reader() {
        let (tx, mut rx) = relay("m");
        let send = tokio::spawn(async move { tx.send("slow").await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!send.is_finished());

        let frame = rx.recv().await.unwrap().unwrap();
        assert_eq!(frame_content(&frame).as_deref(), Some("slow"));
        assert!(send.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn dropped_reader_disconnects_sender() {
        let (tx, rx) = relay("m");
        drop(rx);
        assert_eq!(tx.send("x").await, Err(RelayError::Disconnected));
    }

    #[tokio::test]
    async fn stream_ends_after_error() {
        use futures::StreamExt;

        let (tx, rx) = relay("m");
        tokio::spawn(async move {
            tx.close(Some(EngineError::RoundLimitExceeded(2))).await;
        });
        let items: Vec<_> = rx.into_stream().collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }
}
