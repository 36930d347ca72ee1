//! # Push Stream
//!
//! The local agent reports progress as a server-sent event stream plus a
//! paginated history endpoint. This module decodes the SSE framing and
//! keeps one logical stream alive across reconnects.
//!
//! ## Reconnect Semantics
//!
//! ```text
//!   connect ──► backfill(history, limit) ──► live events ──► error/EOF
//!      ▲                                                        │
//!      └──────────── sleep(backoff), backoff = min(2x, max) ◄───┘
//! ```
//!
//! Backfill overlaps with what was already delivered. Numbered events carry
//! the agent's log sequence number, so anything at or below the highest id
//! already forwarded is dropped and the rest fills the gap left by a
//! disconnect.
//!
//! Events without an id (agents running without an event log) cannot be
//! told apart from ones an earlier purchase produced. From the backfill they
//! are only forwarded when the consumer asked for a history replay, and then
//! only on the first backfill. Live unnumbered events always pass through.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::PushSource;
use crate::config::CheckoutConfig;

// ---------------------------------------------------------------------------
// Push Event
// ---------------------------------------------------------------------------

/// One event from the agent's console feed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushEvent {
    /// Agent log sequence number. Zero when the agent keeps no log.
    pub id: u64,
    pub timestamp: String,
    /// Which hat the agent was wearing: `buyer`, `creator`, `seeder`...
    pub role: String,
    #[serde(alias = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
}

impl PushEvent {
    /// A buyer-role event with no sequence number.
    pub fn new(event_type: &str, data: serde_json::Value) -> Self {
        Self {
            id: 0,
            timestamp: chrono::Utc::now().to_rfc3339(),
            role: "buyer".to_string(),
            event_type: event_type.to_string(),
            data,
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    /// A string field of the payload, if present and non-empty.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn u64_field(&self, key: &str) -> Option<u64> {
        self.data.get(key).and_then(|v| v.as_u64())
    }
}

// ---------------------------------------------------------------------------
// SSE Decoder
// ---------------------------------------------------------------------------

/// A complete `text/event-stream` message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseFrame {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// Parse the frame's data as a [`PushEvent`]. The SSE `id:` field fills
    /// in the sequence number when the payload lacks one.
    pub fn into_event(self) -> Result<PushEvent, serde_json::Error> {
        let mut event: PushEvent = serde_json::from_str(&self.data)?;
        if event.id == 0 {
            if let Some(id) = self.id.as_deref().and_then(|s| s.trim().parse().ok()) {
                event.id = id;
            }
        }
        Ok(event)
    }
}

/// Incremental `text/event-stream` parser.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
    id: Option<String>,
    event: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
                continue;
            }
            if line.starts_with(':') {
                continue; // keep-alive comment
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_ref(), ""),
            };
            match field {
                "data" => self.data.push(value.to_string()),
                "id" => self.id = Some(value.to_string()),
                "event" => self.event = Some(value.to_string()),
                _ => {}
            }
        }

        frames
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(SseFrame {
            id: self.id.clone(),
            event: self.event.take(),
            data,
        })
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Keeps the push stream connected and feeds a single consumer channel.
///
/// The supervisor knows nothing about purchases; a reconnect never touches
/// the current session. It stops once the receiving side is dropped.
pub struct EventStreamSupervisor {
    source: Arc<dyn PushSource>,
    history_limit: usize,
    backoff_min: Duration,
    backoff_max: Duration,
    replay_history: bool,
    last_id: u64,
    backfilled: bool,
}

impl EventStreamSupervisor {
    pub fn new(source: Arc<dyn PushSource>, config: &CheckoutConfig) -> Self {
        Self {
            source,
            history_limit: config.history_limit,
            backoff_min: config.reconnect_min(),
            backoff_max: config.reconnect_max(),
            replay_history: false,
            last_id: 0,
            backfilled: false,
        }
    }

    /// Also forward the unnumbered part of the first history backfill.
    /// For event viewers; a purchase consumer must not see it.
    pub fn replay_history(mut self, replay: bool) -> Self {
        self.replay_history = replay;
        self
    }

    /// Run on the tokio runtime until the receiver goes away.
    pub fn spawn(self, tx: mpsc::Sender<PushEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(tx))
    }

    pub async fn run(mut self, tx: mpsc::Sender<PushEvent>) {
        let mut backoff = self.backoff_min;
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;

            match self.source.history(self.history_limit).await {
                Ok(mut history) => {
                    history.sort_by_key(|e| e.id);
                    tracing::debug!(count = history.len(), attempt, "history backfill");
                    let replay = self.replay_history && !self.backfilled;
                    self.backfilled = true;
                    for event in history {
                        if event.id == 0 && !replay {
                            tracing::trace!(
                                event_type = %event.event_type,
                                "dropping unnumbered backfill"
                            );
                            continue;
                        }
                        if !self.forward(event, &tx).await {
                            return;
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, attempt, "history backfill failed"),
            }

            match self.source.subscribe().await {
                Ok(mut stream) => {
                    tracing::info!(attempt, last_id = self.last_id, "push stream connected");
                    backoff = self.backoff_min;
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(event) => {
                                if !self.forward(event, &tx).await {
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "push stream error");
                                break;
                            }
                        }
                    }
                    tracing::warn!("push stream disconnected, reconnecting");
                }
                Err(e) => tracing::warn!(error = %e, attempt, "push stream connect failed"),
            }

            if tx.is_closed() {
                return;
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.backoff_max);
        }
    }

    /// Deliver one event unless it was already delivered. Returns `false`
    /// once the consumer is gone.
    async fn forward(&mut self, event: PushEvent, tx: &mpsc::Sender<PushEvent>) -> bool {
        if event.id != 0 {
            if event.id <= self.last_id {
                tracing::trace!(id = event.id, "skipping replayed event");
                return true;
            }
            self.last_id = event.id;
        }
        tx.send(event).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RemoteError, RemoteResult};
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn decoder_handles_split_chunks_and_crlf() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"id: 7\r\ndata: {\"event_ty").is_empty());
        let frames = decoder.push(b"pe\":\"PAYMENT_SENT\"}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        let event = frames[0].clone().into_event().unwrap();
        assert_eq!(event.event_type, "PAYMENT_SENT");
        assert_eq!(event.id, 7);
    }

    #[test]
    fn decoder_joins_multiline_data_and_skips_comments() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": keep-alive\n\ndata: line one\ndata: line two\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "line one\nline two");
    }

    #[test]
    fn decoder_keeps_utf8_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: {\"data\":{\"note\":\"café\"}}\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).is_empty());
        let frames = decoder.push(&bytes[split..]);
        let event = frames[0].clone().into_event().unwrap();
        assert_eq!(event.str_field("note"), Some("café"));
    }

    #[test]
    fn push_event_accepts_type_alias() {
        let event: PushEvent =
            serde_json::from_str(r#"{"type":"FILE_SAVED","role":"buyer","data":{"path":"/tmp/x"}}"#)
                .unwrap();
        assert_eq!(event.event_type, "FILE_SAVED");
        assert_eq!(event.str_field("path"), Some("/tmp/x"));
    }

    /// Scripted source: each `subscribe` pops the next batch; `history`
    /// always returns everything published so far.
    struct ScriptedSource {
        history: Mutex<Vec<PushEvent>>,
        batches: Mutex<Vec<Vec<PushEvent>>>,
    }

    #[async_trait]
    impl PushSource for ScriptedSource {
        async fn history(&self, limit: usize) -> RemoteResult<Vec<PushEvent>> {
            let all = self.history.lock().clone();
            let skip = all.len().saturating_sub(limit);
            Ok(all.into_iter().skip(skip).collect())
        }

        async fn subscribe(&self) -> RemoteResult<BoxStream<'static, RemoteResult<PushEvent>>> {
            let mut batches = self.batches.lock();
            if batches.is_empty() {
                return Err(RemoteError::Transport("connection refused".into()));
            }
            let batch = batches.remove(0);
            self.history.lock().extend(batch.iter().cloned());
            let items: Vec<RemoteResult<PushEvent>> = batch
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(RemoteError::Transport("reset".into()))))
                .collect();
            Ok(futures::stream::iter(items).boxed())
        }
    }

    fn ev(id: u64) -> PushEvent {
        PushEvent::new("CHUNK_PROGRESS", json!({ "received": id })).with_id(id)
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_reconnects_and_skips_replayed_history() {
        let source = Arc::new(ScriptedSource {
            history: Mutex::new(vec![ev(1)]),
            batches: Mutex::new(vec![vec![ev(2), ev(3)], vec![ev(3), ev(4)]]),
        });
        let (tx, mut rx) = mpsc::channel(16);
        let handle =
            EventStreamSupervisor::new(source, &CheckoutConfig::default()).spawn(tx);

        let mut ids = Vec::new();
        while ids.len() < 4 {
            ids.push(rx.recv().await.unwrap().id);
        }
        assert_eq!(ids, vec![1, 2, 3, 4]);

        drop(rx);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn unnumbered_backfill_only_reaches_viewers() {
        let stale = PushEvent::new("PAYMENT_FAILED", json!({ "reason": "old purchase" }));
        let live = PushEvent::new("PAYMENT_SENT", json!({}));
        let source = || {
            Arc::new(ScriptedSource {
                history: Mutex::new(vec![stale.clone()]),
                batches: Mutex::new(vec![vec![live.clone()], vec![]]),
            })
        };

        // Purchase consumer: only the live event, and the backfills after
        // each reconnect (which now hold both) add nothing.
        let (tx, mut rx) = mpsc::channel(16);
        let handle = EventStreamSupervisor::new(source(), &CheckoutConfig::default()).spawn(tx);
        assert_eq!(rx.recv().await.unwrap().event_type, "PAYMENT_SENT");
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
        handle.abort();

        // Viewer: the first backfill is replayed once.
        let (tx, mut rx) = mpsc::channel(16);
        let handle = EventStreamSupervisor::new(source(), &CheckoutConfig::default())
            .replay_history(true)
            .spawn(tx);
        assert_eq!(rx.recv().await.unwrap().event_type, "PAYMENT_FAILED");
        assert_eq!(rx.recv().await.unwrap().event_type, "PAYMENT_SENT");
        drop(rx);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_stops_when_consumer_drops() {
        let source = Arc::new(ScriptedSource {
            history: Mutex::new(vec![ev(1), ev(2)]),
            batches: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle =
            EventStreamSupervisor::new(source, &CheckoutConfig::default()).spawn(tx);
        handle.await.unwrap();
    }
}
