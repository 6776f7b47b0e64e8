//! Streaming response interception.
//!
//! [`StreamGuard`] applies model-response checkpoint semantics to an
//! incrementally produced response. Strategy: buffer-then-flush-on-boundary.
//! Raw provider chunks are held back while their extracted text accumulates;
//! whenever newly arrived text crosses a sentence boundary (or the unflushed
//! buffer reaches `max_buffer_bytes`), the full accumulated text is
//! re-evaluated as a partial model response. Only after a verdict below
//! BLOCK are the held chunks released.
//!
//! Contract: no byte of provider content is delivered before the Security
//! Manager has evaluated accumulated text containing it. On a BLOCK after
//! earlier flushes, the stream ends with a terminal error event; content
//! flushed before the block is not retracted — a documented limitation of
//! incremental delivery, not hidden.
//!
//! Re-evaluation always covers the full accumulated text, so detectors need
//! not be idempotent on overlapping windows. The guard is owned by the task
//! pumping the stream; client disconnect drops the task and the guard with
//! it, which is the entire cleanup path.

use bytes::Bytes;

use super::dispatch::{CheckpointDispatcher, PolicyBlock};
use crate::error::{GateError, Result};

/// Characters that end a flush boundary (sentence-ish).
const BOUNDARY_CHARS: &[char] = &['.', '!', '?', '\n'];

/// Outcome of feeding the guard.
#[derive(Debug)]
pub enum GuardEvent {
    /// Raw chunks cleared for delivery, in arrival order. Empty while the
    /// guard is holding for a boundary.
    Flush(Vec<Bytes>),
    /// Terminal decision; the stream must end now. Held chunks are dropped.
    Blocked(PolicyBlock),
}

/// Per-stream buffering state. Created when a streamed response begins,
/// dropped when it ends or the client disconnects.
pub struct StreamGuard {
    dispatcher: CheckpointDispatcher,
    max_buffer_bytes: usize,
    /// All response text extracted so far.
    text: String,
    /// Raw chunks not yet cleared for delivery.
    pending: Vec<Bytes>,
    pending_bytes: usize,
    /// Text accumulated since the last evaluation.
    unevaluated: bool,
    terminated: bool,
}

impl StreamGuard {
    pub fn new(dispatcher: CheckpointDispatcher, max_buffer_bytes: usize) -> Self {
        Self {
            dispatcher,
            max_buffer_bytes,
            text: String::new(),
            pending: Vec::new(),
            pending_bytes: 0,
            unevaluated: false,
            terminated: false,
        }
    }

    /// Feed one raw provider chunk plus the text extracted from it.
    ///
    /// Returns held-then-cleared chunks to forward, or the terminal block.
    pub async fn push(&mut self, raw: Bytes, extracted_text: &str) -> Result<GuardEvent> {
        if self.terminated {
            return Err(GateError::StreamAborted(
                "push after terminal decision".to_string(),
            ));
        }

        self.pending_bytes += raw.len();
        self.pending.push(raw);
        if !extracted_text.is_empty() {
            self.text.push_str(extracted_text);
            self.unevaluated = true;
        }

        let at_boundary = self.unevaluated && extracted_text.contains(BOUNDARY_CHARS);
        // Budget overflow forces an evaluation even without new text, so the
        // buffer never grows unboundedly on text-free control frames.
        let over_budget = self.pending_bytes >= self.max_buffer_bytes;
        if !(at_boundary || over_budget) {
            // Keep holding; nothing leaves unchecked.
            return Ok(GuardEvent::Flush(Vec::new()));
        }

        self.evaluate(true).await
    }

    /// End of stream: run the final full-turn evaluation and release the
    /// tail, or block.
    pub async fn finish(&mut self) -> Result<GuardEvent> {
        if self.terminated {
            return Err(GateError::StreamAborted(
                "finish after terminal decision".to_string(),
            ));
        }
        self.evaluate(false).await
    }

    /// Total response text seen so far.
    pub fn accumulated_text(&self) -> &str {
        &self.text
    }

    async fn evaluate(&mut self, is_partial: bool) -> Result<GuardEvent> {
        let checked = self.dispatcher.check_response(&self.text, is_partial).await?;
        self.unevaluated = false;
        match checked.into_block() {
            Some(block) => {
                // Held chunks die with the stream.
                self.pending.clear();
                self.pending_bytes = 0;
                self.terminated = true;
                Ok(GuardEvent::Blocked(block))
            }
            None => {
                self.pending_bytes = 0;
                Ok(GuardEvent::Flush(std::mem::take(&mut self.pending)))
            }
        }
    }
}

/// Reassembles server-sent events from arbitrarily split byte chunks.
///
/// Provider chunk boundaries rarely align with SSE event boundaries; the
/// guard must only evaluate and forward whole events. `feed` returns the
/// complete `\n\n`-terminated event blocks accumulated so far; any trailing
/// partial event stays buffered for the next call.
pub struct SseChunker {
    buffer: Vec<u8>,
}

impl SseChunker {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        loop {
            let Some(pos) = find_double_newline(&self.buffer) else {
                break;
            };
            let rest = self.buffer.split_off(pos);
            let mut event = std::mem::replace(&mut self.buffer, rest);
            event.extend_from_slice(b"\n\n");
            // Drop the delimiter from the head of the remainder.
            self.buffer.drain(..2.min(self.buffer.len()));
            events.push(Bytes::from(event));
        }
        events
    }

    /// Any buffered trailing bytes (unterminated final event).
    pub fn remainder(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(Bytes::from(std::mem::take(&mut self.buffer)))
        }
    }
}

impl Default for SseChunker {
    fn default() -> Self {
        Self::new()
    }
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// Extract the `data:` payload lines of one SSE event block.
pub fn sse_data_lines(event: &str) -> Vec<&str> {
    event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect()
}
