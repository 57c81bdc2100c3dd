//! Buffers streamed text deltas into complete per-message strings.
//!
//! Each `(session, message)` key accumulates until the session signals idle,
//! at which point the buffer is flushed exactly once; the processed-key set
//! guards against replayed idle signals.

use std::collections::{HashMap, HashSet, VecDeque};

use tether_core::current_unix_timestamp_ms;

/// Soft cap on remembered flushed keys; exceeding it evicts the oldest
/// [`PROCESSED_EVICT_COUNT`] entries (approximate LRU, not strict).
pub const PROCESSED_SOFT_CAP: usize = 100;
pub const PROCESSED_EVICT_COUNT: usize = 50;

pub type MessageKey = (String, String);

#[derive(Debug)]
struct PendingResponse {
    text: String,
    last_update_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedMessage {
    pub session_id: String,
    pub message_id: String,
    pub text: String,
}

/// Insertion-ordered set of already-flushed message keys. A queue carries the
/// eviction order; a hash set answers membership.
#[derive(Debug, Default)]
pub struct ProcessedMessages {
    order: VecDeque<MessageKey>,
    index: HashSet<MessageKey>,
}

impl ProcessedMessages {
    /// Records `key` as processed. Returns false when it was already present.
    pub fn mark(&mut self, key: &MessageKey) -> bool {
        if self.index.contains(key) {
            return false;
        }
        self.order.push_back(key.clone());
        self.index.insert(key.clone());
        true
    }

    pub fn contains(&self, key: &MessageKey) -> bool {
        self.index.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Drops the oldest entries once the soft cap is exceeded. Returns how
    /// many were evicted. An evicted key could in principle be re-flushed,
    /// but keys derive from server-issued unique ids that do not recur.
    pub fn evict_excess(&mut self) -> usize {
        if self.order.len() <= PROCESSED_SOFT_CAP {
            return 0;
        }
        let mut evicted = 0;
        while evicted < PROCESSED_EVICT_COUNT {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.index.remove(&oldest);
            evicted += 1;
        }
        evicted
    }
}

/// Per-message text buffers fed by `message.part.updated` text events.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    buffers: HashMap<MessageKey, PendingResponse>,
}

impl ResponseAccumulator {
    /// Applies one streamed text event. A delta appends; a whole-message
    /// snapshot without a delta replaces the buffer wholesale.
    pub fn on_text_event(
        &mut self,
        session_id: &str,
        message_id: &str,
        delta: Option<&str>,
        full_text: Option<&str>,
    ) {
        let entry = self
            .buffers
            .entry((session_id.to_string(), message_id.to_string()))
            .or_insert_with(|| PendingResponse {
                text: String::new(),
                last_update_unix_ms: 0,
            });
        if let Some(delta) = delta {
            entry.text.push_str(delta);
        } else if let Some(full_text) = full_text {
            entry.text = full_text.to_string();
        }
        entry.last_update_unix_ms = current_unix_timestamp_ms();
    }

    /// Finalizes every buffer belonging to `session_id`. Buffers are removed
    /// whether or not their key was already processed, so duplicate idle
    /// signals cannot leak memory; only first-time keys are returned.
    pub fn flush(
        &mut self,
        session_id: &str,
        processed: &mut ProcessedMessages,
    ) -> Vec<FlushedMessage> {
        let mut keys: Vec<MessageKey> = self
            .buffers
            .keys()
            .filter(|(session, _)| session == session_id)
            .cloned()
            .collect();
        keys.sort();

        let mut flushed = Vec::new();
        for key in keys {
            let Some(buffer) = self.buffers.remove(&key) else {
                continue;
            };
            if buffer.text.is_empty() {
                continue;
            }
            if !processed.mark(&key) {
                continue;
            }
            let (session_id, message_id) = key;
            flushed.push(FlushedMessage {
                session_id,
                message_id,
                text: buffer.text,
            });
        }
        flushed
    }

    pub fn buffered_count(&self) -> usize {
        self.buffers.len()
    }
}
