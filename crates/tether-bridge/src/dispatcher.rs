//! Fans finished messages out to every bound identity.
//!
//! Text is chunked to the transport's size limit before sending. Chunk order
//! is preserved per identity; relative order across identities is not, and
//! there is no all-or-nothing semantics across the group.

use crate::contract::ChatTransport;

/// Transport message size limit, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Splits `text` into chunks of at most `max_chars` characters, preferring to
/// break at the last newline inside the window. The newline fallback only
/// applies past half the limit so chunks never become pathologically small;
/// otherwise the cut is hard. The splitting newline is dropped, so joining
/// chunks with `\n` reconstructs the original.
pub fn chunk_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() || max_chars == 0 {
        return Vec::new();
    }
    let mut remaining: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    while remaining.len() > max_chars {
        let window = &remaining[..max_chars];
        let newline_split = window
            .iter()
            .rposition(|&ch| ch == '\n')
            .filter(|&index| index > max_chars / 2);
        match newline_split {
            Some(index) => {
                chunks.push(remaining[..index].iter().collect());
                remaining.drain(..=index);
            }
            None => {
                chunks.push(window.iter().collect());
                remaining.drain(..max_chars);
            }
        }
    }
    if !remaining.is_empty() {
        chunks.push(remaining.into_iter().collect());
    }
    chunks
}

/// Sends `text` to every identity, chunked. Returns how many identities
/// received all of their chunks; per-identity failures are logged and the
/// fan-out continues.
pub async fn dispatch(transport: &dyn ChatTransport, identities: &[String], text: &str) -> usize {
    let chunks = chunk_message(text, MAX_MESSAGE_CHARS);
    if chunks.is_empty() {
        return 0;
    }
    let mut reached = 0;
    for identity in identities {
        if send_chunks(transport, identity, &chunks).await {
            reached += 1;
        }
    }
    reached
}

/// Same chunking and delivery restricted to one identity. Returns whether
/// every chunk was sent.
pub async fn dispatch_to_one(transport: &dyn ChatTransport, identity: &str, text: &str) -> bool {
    let chunks = chunk_message(text, MAX_MESSAGE_CHARS);
    if chunks.is_empty() {
        return true;
    }
    send_chunks(transport, identity, &chunks).await
}

/// Best-effort send: delivery failures are logged inside the dispatch path
/// and never propagate. The silence is the contract; event handlers must not
/// fail because nobody could be reached.
pub async fn notify_best_effort(
    transport: &dyn ChatTransport,
    identities: &[String],
    text: &str,
) {
    let reached = dispatch(transport, identities, text).await;
    if reached < identities.len() {
        tracing::debug!(
            reached,
            total = identities.len(),
            "notice delivery incomplete"
        );
    }
}

async fn send_chunks(transport: &dyn ChatTransport, identity: &str, chunks: &[String]) -> bool {
    for (index, chunk) in chunks.iter().enumerate() {
        if let Err(error) = transport.send_text(identity, chunk).await {
            tracing::warn!(
                identity,
                chunk = index + 1,
                total = chunks.len(),
                %error,
                "message delivery failed"
            );
            return false;
        }
    }
    true
}
