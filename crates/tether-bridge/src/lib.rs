//! Core bridge engine between the agent runtime's event feed and a chat
//! transport.
//!
//! Consumes typed agent events, accumulates streamed message text, and turns
//! the firehose into a bounded set of deduplicated outbound chat messages.
//! The chat side feeds user commands back through the interpreter, gated by
//! the binding store. Transport and runtime are reached only through the
//! seams in [`contract`], so the whole engine runs against fakes in tests.

pub mod accumulator;
pub mod commands;
pub mod contract;
pub mod dispatcher;
pub mod router;
pub mod state;

pub use accumulator::{FlushedMessage, ProcessedMessages, ResponseAccumulator};
pub use commands::{handle_incoming, IncomingMessage};
pub use contract::{AgentApi, ChatTransport, PermissionReply, SessionSummary};
pub use dispatcher::{chunk_message, dispatch, dispatch_to_one, notify_best_effort};
pub use router::handle_event;
pub use state::{BridgeContext, BridgeState, PendingPermission, StatusSnapshot};

#[cfg(test)]
mod tests;
