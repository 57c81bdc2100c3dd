//! HTTP/event client for the agent runtime.
//!
//! [`client::AgentHttpClient`] implements the control operations the bridge
//! issues; [`event_stream`] subscribes to the runtime's SSE feed and keeps
//! reconnecting for the life of the process.

pub mod client;
pub mod event_stream;

pub use client::AgentHttpClient;
pub use event_stream::{run_event_stream, AgentFeedItem, EventStreamConfig};
