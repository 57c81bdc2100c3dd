//! Process-wide bridge state, explicitly constructed and passed by reference.
//!
//! One [`BridgeContext`] exists per process, owned by the entry point. All
//! handlers mutate it run-to-completion; there is no global scope and no
//! lazy initialization.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tether_access::BindingStore;
use tether_core::current_unix_timestamp_ms;
use tether_events::{SessionStatusKind, TodoItem, TodoStatus};

use crate::accumulator::{ProcessedMessages, ResponseAccumulator};
use crate::contract::{AgentApi, ChatTransport};

/// A permission request awaiting a user decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPermission {
    pub id: String,
    pub session_id: String,
    pub title: String,
    pub kind: String,
    pub pattern: Option<String>,
    pub created_at_unix_ms: u64,
}

/// Latest session status, last-write-wins, no history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub session_id: String,
    pub status: SessionStatusKind,
    pub attempt: Option<u32>,
    pub message: Option<String>,
    pub updated_unix_ms: u64,
}

#[derive(Default)]
pub struct BridgeState {
    /// The one session every bound identity interacts with. Per-identity
    /// sessions are a documented limitation, not a bug.
    pub active_session_id: Option<String>,
    pub status: Option<StatusSnapshot>,
    pub todos: HashMap<String, Vec<TodoItem>>,
    /// Keyed by permission id; BTreeMap iteration gives prefix resolution a
    /// deterministic lexicographic order.
    pub permissions: BTreeMap<String, PendingPermission>,
    pub connected: bool,
    pub accumulator: ResponseAccumulator,
    pub processed: ProcessedMessages,
}

impl BridgeState {
    pub fn record_status(
        &mut self,
        session_id: &str,
        status: SessionStatusKind,
        attempt: Option<u32>,
        message: Option<String>,
    ) {
        self.status = Some(StatusSnapshot {
            session_id: session_id.to_string(),
            status,
            attempt,
            message,
            updated_unix_ms: current_unix_timestamp_ms(),
        });
    }

    /// Resolves a permission by exact id or case-insensitive prefix. With
    /// several prefix matches the lexicographically smallest id wins.
    pub fn resolve_permission(&self, raw: &str) -> Option<&PendingPermission> {
        if let Some(permission) = self.permissions.get(raw) {
            return Some(permission);
        }
        let needle = raw.to_ascii_lowercase();
        self.permissions
            .values()
            .find(|permission| permission.id.to_ascii_lowercase().starts_with(&needle))
    }

    /// Done/total counts for the active session's todos, when any exist.
    pub fn todo_fraction(&self) -> Option<(usize, usize)> {
        let session_id = self.active_session_id.as_deref()?;
        let todos = self.todos.get(session_id)?;
        if todos.is_empty() {
            return None;
        }
        let done = todos
            .iter()
            .filter(|todo| todo.status == TodoStatus::Completed)
            .count();
        Some((done, todos.len()))
    }
}

/// Everything a handler needs: state, the binding gate, and the two
/// collaborator seams. Constructed once by the process entry point.
pub struct BridgeContext {
    pub state: BridgeState,
    pub bindings: BindingStore,
    pub agent: Arc<dyn AgentApi>,
    pub transport: Option<Arc<dyn ChatTransport>>,
}

impl BridgeContext {
    pub fn new(
        bindings: BindingStore,
        agent: Arc<dyn AgentApi>,
        transport: Option<Arc<dyn ChatTransport>>,
    ) -> Self {
        Self {
            state: BridgeState::default(),
            bindings,
            agent,
            transport,
        }
    }

    /// Cheap guard checked before any notice formatting: with no bound
    /// identities or no transport, emitting is pointless.
    pub fn can_notify(&self) -> bool {
        self.transport.is_some() && !self.bindings.bindings().is_empty()
    }
}
